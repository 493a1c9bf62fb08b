//! Top-k similarity search over a [`VectorRecordStore`].
//!
//! Records are copied batch by batch into one host buffer, scored on the resolved device and
//! folded into a single bounded heap. The heap keeps its worst candidate on top, so each new
//! score is compared against the current k-th best only.

use crate::config::{Metric, SearchMode, VectorConfig};
use crate::device::{resolve_device, ComputeDevice, DeviceCapabilities, DeviceResolution};
use crate::error::{Result, VectorStoreError};
use crate::scorer::{BatchScorer, ScoreError, TensorScorer};
use crate::store::VectorRecordStore;
use crate::types::{ChunkId, ChunkRecord};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const F32_BYTES: u64 = 4;
const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub path: String,
    pub line_start: usize,
    pub line_end: usize,
    /// Dot product for `ip`, squared distance for `l2`.
    pub score: f32,
}

/// What a search actually did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub resolution: DeviceResolution,
    pub mode: SearchMode,
    pub metric: Metric,
    /// Number of records that were scored.
    pub scored: usize,
    /// Row count of every batch, in scoring order.
    pub batch_rows: Vec<usize>,
    /// Batches that ran out of device memory and were re-scored on CPU.
    pub cpu_fallback_batches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub report: SearchReport,
}

/// Rows per batch for a VRAM budget, or `None` when the budget is unset.
pub fn max_batch_rows(max_vram_mb: Option<u64>, dimension: usize) -> Result<Option<usize>> {
    let Some(mb) = max_vram_mb else {
        return Ok(None);
    };
    let row_bytes = (dimension as u64).saturating_mul(F32_BYTES).max(1);
    let rows = mb.saturating_mul(BYTES_PER_MB) / row_bytes;
    if rows == 0 {
        return Err(VectorStoreError::config_invalid(format!(
            "max_vram_mb={mb} cannot hold a single {dimension}-dimensional vector"
        )));
    }
    Ok(Some(usize::try_from(rows).unwrap_or(usize::MAX)))
}

pub struct SimilarityBackend {
    scorer: Box<dyn BatchScorer>,
    capabilities: Option<DeviceCapabilities>,
}

impl Default for SimilarityBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::with_scorer(TensorScorer)
    }

    #[must_use]
    pub fn with_scorer(scorer: impl BatchScorer + 'static) -> Self {
        Self {
            scorer: Box::new(scorer),
            capabilities: None,
        }
    }

    /// Pin the capabilities instead of probing the runtime on every search.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn search(
        &self,
        store: &VectorRecordStore,
        query: &[f32],
        top_k: usize,
        config: &VectorConfig,
    ) -> Result<SearchOutcome> {
        config.validate()?;
        let capabilities = self.capabilities.unwrap_or_else(DeviceCapabilities::detect);
        let resolution = resolve_device(config.device, capabilities);
        if resolution.degraded {
            log::warn!(
                "Requested device '{}' is unavailable, searching on CPU",
                resolution.requested
            );
        }

        let metric = store.metric();
        let mut report = SearchReport {
            resolution,
            mode: config.search_mode,
            metric,
            scored: 0,
            batch_rows: Vec::new(),
            cpu_fallback_batches: 0,
        };

        let Some(dimension) = store.dimension() else {
            return Ok(SearchOutcome {
                hits: Vec::new(),
                report,
            });
        };
        if query.len() != dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        if store.is_empty() || top_k == 0 {
            return Ok(SearchOutcome {
                hits: Vec::new(),
                report,
            });
        }

        let records: Vec<&ChunkRecord> = store.all_records().collect();
        let population = match config.search_mode {
            SearchMode::Exact => records,
            SearchMode::Approx => {
                approx_sample(records, config.approx_sample_rate, config.approx_seed)
            }
        };
        let batch_rows = max_batch_rows(config.max_vram_mb, dimension)?
            .unwrap_or(population.len())
            .max(1);

        let mut heap = BinaryHeap::with_capacity(top_k.min(population.len()) + 1);
        let mut buffer = Vec::with_capacity(batch_rows.min(population.len()) * dimension);
        for batch in population.chunks(batch_rows) {
            buffer.clear();
            for record in batch {
                buffer.extend_from_slice(&record.vector);
            }
            let scores = self.score_batch(
                resolution.device,
                &buffer,
                batch.len(),
                dimension,
                query,
                metric,
                &mut report,
            )?;
            for (record, score) in batch.iter().copied().zip(scores) {
                push_bounded(
                    &mut heap,
                    Candidate {
                        record,
                        score,
                        metric,
                    },
                    top_k,
                );
            }
            report.batch_rows.push(batch.len());
            report.scored += batch.len();
        }

        let hits = heap
            .into_sorted_vec()
            .into_iter()
            .map(|candidate| SearchHit {
                chunk_id: candidate.record.chunk_id.clone(),
                path: candidate.record.path.clone(),
                line_start: candidate.record.line_start,
                line_end: candidate.record.line_end,
                score: candidate.score,
            })
            .collect();

        log::debug!(
            "Scored {} records in {} batches on {} ({} CPU fallbacks)",
            report.scored,
            report.batch_rows.len(),
            report.resolution.device,
            report.cpu_fallback_batches
        );
        Ok(SearchOutcome { hits, report })
    }

    #[allow(clippy::too_many_arguments)]
    fn score_batch(
        &self,
        device: ComputeDevice,
        buffer: &[f32],
        rows: usize,
        dimension: usize,
        query: &[f32],
        metric: Metric,
        report: &mut SearchReport,
    ) -> Result<Vec<f32>> {
        let scores = match self
            .scorer
            .score(device, buffer, rows, dimension, query, metric)
        {
            Ok(scores) => scores,
            Err(ScoreError::OutOfMemory(message)) if device != ComputeDevice::Cpu => {
                log::warn!("{device} ran out of memory on a {rows}-row batch, retrying on CPU: {message}");
                report.cpu_fallback_batches += 1;
                self.scorer
                    .score(ComputeDevice::Cpu, buffer, rows, dimension, query, metric)
                    .map_err(|e| {
                        VectorStoreError::Compute(format!("CPU retry after out-of-memory failed: {e}"))
                    })?
            }
            Err(e) => return Err(VectorStoreError::Compute(format!("{device}: {e}"))),
        };
        if scores.len() != rows {
            return Err(VectorStoreError::Compute(format!(
                "scorer returned {} scores for {rows} rows",
                scores.len()
            )));
        }
        Ok(scores)
    }
}

/// Pick `ceil(rate * n)` records (at least one), keeping [`ChunkId`] order.
///
/// The draw is seeded from `seed` and the identity of the population, so the same index
/// state and seed always yield the same sample.
fn approx_sample(records: Vec<&ChunkRecord>, rate: f64, seed: u64) -> Vec<&ChunkRecord> {
    let total = records.len();
    if total == 0 {
        return records;
    }
    // Small slack so that e.g. 0.1 * 30 does not round up to 4.
    let wanted = (rate * total as f64 - 1e-9).ceil();
    let amount = (wanted.max(1.0) as usize).min(total);
    if amount == total {
        return records;
    }

    let mut rng = StdRng::seed_from_u64(population_seed(seed, &records));
    let mut picked = rand::seq::index::sample(&mut rng, total, amount).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| records[i]).collect()
}

fn population_seed(seed: u64, records: &[&ChunkRecord]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ seed;
    for record in records {
        for byte in record
            .chunk_id
            .path
            .bytes()
            .chain(record.chunk_id.index.to_le_bytes())
        {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

fn push_bounded<'a>(heap: &mut BinaryHeap<Candidate<'a>>, candidate: Candidate<'a>, k: usize) {
    if heap.len() < k {
        heap.push(candidate);
        return;
    }
    if let Some(worst) = heap.peek() {
        if candidate < *worst {
            heap.pop();
            heap.push(candidate);
        }
    }
}

/// Ordered so that "greater" means "ranks worse".
struct Candidate<'a> {
    record: &'a ChunkRecord,
    score: f32,
    metric: Metric,
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_score = match self.metric {
            Metric::Ip => other.score.total_cmp(&self.score),
            Metric::L2 => self.score.total_cmp(&other.score),
        };
        by_score.then_with(|| self.record.chunk_id.cmp(&other.record.chunk_id))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}
