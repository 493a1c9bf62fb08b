//! Hash-driven reconciliation of the record store with the tracked file set.
//!
//! | stored hash | tracked | hashes equal | action  |
//! |-------------|---------|--------------|---------|
//! | no          | yes     |              | insert  |
//! | yes         | yes     | yes          | no-op   |
//! | yes         | yes     | no           | replace |
//! | yes         | no      |              | delete  |
//!
//! Every deletion (including the old records of replaced files) is applied before the first
//! insertion.

use crate::source::FileSource;
use crate::stats::SyncStats;
use crate::Result;
use code_index_chunker::{Chunker, TextChunk};
use code_index_vector_store::{
    ChunkRecord, Embedder, EmbeddingError, Metric, VectorRecordStore, VectorStoreError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Upper bound on texts per embedding request.
pub const EMBED_BATCH_SIZE: usize = 64;

/// Paths per action, each bucket sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub insert: Vec<String>,
    pub replace: Vec<String>,
    pub delete: Vec<String>,
    pub unchanged: Vec<String>,
}

impl SyncPlan {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.insert.is_empty() && self.replace.is_empty() && self.delete.is_empty()
    }
}

#[must_use]
pub fn plan_sync(
    stored: &BTreeMap<String, String>,
    tracked: &BTreeMap<String, String>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    for (path, hash) in tracked {
        match stored.get(path) {
            None => plan.insert.push(path.clone()),
            Some(old) if old == hash => plan.unchanged.push(path.clone()),
            Some(_) => plan.replace.push(path.clone()),
        }
    }
    plan.delete = stored
        .keys()
        .filter(|path| !tracked.contains_key(*path))
        .cloned()
        .collect();
    plan
}

/// Plan that drops every stored file and re-inserts every tracked one.
#[must_use]
pub fn full_rebuild_plan(
    stored: &BTreeMap<String, String>,
    tracked: &BTreeMap<String, String>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    for path in tracked.keys() {
        if stored.contains_key(path) {
            plan.replace.push(path.clone());
        } else {
            plan.insert.push(path.clone());
        }
    }
    plan.delete = stored
        .keys()
        .filter(|path| !tracked.contains_key(*path))
        .cloned()
        .collect();
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Insert,
    Replace,
}

struct PendingFile {
    path: String,
    hash: String,
    kind: PendingKind,
    chunks: Vec<TextChunk>,
}

pub struct Synchronizer<'a> {
    source: &'a dyn FileSource,
    embedder: &'a dyn Embedder,
    chunker: Chunker,
    metric: Metric,
}

impl<'a> Synchronizer<'a> {
    /// `metric` is what a full rebuild resets the store to.
    pub fn new(
        source: &'a dyn FileSource,
        embedder: &'a dyn Embedder,
        chunker: Chunker,
        metric: Metric,
    ) -> Self {
        Self {
            source,
            embedder,
            chunker,
            metric,
        }
    }

    /// Bring `store` in line with the source. With `full_rebuild` every record is dropped
    /// and the dimension is re-established from the first new embedding.
    ///
    /// On error the in-memory store may be partially updated; callers persist it only after
    /// a successful return.
    pub async fn run(&self, store: &mut VectorRecordStore, full_rebuild: bool) -> Result<SyncStats> {
        let start = Instant::now();
        let tracked = self.source.list_tracked().await?;
        let stored = store.snapshot_hashes();
        let plan = if full_rebuild {
            full_rebuild_plan(&stored, &tracked)
        } else {
            plan_sync(&stored, &tracked)
        };
        log::info!(
            "Sync plan: {} insert, {} replace, {} delete, {} unchanged{}",
            plan.insert.len(),
            plan.replace.len(),
            plan.delete.len(),
            plan.unchanged.len(),
            if full_rebuild { " (full rebuild)" } else { "" }
        );

        let mut stats = SyncStats {
            files_unchanged: plan.unchanged.len(),
            ..SyncStats::default()
        };

        for path in &plan.delete {
            stats.chunks_deleted += store.delete_by_path(path);
            stats.files_deleted += 1;
            log::debug!("Deleted {path}");
        }
        for path in &plan.replace {
            stats.chunks_deleted += store.delete_by_path(path);
        }
        if full_rebuild {
            store.reset(self.metric);
        }

        let mut work: Vec<(&String, PendingKind)> = plan
            .insert
            .iter()
            .map(|p| (p, PendingKind::Insert))
            .chain(plan.replace.iter().map(|p| (p, PendingKind::Replace)))
            .collect();
        work.sort_by(|a, b| a.0.cmp(b.0));

        let mut pending = Vec::new();
        let mut pending_texts = 0usize;
        for (path, kind) in work {
            let Some(snapshot) = self.source.read(path).await? else {
                log::debug!("{path} vanished or turned binary before it could be read");
                if kind == PendingKind::Replace {
                    stats.files_deleted += 1;
                }
                continue;
            };
            let chunks = self.chunker.chunk_str(&snapshot.text);
            if chunks.is_empty() {
                if kind == PendingKind::Replace {
                    stats.files_replaced += 1;
                }
                continue;
            }
            pending_texts += chunks.len();
            pending.push(PendingFile {
                path: path.clone(),
                hash: snapshot.hash,
                kind,
                chunks,
            });
            if pending_texts >= EMBED_BATCH_SIZE {
                self.flush(store, &mut pending, &mut stats).await?;
                pending_texts = 0;
            }
        }
        self.flush(store, &mut pending, &mut stats).await?;

        stats.files_indexed = store.file_count();
        stats.chunks_indexed = store.len();
        stats.time_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "Sync done in {}ms: {} files / {} chunks indexed (+{} ~{} -{} files)",
            stats.time_ms,
            stats.files_indexed,
            stats.chunks_indexed,
            stats.files_inserted,
            stats.files_replaced,
            stats.files_deleted
        );
        Ok(stats)
    }

    /// Embed every pending chunk and commit the records file by file.
    async fn flush(
        &self,
        store: &mut VectorRecordStore,
        pending: &mut Vec<PendingFile>,
        stats: &mut SyncStats,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = pending
            .iter()
            .flat_map(|file| file.chunks.iter().map(|chunk| chunk.text.clone()))
            .collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let embedded = self
                .embedder
                .embed(batch)
                .await
                .map_err(VectorStoreError::from)?;
            if embedded.len() != batch.len() {
                return Err(VectorStoreError::from(EmbeddingError::new(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )))
                .into());
            }
            vectors.extend(embedded);
        }

        let mut vectors = vectors.into_iter();
        for file in pending.drain(..) {
            let records: Vec<ChunkRecord> = file
                .chunks
                .iter()
                .zip(vectors.by_ref())
                .enumerate()
                .map(|(index, (chunk, vector))| {
                    ChunkRecord::new(
                        file.path.clone(),
                        index as u32,
                        chunk.line_start,
                        chunk.line_end,
                        file.hash.clone(),
                        vector,
                    )
                })
                .collect();
            let inserted = store.insert(records)?;
            stats.chunks_inserted += inserted;
            match file.kind {
                PendingKind::Insert => stats.files_inserted += 1,
                PendingKind::Replace => stats.files_replaced += 1,
            }
            log::debug!("Indexed {} ({inserted} chunks)", file.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn plan_classifies_every_case() {
        let stored = map(&[("a.py", "1"), ("b.py", "2"), ("d.py", "4")]);
        let tracked = map(&[("a.py", "1"), ("b.py", "22"), ("c.py", "3")]);
        let plan = plan_sync(&stored, &tracked);
        assert_eq!(
            plan,
            SyncPlan {
                insert: vec!["c.py".into()],
                replace: vec!["b.py".into()],
                delete: vec!["d.py".into()],
                unchanged: vec!["a.py".into()],
            }
        );
    }

    #[test]
    fn plan_is_noop_when_hashes_match() {
        let state = map(&[("a.py", "1"), ("b.py", "2")]);
        assert!(plan_sync(&state, &state).is_noop());
    }

    #[test]
    fn full_rebuild_replaces_unchanged_files() {
        let stored = map(&[("a.py", "1"), ("gone.py", "9")]);
        let tracked = map(&[("a.py", "1"), ("new.py", "2")]);
        let plan = full_rebuild_plan(&stored, &tracked);
        assert_eq!(plan.replace, vec!["a.py".to_string()]);
        assert_eq!(plan.insert, vec!["new.py".to_string()]);
        assert_eq!(plan.delete, vec!["gone.py".to_string()]);
        assert!(plan.unchanged.is_empty());
    }
}
