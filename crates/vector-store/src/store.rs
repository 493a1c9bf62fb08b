//! In-memory chunk record store with a two-file on-disk layout.
//!
//! `vectors.bin` holds the raw rows, `meta.json` holds everything else plus each record's
//! row offset. The store is the single owner of chunk records; search and sync only ever
//! see committed state.

use crate::config::Metric;
use crate::error::{Result, VectorStoreError};
use crate::types::{ChunkId, ChunkRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const VECTORS_FILE_NAME: &str = "vectors.bin";
pub const META_FILE_NAME: &str = "meta.json";

const VECTORS_MAGIC: &[u8; 4] = b"CIV1";
const HEADER_LEN: usize = 4 + 4 + 8;
const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone)]
pub struct VectorRecordStore {
    metric: Metric,
    dimension: Option<usize>,
    records: BTreeMap<ChunkId, ChunkRecord>,
    /// path -> file hash of its committed records
    files: BTreeMap<String, String>,
}

impl VectorRecordStore {
    #[must_use]
    pub const fn new(metric: Metric) -> Self {
        Self {
            metric,
            dimension: None,
            records: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn metric(&self) -> Metric {
        self.metric
    }

    /// Established vector dimension; `None` until the first record is committed.
    #[must_use]
    pub const fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn contains_path(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Insert records, committing each file's record set atomically.
    ///
    /// Records are grouped by path. A group is validated in full before any of its records
    /// become visible; the first invalid group aborts the call, leaving groups committed
    /// before it in place. A path that already has records is rejected, so callers delete
    /// first.
    pub fn insert(&mut self, records: Vec<ChunkRecord>) -> Result<usize> {
        let mut groups: BTreeMap<String, Vec<ChunkRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.path.clone()).or_default().push(record);
        }

        let mut inserted = 0;
        for (path, group) in groups {
            let (dimension, file_hash) = self.validate_group(&path, &group)?;
            self.dimension.get_or_insert(dimension);
            self.files.insert(path, file_hash);
            inserted += group.len();
            for record in group {
                self.records.insert(record.chunk_id.clone(), record);
            }
        }
        Ok(inserted)
    }

    fn validate_group(&self, path: &str, group: &[ChunkRecord]) -> Result<(usize, String)> {
        if path.is_empty() || path.starts_with('/') || path.contains('\\') {
            return Err(VectorStoreError::InvalidRecord(format!(
                "path '{path}' must be repository-relative and '/'-separated"
            )));
        }
        if self.files.contains_key(path) {
            return Err(VectorStoreError::InvalidRecord(format!(
                "records for '{path}' already exist; delete them before inserting"
            )));
        }

        let file_hash = group[0].file_hash.clone();
        let dimension = self.dimension.unwrap_or(group[0].vector.len());
        if dimension == 0 {
            return Err(VectorStoreError::InvalidRecord(format!(
                "empty vector for '{path}'"
            )));
        }

        let mut seen = BTreeSet::new();
        for record in group {
            if record.chunk_id.path != record.path {
                return Err(VectorStoreError::InvalidRecord(format!(
                    "chunk id {} does not belong to '{path}'",
                    record.chunk_id
                )));
            }
            if !seen.insert(record.chunk_id.index) {
                return Err(VectorStoreError::InvalidRecord(format!(
                    "duplicate chunk id {}",
                    record.chunk_id
                )));
            }
            if record.file_hash != file_hash {
                return Err(VectorStoreError::InvalidRecord(format!(
                    "records for '{path}' carry more than one file hash"
                )));
            }
            if record.line_start == 0 || record.line_start > record.line_end {
                return Err(VectorStoreError::InvalidRecord(format!(
                    "chunk {} has invalid line range {}..={}",
                    record.chunk_id, record.line_start, record.line_end
                )));
            }
            if record.vector.len() != dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
        }
        Ok((dimension, file_hash))
    }

    /// Remove every record of `path`. Returns how many were removed; unknown paths are a no-op.
    pub fn delete_by_path(&mut self, path: &str) -> usize {
        if self.files.remove(path).is_none() {
            return 0;
        }
        let keys: Vec<ChunkId> = self
            .records
            .range(ChunkId::new(path, 0)..=ChunkId::new(path, u32::MAX))
            .map(|(id, _)| id.clone())
            .collect();
        for key in &keys {
            self.records.remove(key);
        }
        keys.len()
    }

    #[must_use]
    pub fn snapshot_hashes(&self) -> BTreeMap<String, String> {
        self.files
            .iter()
            .map(|(path, hash)| (path.clone(), hash.clone()))
            .collect()
    }

    /// Committed records in [`ChunkId`] order. Each call starts a fresh pass.
    pub fn all_records(&self) -> impl Iterator<Item = &ChunkRecord> + '_ {
        self.records.values()
    }

    /// Drop every record and forget the dimension. The metric stays.
    pub fn clear(&mut self) {
        self.records.clear();
        self.files.clear();
        self.dimension = None;
    }

    /// Drop every record and switch to `metric`. Used when a full rebuild changes the metric.
    pub fn reset(&mut self, metric: Metric) {
        self.clear();
        self.metric = metric;
    }

    /// Load the store saved in `dir`, or `None` when nothing has been saved there yet.
    pub async fn load_optional(dir: &Path) -> Result<Option<Self>> {
        let meta_exists = tokio::fs::try_exists(dir.join(META_FILE_NAME)).await?;
        let vectors_exist = tokio::fs::try_exists(dir.join(VECTORS_FILE_NAME)).await?;
        match (meta_exists, vectors_exist) {
            (false, false) => Ok(None),
            (true, true) => Self::load(dir).await.map(Some),
            _ => Err(VectorStoreError::storage(format!(
                "incomplete vector store at {}: expected both {META_FILE_NAME} and {VECTORS_FILE_NAME}",
                dir.display()
            ))),
        }
    }

    /// Load a store from `dir`, or start empty when nothing has been saved there yet.
    ///
    /// A persisted store whose metric differs from `metric` is a storage error: the index
    /// has to be rebuilt.
    pub async fn load_or_new(dir: &Path, metric: Metric) -> Result<Self> {
        let Some(store) = Self::load_optional(dir).await? else {
            log::debug!("No vector store at {}, starting empty", dir.display());
            return Ok(Self::new(metric));
        };
        if store.metric != metric {
            return Err(VectorStoreError::storage(format!(
                "vector store at {} uses metric '{}' but '{}' is configured; rebuild the index",
                dir.display(),
                store.metric,
                metric
            )));
        }
        Ok(store)
    }

    pub async fn load(dir: &Path) -> Result<Self> {
        log::debug!("Loading vector store from {}", dir.display());
        let meta_bytes = tokio::fs::read(dir.join(META_FILE_NAME)).await?;
        let meta: PersistedMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| VectorStoreError::storage(format!("corrupt {META_FILE_NAME}: {e}")))?;
        let raw = tokio::fs::read(dir.join(VECTORS_FILE_NAME)).await?;
        let store = Self::decode(meta, &raw)?;
        log::debug!(
            "Loaded {} chunks across {} files",
            store.len(),
            store.file_count()
        );
        Ok(store)
    }

    fn decode(meta: PersistedMeta, raw: &[u8]) -> Result<Self> {
        if meta.schema_version != SCHEMA_VERSION {
            return Err(VectorStoreError::storage(format!(
                "unsupported vector store schema {} (expected {SCHEMA_VERSION})",
                meta.schema_version
            )));
        }
        let (dimension, rows, body) = decode_header(raw)?;
        // The two files are renamed one after the other; a reader between the renames
        // sees a pair from different saves.
        let checksum = vectors_checksum(body);
        if meta.vectors_sha256 != checksum {
            return Err(VectorStoreError::storage(format!(
                "{META_FILE_NAME} and {VECTORS_FILE_NAME} come from different saves \
                 (checksum {} vs {checksum})",
                meta.vectors_sha256
            )));
        }
        if meta.records.len() != rows {
            return Err(VectorStoreError::storage(format!(
                "{META_FILE_NAME} lists {} records but {VECTORS_FILE_NAME} holds {rows} rows",
                meta.records.len()
            )));
        }

        let mut store = Self::new(meta.metric);
        if rows == 0 {
            return Ok(store);
        }
        if meta.dimension != Some(dimension) {
            return Err(VectorStoreError::storage(format!(
                "dimension mismatch between {META_FILE_NAME} ({:?}) and {VECTORS_FILE_NAME} ({dimension})",
                meta.dimension
            )));
        }

        let mut used_offsets = vec![false; rows];
        let mut records = Vec::with_capacity(rows);
        for entry in meta.records {
            let offset = usize::try_from(entry.offset).unwrap_or(usize::MAX);
            if offset >= rows || std::mem::replace(&mut used_offsets[offset], true) {
                return Err(VectorStoreError::storage(format!(
                    "invalid or repeated row offset {} for {}",
                    entry.offset, entry.chunk_id
                )));
            }
            let start = offset * dimension * 4;
            let vector = body[start..start + dimension * 4]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            records.push(ChunkRecord {
                chunk_id: entry.chunk_id,
                path: entry.path,
                line_start: entry.line_start,
                line_end: entry.line_end,
                file_hash: entry.file_hash,
                vector,
            });
        }
        store
            .insert(records)
            .map_err(|e| VectorStoreError::storage(format!("corrupt vector store: {e}")))?;
        Ok(store)
    }

    /// Persist to `dir`. Both files go through `*.tmp` and a rename.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let (meta, vectors) = self.encode()?;

        let vectors_path = dir.join(VECTORS_FILE_NAME);
        let meta_path = dir.join(META_FILE_NAME);
        let vectors_tmp = vectors_path.with_extension("bin.tmp");
        let meta_tmp = meta_path.with_extension("json.tmp");

        tokio::fs::write(&vectors_tmp, &vectors).await?;
        tokio::fs::write(&meta_tmp, serde_json::to_vec_pretty(&meta)?).await?;
        tokio::fs::rename(&vectors_tmp, &vectors_path).await?;
        tokio::fs::rename(&meta_tmp, &meta_path).await?;

        log::debug!(
            "Saved {} chunks ({} files) to {}",
            self.len(),
            self.file_count(),
            dir.display()
        );
        Ok(())
    }

    fn encode(&self) -> Result<(PersistedMeta, Vec<u8>)> {
        let dimension = self.dimension.unwrap_or(0);
        let dim_u32 = u32::try_from(dimension)
            .map_err(|_| VectorStoreError::storage(format!("dimension {dimension} too large")))?;
        let mut vectors = Vec::with_capacity(HEADER_LEN + self.len() * dimension * 4);
        vectors.extend_from_slice(VECTORS_MAGIC);
        vectors.extend_from_slice(&dim_u32.to_le_bytes());
        vectors.extend_from_slice(&(self.len() as u64).to_le_bytes());

        let mut records = Vec::with_capacity(self.len());
        for (offset, record) in self.records.values().enumerate() {
            for value in &record.vector {
                vectors.extend_from_slice(&value.to_le_bytes());
            }
            records.push(PersistedRecordMeta {
                chunk_id: record.chunk_id.clone(),
                path: record.path.clone(),
                line_start: record.line_start,
                line_end: record.line_end,
                file_hash: record.file_hash.clone(),
                offset: offset as u64,
            });
        }

        let meta = PersistedMeta {
            schema_version: SCHEMA_VERSION,
            vectors_sha256: vectors_checksum(&vectors[HEADER_LEN..]),
            dimension: self.dimension,
            metric: self.metric,
            records,
        };
        Ok((meta, vectors))
    }
}

/// SHA-256 hex digest of the row section of `vectors.bin`.
fn vectors_checksum(body: &[u8]) -> String {
    Sha256::digest(body)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn decode_header(raw: &[u8]) -> Result<(usize, usize, &[u8])> {
    if raw.len() < HEADER_LEN || &raw[..4] != VECTORS_MAGIC {
        return Err(VectorStoreError::storage(format!(
            "{VECTORS_FILE_NAME} has no valid header"
        )));
    }
    let dimension = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    let mut rows_bytes = [0u8; 8];
    rows_bytes.copy_from_slice(&raw[8..16]);
    let rows = usize::try_from(u64::from_le_bytes(rows_bytes))
        .map_err(|_| VectorStoreError::storage("row count does not fit in memory"))?;
    let body = &raw[HEADER_LEN..];
    let expected = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| VectorStoreError::storage("vector table size overflows"))?;
    if body.len() != expected {
        return Err(VectorStoreError::storage(format!(
            "{VECTORS_FILE_NAME} holds {} bytes of rows, expected {expected}",
            body.len()
        )));
    }
    Ok((dimension, rows, body))
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedMeta {
    schema_version: u32,
    vectors_sha256: String,
    dimension: Option<usize>,
    metric: Metric,
    records: Vec<PersistedRecordMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecordMeta {
    chunk_id: ChunkId,
    path: String,
    line_start: usize,
    line_end: usize,
    file_hash: String,
    offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(path: &str, index: u32, hash: &str, vector: Vec<f32>) -> ChunkRecord {
        let start = index as usize * 10 + 1;
        ChunkRecord::new(path, index, start, start + 9, hash, vector)
    }

    fn sample_store() -> VectorRecordStore {
        let mut store = VectorRecordStore::new(Metric::Ip);
        store
            .insert(vec![
                record("b.py", 0, "hb", vec![0.0, 1.0]),
                record("a.py", 1, "ha", vec![0.5, 0.5]),
                record("a.py", 0, "ha", vec![1.0, 0.0]),
            ])
            .unwrap();
        store
    }

    #[test]
    fn insert_establishes_dimension_and_orders_records() {
        let store = sample_store();
        assert_eq!(store.dimension(), Some(2));
        assert_eq!(store.len(), 3);
        assert_eq!(store.file_count(), 2);
        let ids: Vec<String> = store.all_records().map(|r| r.chunk_id.to_string()).collect();
        assert_eq!(ids, vec!["a.py#0", "a.py#1", "b.py#0"]);
        // restartable
        assert_eq!(store.all_records().count(), 3);
    }

    #[test]
    fn dimension_mismatch_rejects_whole_file() {
        let mut store = sample_store();
        let err = store
            .insert(vec![
                record("c.py", 0, "hc", vec![1.0, 1.0]),
                record("c.py", 1, "hc", vec![1.0, 1.0, 1.0]),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert!(!store.contains_path("c.py"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn inserting_existing_path_is_rejected() {
        let mut store = sample_store();
        let err = store
            .insert(vec![record("a.py", 5, "ha2", vec![1.0, 1.0])])
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::InvalidRecord(_)));
        assert_eq!(store.len(), 3);
        assert_eq!(store.snapshot_hashes().get("a.py").map(String::as_str), Some("ha"));
    }

    #[test]
    fn mixed_file_hashes_are_rejected() {
        let mut store = VectorRecordStore::new(Metric::Ip);
        let err = store
            .insert(vec![
                record("a.py", 0, "h1", vec![1.0]),
                record("a.py", 1, "h2", vec![1.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::InvalidRecord(_)));
        assert!(store.is_empty());
        assert_eq!(store.dimension(), None);
    }

    #[test]
    fn absolute_paths_are_rejected() {
        let mut store = VectorRecordStore::new(Metric::Ip);
        assert!(store
            .insert(vec![record("/etc/passwd", 0, "h", vec![1.0])])
            .is_err());
    }

    #[test]
    fn delete_by_path_is_idempotent() {
        let mut store = sample_store();
        assert_eq!(store.delete_by_path("a.py"), 2);
        assert_eq!(store.delete_by_path("a.py"), 0);
        assert_eq!(store.delete_by_path("missing.py"), 0);
        assert_eq!(
            store.snapshot_hashes(),
            BTreeMap::from([("b.py".to_string(), "hb".to_string())])
        );
    }

    #[test]
    fn delete_does_not_touch_paths_sharing_a_prefix() {
        let mut store = VectorRecordStore::new(Metric::Ip);
        store
            .insert(vec![
                record("a.py", 0, "h", vec![1.0]),
                record("a.py.bak", 0, "h", vec![1.0]),
            ])
            .unwrap();
        assert_eq!(store.delete_by_path("a.py"), 1);
        assert!(store.contains_path("a.py.bak"));
    }

    #[test]
    fn reset_switches_metric() {
        let mut store = sample_store();
        store.reset(Metric::L2);
        assert!(store.is_empty());
        assert_eq!(store.metric(), Metric::L2);
        assert!(store.snapshot_hashes().is_empty());
    }

    #[test]
    fn clear_resets_dimension_but_keeps_metric() {
        let mut store = VectorRecordStore::new(Metric::L2);
        store.insert(vec![record("a.py", 0, "h", vec![1.0])]).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.dimension(), None);
        assert_eq!(store.metric(), Metric::L2);
        store
            .insert(vec![record("a.py", 0, "h", vec![1.0, 2.0, 3.0])])
            .unwrap();
        assert_eq!(store.dimension(), Some(3));
    }

    #[tokio::test]
    async fn save_and_load_preserve_records() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("vectors");
        let store = sample_store();
        store.save(&dir).await.unwrap();

        assert!(!dir.join("vectors.bin.tmp").exists());
        let loaded = VectorRecordStore::load_or_new(&dir, Metric::Ip).await.unwrap();
        let original: Vec<ChunkRecord> = store.all_records().cloned().collect();
        let restored: Vec<ChunkRecord> = loaded.all_records().cloned().collect();
        assert_eq!(restored, original);
        assert_eq!(loaded.snapshot_hashes(), store.snapshot_hashes());
    }

    #[tokio::test]
    async fn missing_directory_loads_empty() {
        let temp = TempDir::new().unwrap();
        let store = VectorRecordStore::load_or_new(&temp.path().join("none"), Metric::L2)
            .await
            .unwrap();
        assert!(store.is_empty());
        assert_eq!(store.metric(), Metric::L2);
    }

    #[tokio::test]
    async fn empty_store_round_trips() {
        let temp = TempDir::new().unwrap();
        VectorRecordStore::new(Metric::Ip).save(temp.path()).await.unwrap();
        let loaded = VectorRecordStore::load(temp.path()).await.unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), None);
    }

    #[tokio::test]
    async fn metric_change_requires_rebuild() {
        let temp = TempDir::new().unwrap();
        sample_store().save(temp.path()).await.unwrap();
        let err = VectorRecordStore::load_or_new(temp.path(), Metric::L2)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Storage(_)));
    }

    #[tokio::test]
    async fn truncated_vectors_file_is_storage_error() {
        let temp = TempDir::new().unwrap();
        sample_store().save(temp.path()).await.unwrap();
        let path = temp.path().join(VECTORS_FILE_NAME);
        let mut raw = std::fs::read(&path).unwrap();
        raw.truncate(raw.len() - 4);
        std::fs::write(&path, raw).unwrap();

        let err = VectorRecordStore::load(temp.path()).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::Storage(_)));
    }

    #[tokio::test]
    async fn vectors_from_another_save_are_rejected() {
        let temp = TempDir::new().unwrap();
        let older = temp.path().join("older");
        let newer = temp.path().join("newer");
        sample_store().save(&older).await.unwrap();

        // Same row count, but b.py was replaced by c.py, shifting the rows.
        let mut store = sample_store();
        store.delete_by_path("b.py");
        store
            .insert(vec![record("c.py", 0, "hc", vec![0.25, 0.75])])
            .unwrap();
        store.save(&newer).await.unwrap();
        assert_eq!(store.len(), 3);

        std::fs::copy(newer.join(VECTORS_FILE_NAME), older.join(VECTORS_FILE_NAME)).unwrap();
        let err = VectorRecordStore::load(&older).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::Storage(_)));
        assert!(err.to_string().contains("different saves"), "{err}");
    }

    #[tokio::test]
    async fn half_written_store_is_storage_error() {
        let temp = TempDir::new().unwrap();
        sample_store().save(temp.path()).await.unwrap();
        std::fs::remove_file(temp.path().join(META_FILE_NAME)).unwrap();
        let err = VectorRecordStore::load_or_new(temp.path(), Metric::Ip)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Storage(_)));
    }
}
