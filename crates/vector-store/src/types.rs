use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one chunk: the owning file plus the chunk's position inside it.
///
/// Ordering is by path, then index. The similarity backend uses this order to break score
/// ties, so results are reproducible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId {
    pub path: String,
    pub index: u32,
}

impl ChunkId {
    #[must_use]
    pub fn new(path: impl Into<String>, index: u32) -> Self {
        Self {
            path: path.into(),
            index,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.index)
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ChunkId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (path, index) = raw
            .rsplit_once('#')
            .ok_or_else(|| format!("chunk id '{raw}' has no '#index' suffix"))?;
        let index = index
            .parse::<u32>()
            .map_err(|err| format!("chunk id '{raw}' has invalid index: {err}"))?;
        if path.is_empty() {
            return Err(format!("chunk id '{raw}' has an empty path"));
        }
        Ok(Self::new(path, index))
    }
}

/// One embedded unit owned by the [`VectorRecordStore`](crate::VectorRecordStore).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    /// Repository-relative path, `/`-separated.
    pub path: String,
    /// 1-based, inclusive.
    pub line_start: usize,
    /// 1-based, inclusive.
    pub line_end: usize,
    /// Hash of the whole file the chunk was cut from.
    pub file_hash: String,
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        index: u32,
        line_start: usize,
        line_end: usize,
        file_hash: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        let path = path.into();
        Self {
            chunk_id: ChunkId::new(path.clone(), index),
            path,
            line_start,
            line_end,
            file_hash: file_hash.into(),
            vector,
        }
    }
}

/// Normalize a repository-relative path to the form stored in the index.
#[must_use]
pub fn normalize_rel_path(raw: &str) -> String {
    let mut normalized = raw.replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_orders_by_path_then_index() {
        let mut ids = vec![
            ChunkId::new("b.py", 0),
            ChunkId::new("a.py", 10),
            ChunkId::new("a.py", 2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ChunkId::new("a.py", 2),
                ChunkId::new("a.py", 10),
                ChunkId::new("b.py", 0),
            ]
        );
    }

    #[test]
    fn chunk_id_string_form_survives_hashes_in_path() {
        let id = ChunkId::new("docs/c#/notes.md", 3);
        let raw = String::from(id.clone());
        assert_eq!(raw, "docs/c#/notes.md#3");
        assert_eq!(ChunkId::try_from(raw).unwrap(), id);
        assert!(ChunkId::try_from("no-index".to_string()).is_err());
        assert!(ChunkId::try_from("#4".to_string()).is_err());
    }

    #[test]
    fn normalize_rel_path_strips_dot_prefix_and_backslashes() {
        assert_eq!(normalize_rel_path("./src\\main.rs"), "src/main.rs");
        assert_eq!(normalize_rel_path("src/lib.rs"), "src/lib.rs");
    }
}
