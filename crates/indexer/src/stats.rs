use serde::{Deserialize, Serialize};

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub files_inserted: usize,
    pub files_replaced: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub chunks_inserted: usize,
    pub chunks_deleted: usize,

    /// Files with at least one record after the pass.
    pub files_indexed: usize,
    /// Records after the pass.
    pub chunks_indexed: usize,

    pub time_ms: u64,
}

impl SyncStats {
    /// Nothing was inserted, replaced or deleted.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.files_inserted == 0 && self.files_replaced == 0 && self.files_deleted == 0
    }
}
