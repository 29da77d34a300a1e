use thiserror::Error;

use crate::{eviction_cache::CacheFull, PageId, RecordId, TableId, TransactionId};

/// Errors surfaced by the storage engine.
///
/// `LockTimeout` and `EvictionExhausted` are resolved by aborting the requesting
/// transaction, see [`DbError::is_abort`].
#[derive(Error, Debug)]
pub enum DbError {
    /// The lock retry budget ran out.
    #[error("transaction {tid} timed out acquiring a lock on page {pid} after {attempts} attempts")]
    LockTimeout {
        tid: TransactionId,
        pid: PageId,
        attempts: usize,
    },

    /// Every cached page is dirty or pinned so nothing can be evicted without breaking no-steal.
    #[error("no clean page to evict from a cache of {capacity} pages")]
    EvictionExhausted { capacity: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("page {pid} is past the end of a file with {num_pages} pages")]
    PageOutOfRange { pid: PageId, num_pages: u32 },

    #[error("no such table: {table_id}")]
    NoSuchTable { table_id: TableId },

    #[error("schema mismatch: {detail}")]
    SchemaMismatch { detail: String },

    #[error("page {pid} has no empty slot")]
    PageFull { pid: PageId },

    #[error("slot {rid} holds no tuple")]
    SlotNotUsed { rid: RecordId },

    #[error("tuple has no record id")]
    MissingRecordId,

    #[error("corrupt page data: {detail}")]
    Corrupt { detail: String },
}

impl DbError {
    /// Whether the calling layer should resolve this error by aborting the transaction
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            DbError::LockTimeout { .. } | DbError::EvictionExhausted { .. }
        )
    }

    pub(crate) fn illegal_state(detail: impl Into<String>) -> Self {
        DbError::IllegalState(detail.into())
    }
}

impl From<CacheFull> for DbError {
    fn from(err: CacheFull) -> Self {
        DbError::EvictionExhausted {
            capacity: err.capacity,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
