use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tracing::warn;

use crate::{error::Result, PageCache, PageId, Permissions, TableId, Tuple};

/// Unique identifier of a transaction
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out transaction ids in a monotonically increasing fashion
#[derive(Debug)]
pub(crate) struct TxIdGenerator {
    next_id: AtomicU64,
}

impl TxIdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// A running transaction bound to the [`PageCache`] it reads and writes through.
///
/// Consumed by [`Transaction::commit`] or [`Transaction::abort`]. A handle that is dropped
/// while still running is aborted.
pub struct Transaction {
    tid: TransactionId,
    page_cache: Arc<PageCache>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(tid: TransactionId, page_cache: Arc<PageCache>) -> Self {
        Self {
            tid,
            page_cache,
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.tid
    }

    pub fn get_page(&self, pid: PageId, perm: Permissions) -> Result<crate::PageRef> {
        self.page_cache.get_page(self.tid, pid, perm)
    }

    pub fn insert_tuple(&self, table_id: TableId, tuple: Tuple) -> Result<()> {
        self.page_cache.insert_tuple(self.tid, table_id, tuple)
    }

    pub fn delete_tuple(&self, tuple: &Tuple) -> Result<()> {
        self.page_cache.delete_tuple(self.tid, tuple)
    }

    /// Flush everything this transaction dirtied and release its locks.
    ///
    /// If a flush fails the handle is handed back with the error so the caller can retry
    /// the commit or abort instead.
    pub fn commit(mut self) -> std::result::Result<(), (Self, crate::DbError)> {
        match self.page_cache.transaction_complete(self.tid, true) {
            Ok(()) => {
                self.finished = true;
                Ok(())
            }
            Err(e) => Err((self, e)),
        }
    }

    /// Revert everything this transaction dirtied and release its locks
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.page_cache.transaction_complete(self.tid, false)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("tid", &self.tid)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(tid = self.tid.as_u64(), "transaction dropped while running; aborting");
        if let Err(e) = self.page_cache.transaction_complete(self.tid, false) {
            warn!(tid = self.tid.as_u64(), error = %e, "abort on drop failed");
        }
    }
}
