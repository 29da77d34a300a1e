//! Page-granularity shared/exclusive locks for strict two-phase locking.
//!
//! [`LockManager::grant_lock`] makes a single non-blocking attempt; the retry policy belongs to
//! the caller (see [`crate::PageCache::get_page`]). Waiting callers may park on
//! [`LockManager::wait_for_release`], which is signalled whenever a lock is released.

use std::{
    collections::{HashMap, HashSet},
    sync::{Condvar, Mutex},
    time::Duration,
};

use tracing::trace;

use crate::{sync::lock_with_recovery, PageId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// Lock state of one page. Never has both another transaction's shared lock and an exclusive
/// holder: `writer == Some(t)` implies `readers` is empty.
#[derive(Debug, Default)]
struct LockState {
    readers: HashSet<TransactionId>,
    writer: Option<TransactionId>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }

    fn holds(&self, tid: TransactionId) -> bool {
        self.writer == Some(tid) || self.readers.contains(&tid)
    }
}

#[derive(Debug, Default)]
struct LockTables {
    pages: HashMap<PageId, LockState>,
    //  pages each transaction holds any lock on
    held: HashMap<TransactionId, HashSet<PageId>>,
}

impl LockTables {
    fn record_held(&mut self, tid: TransactionId, pid: PageId) {
        self.held.entry(tid).or_default().insert(pid);
    }

    /// Drop `tid`'s lock on `pid`, removing the entry once nobody holds the page
    fn release(&mut self, tid: TransactionId, pid: PageId) {
        if let Some(state) = self.pages.get_mut(&pid) {
            state.readers.remove(&tid);
            if state.writer == Some(tid) {
                state.writer = None;
            }
            if state.is_free() {
                self.pages.remove(&pid);
            }
        }
    }

    fn forget_held(&mut self, tid: TransactionId, pid: &PageId) {
        if let Some(pages) = self.held.get_mut(&tid) {
            pages.remove(pid);
            if pages.is_empty() {
                self.held.remove(&tid);
            }
        }
    }
}

/// Shared by every transaction of a [`crate::Database`] to keep track of page locks
#[derive(Debug, Default)]
pub struct LockManager {
    tables: Mutex<LockTables>,
    cond_var: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try once to lock `pid` for `tid` with `perm`. Returns false if the lock cannot be
    /// granted right now.
    ///
    /// An exclusive request from the sole shared holder upgrades its lock. Requests for a
    /// lock already covered by what `tid` holds succeed without change.
    pub fn grant_lock(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> bool {
        let mut tables = lock_with_recovery(&self.tables, "lock_tables");
        let state = tables.pages.entry(pid).or_default();
        let granted = match perm {
            Permissions::ReadOnly => match state.writer {
                Some(writer) if writer == tid => true,
                Some(_) => false,
                None => {
                    state.readers.insert(tid);
                    true
                }
            },
            Permissions::ReadWrite => {
                if state.writer == Some(tid) {
                    true
                } else if state.is_free()
                    || (state.writer.is_none()
                        && state.readers.len() == 1
                        && state.readers.contains(&tid))
                {
                    state.readers.remove(&tid);
                    state.writer = Some(tid);
                    true
                } else {
                    false
                }
            }
        };
        if granted {
            tables.record_held(tid, pid);
        }
        trace!(tid = tid.as_u64(), %pid, ?perm, granted, "grant_lock");
        granted
    }

    /// Drop whatever lock `tid` holds on `pid`. Releasing a lock that is not held is a no-op.
    pub fn release_lock(&self, tid: TransactionId, pid: PageId) {
        let mut tables = lock_with_recovery(&self.tables, "lock_tables");
        tables.release(tid, pid);
        tables.forget_held(tid, &pid);
        drop(tables);
        self.cond_var.notify_all();
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        let tables = lock_with_recovery(&self.tables, "lock_tables");
        tables
            .pages
            .get(&pid)
            .is_some_and(|state| state.holds(tid))
    }

    /// Release every lock held by `tid`, at the end of the transaction
    pub fn release_all_pages(&self, tid: TransactionId) {
        let mut tables = lock_with_recovery(&self.tables, "lock_tables");
        let pages = tables.held.remove(&tid).unwrap_or_default();
        for &pid in &pages {
            tables.release(tid, pid);
        }
        drop(tables);
        trace!(tid = tid.as_u64(), released = pages.len(), "release_all_pages");
        self.cond_var.notify_all();
    }

    /// Drop all lock state for `pid`, for every transaction
    pub fn remove_page(&self, pid: PageId) {
        let mut tables = lock_with_recovery(&self.tables, "lock_tables");
        if let Some(state) = tables.pages.remove(&pid) {
            let holders: Vec<TransactionId> =
                state.readers.iter().copied().chain(state.writer).collect();
            for tid in holders {
                tables.forget_held(tid, &pid);
            }
        }
        drop(tables);
        self.cond_var.notify_all();
    }

    /// Whether any transaction holds a lock on `pid`
    pub fn is_locked(&self, pid: PageId) -> bool {
        let tables = lock_with_recovery(&self.tables, "lock_tables");
        tables.pages.get(&pid).is_some_and(|state| !state.is_free())
    }

    /// Whether the lock table carries an entry for `pid`
    pub fn has_entry(&self, pid: PageId) -> bool {
        lock_with_recovery(&self.tables, "lock_tables")
            .pages
            .contains_key(&pid)
    }

    pub fn exclusive_holder(&self, pid: PageId) -> Option<TransactionId> {
        let tables = lock_with_recovery(&self.tables, "lock_tables");
        tables.pages.get(&pid).and_then(|state| state.writer)
    }

    pub fn shared_holders(&self, pid: PageId) -> HashSet<TransactionId> {
        let tables = lock_with_recovery(&self.tables, "lock_tables");
        tables
            .pages
            .get(&pid)
            .map(|state| state.readers.clone())
            .unwrap_or_default()
    }

    /// Pages `tid` currently holds any lock on
    pub fn pages_locked_by(&self, tid: TransactionId) -> HashSet<PageId> {
        let tables = lock_with_recovery(&self.tables, "lock_tables");
        tables.held.get(&tid).cloned().unwrap_or_default()
    }

    /// Park the calling thread until some lock is released or `timeout` elapses
    pub fn wait_for_release(&self, timeout: Duration) {
        let tables = lock_with_recovery(&self.tables, "lock_tables");
        //  a spurious or unrelated wakeup only costs the caller one retry attempt
        let _unused = self.cond_var.wait_timeout(tables, timeout);
    }
}
