//! The page cache: the single entry point through which transactions reach pages.
//!
//! Every access first takes a page lock through the [`LockManager`], retrying with a randomized
//! bounded backoff, then is served from the bounded [`LruCache`] or read from the owning
//! [`crate::HeapFile`]. Eviction follows a no-steal policy: a dirty page is never chosen, so
//! uncommitted changes only reach disk through a commit.
//!
//! Internal lock order is `pages` mutex, then the lock manager's table, then a page frame (the
//! eviction policy only ever tries a frame's lock). A frame's write guard is never held while the
//! `pages` mutex is taken.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
    },
    time::Instant,
};

use tracing::{debug, trace, warn};

use crate::{
    error::{DbError, Result},
    eviction_cache::{EvictionPolicy, LruCache},
    sync::{lock_with_recovery, read_with_recovery, write_with_recovery},
    Catalog, HeapPage, LockManager, PageCacheConfig, PageId, Permissions, TableId, TransactionId,
    Tuple,
};

type Frame = Arc<RwLock<HeapPage>>;

/// A locked page handed out by [`PageCache::get_page`].
///
/// The handle pins the page: it will not be evicted while any `PageRef` to it is alive. It gives
/// no protection on its own, the page lock taken by `get_page` does that, and it stays with the
/// transaction after the handle is dropped.
#[derive(Debug, Clone)]
pub struct PageRef {
    frame: Frame,
    pid: PageId,
    perm: Permissions,
}

impl PageRef {
    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn permissions(&self) -> Permissions {
        self.perm
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HeapPage> {
        read_with_recovery(&self.frame, "page")
    }

    /// Mutable access to the page; only for handles obtained with [`Permissions::ReadWrite`]
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, HeapPage>> {
        if self.perm != Permissions::ReadWrite {
            return Err(DbError::illegal_state(format!(
                "page {} was requested read-only",
                self.pid
            )));
        }
        Ok(write_with_recovery(&self.frame, "page"))
    }
}

/// Eviction policy that only gives up clean, unpinned pages
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSteal;

impl EvictionPolicy<PageId, Frame> for NoSteal {
    fn select_victim<'a, I>(&self, mut entries: I) -> Option<PageId>
    where
        I: Iterator<Item = (&'a PageId, &'a Frame)>,
    {
        entries
            .find(|(_, frame)| {
                if Arc::strong_count(frame) > 1 {
                    return false;
                }
                //  a frame that is being written right now is not a candidate
                match frame.try_read() {
                    Ok(page) => page.is_dirty().is_none(),
                    Err(TryLockError::Poisoned(poisoned)) => {
                        poisoned.into_inner().is_dirty().is_none()
                    }
                    Err(TryLockError::WouldBlock) => false,
                }
            })
            .map(|(pid, _)| *pid)
    }
}

#[derive(Debug)]
pub struct CacheStats {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub evictions: AtomicUsize,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
        }
    }

    /// (hits, misses, evictions)
    pub fn get(&self) -> (usize, usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Percentage of lookups served from memory
    pub fn hit_rate(&self) -> f64 {
        let (hits, misses, _) = self.get();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug)]
pub struct PageCache {
    config: PageCacheConfig,
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    pages: Mutex<LruCache<PageId, Frame, NoSteal>>,
    //  pages each running transaction has accessed
    touched: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
    stats: CacheStats,
}

impl PageCache {
    pub fn new(config: PageCacheConfig, catalog: Arc<Catalog>) -> Self {
        Self {
            config,
            catalog,
            lock_manager: LockManager::new(),
            pages: Mutex::new(LruCache::with_policy(config.capacity, NoSteal)),
            touched: Mutex::new(HashMap::new()),
            stats: CacheStats::new(),
        }
    }

    /// Lock `pid` for `tid` with `perm` and return the page, reading it from disk on a miss.
    ///
    /// Fails with [`DbError::LockTimeout`] when the lock cannot be obtained within the retry
    /// budget, and with [`DbError::EvictionExhausted`] when the page must be loaded but every
    /// cached page is dirty or pinned. Either way the caller should abort the transaction.
    pub fn get_page(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> Result<PageRef> {
        self.acquire_lock(tid, pid, perm)?;
        let frame = self.fetch(tid, pid)?;
        self.touch(tid, pid);
        Ok(PageRef { frame, pid, perm })
    }

    fn acquire_lock(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> Result<()> {
        let retry = self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut rng = rand::rng();
        for attempt in 1..=attempts {
            let deadline = Instant::now() + retry.backoff(&mut rng);
            //  a release wakes us early, but an attempt only ends at its deadline
            loop {
                if self.lock_manager.grant_lock(tid, pid, perm) {
                    return Ok(());
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                self.lock_manager.wait_for_release(deadline - now);
            }
            debug!(attempt, %pid, tid = tid.as_u64(), ?perm, "lock unavailable");
        }
        warn!(%pid, tid = tid.as_u64(), ?perm, attempts, "lock timeout; transaction must abort");
        Err(DbError::LockTimeout { tid, pid, attempts })
    }

    fn fetch(&self, tid: TransactionId, pid: PageId) -> Result<Frame> {
        let mut pages = lock_with_recovery(&self.pages, "page_cache");
        if let Some(frame) = pages.get(&pid) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!(%pid, tid = tid.as_u64(), "cache hit");
            return Ok(Arc::clone(frame));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        trace!(%pid, tid = tid.as_u64(), "cache miss");

        let page = self.catalog.lookup(pid.table_id)?.read_page(pid)?;
        let frame = Arc::new(RwLock::new(page));
        match pages.put(pid, Arc::clone(&frame)) {
            Ok(Some((victim, _))) => {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(%victim, "evicted page");
            }
            Ok(None) => {}
            Err(full) => {
                warn!(capacity = full.capacity, %pid, "every cached page is dirty or pinned");
                return Err(full.into());
            }
        }
        Ok(frame)
    }

    fn touch(&self, tid: TransactionId, pid: PageId) {
        lock_with_recovery(&self.touched, "touched_pages")
            .entry(tid)
            .or_default()
            .insert(pid);
    }

    fn cached_frame(&self, pid: PageId) -> Option<Frame> {
        lock_with_recovery(&self.pages, "page_cache")
            .peek(&pid)
            .map(Arc::clone)
    }

    /// Release the lock `tid` holds on `pid` before the transaction ends.
    ///
    /// This breaks two-phase locking; only use it for pages the transaction has not modified.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release_lock(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }

    /// Insert `tuple` into table `table_id` on behalf of `tid`. The modified page stays in the
    /// cache, dirty, until the transaction completes.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: TableId, tuple: Tuple) -> Result<()> {
        let file = self.catalog.lookup(table_id)?;
        let modified = file.insert_tuple(tid, tuple, self)?;
        self.mark_modified(tid, &modified)
    }

    /// Delete `tuple`, located by its record id, on behalf of `tid`
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(DbError::MissingRecordId)?;
        let file = self.catalog.lookup(rid.page_id.table_id)?;
        let modified = file.delete_tuple(tid, tuple, self)?;
        self.mark_modified(tid, &[modified])
    }

    fn mark_modified(&self, tid: TransactionId, modified: &[PageId]) -> Result<()> {
        for &pid in modified {
            let frame = self.cached_frame(pid).ok_or_else(|| {
                DbError::illegal_state(format!("modified page {pid} is not cached"))
            })?;
            write_with_recovery(&frame, "page").mark_dirty(true, Some(tid));
            self.touch(tid, pid);
        }
        Ok(())
    }

    /// Commit or abort `tid`.
    ///
    /// Committing writes every page `tid` dirtied to disk, aborting restores those pages from
    /// disk. Either way all of `tid`'s locks are released afterwards. If a commit flush fails the
    /// error is returned and nothing is released, so the caller can retry the commit or abort.
    /// If reverting a page fails the page is discarded from the cache, the remaining pages are
    /// still reverted, locks are released and the first error is returned.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let touched = self.touched_pages(tid);
        let result = if commit {
            self.flush_pages(tid)?;
            Ok(())
        } else {
            self.revert_pages(tid, &touched)
        };

        lock_with_recovery(&self.touched, "touched_pages").remove(&tid);
        self.lock_manager.release_all_pages(tid);
        debug!(tid = tid.as_u64(), commit, pages = touched.len(), "transaction complete");
        result
    }

    fn revert_pages(&self, tid: TransactionId, touched: &HashSet<PageId>) -> Result<()> {
        let mut first_error = None;
        for &pid in touched {
            let Some(frame) = self.cached_frame(pid) else {
                continue;
            };
            let mut page = write_with_recovery(&frame, "page");
            if page.is_dirty() != Some(tid) {
                continue;
            }
            let reloaded = self
                .catalog
                .lookup(pid.table_id)
                .and_then(|file| file.read_page(pid));
            match reloaded {
                Ok(clean) => *page = clean,
                Err(e) => {
                    drop(page);
                    warn!(%pid, tid = tid.as_u64(), error = %e, "revert failed; discarding page");
                    self.discard_page(pid);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Write every page `tid` dirtied to disk and mark them clean
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        for pid in self.touched_pages(tid) {
            if let Some(frame) = self.cached_frame(pid) {
                self.flush_frame(&frame, Some(tid))?;
            }
        }
        Ok(())
    }

    /// Write `pid` to disk if it is cached and dirty, whoever dirtied it
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        match self.cached_frame(pid) {
            Some(frame) => self.flush_frame(&frame, None),
            None => Ok(()),
        }
    }

    /// Write every dirty cached page to disk
    pub fn flush_all_pages(&self) -> Result<()> {
        let frames: Vec<Frame> = lock_with_recovery(&self.pages, "page_cache")
            .iter()
            .map(|(_, frame)| Arc::clone(frame))
            .collect();
        for frame in &frames {
            self.flush_frame(frame, None)?;
        }
        Ok(())
    }

    /// Flush `frame` if it is dirty, and only if `owner` dirtied it when an owner is given
    fn flush_frame(&self, frame: &Frame, owner: Option<TransactionId>) -> Result<()> {
        let mut page = write_with_recovery(frame, "page");
        let Some(dirtied_by) = page.is_dirty() else {
            return Ok(());
        };
        if owner.is_some_and(|tid| tid != dirtied_by) {
            return Ok(());
        }
        let pid = page.id();
        self.catalog.lookup(pid.table_id)?.write_page(&page)?;
        page.mark_dirty(false, None);
        debug!(%pid, tid = dirtied_by.as_u64(), "flushed page");
        Ok(())
    }

    /// Drop `pid` from the cache without writing it, dirty or not
    pub fn discard_page(&self, pid: PageId) {
        let removed = lock_with_recovery(&self.pages, "page_cache").remove(&pid);
        if removed.is_some() {
            debug!(%pid, "discarded page");
        }
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Number of pages currently cached
    pub fn len(&self) -> usize {
        lock_with_recovery(&self.pages, "page_cache").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cached(&self, pid: PageId) -> bool {
        lock_with_recovery(&self.pages, "page_cache").contains_key(&pid)
    }

    /// Pages `tid` has accessed since it began
    pub fn touched_pages(&self, tid: TransactionId) -> HashSet<PageId> {
        lock_with_recovery(&self.touched, "touched_pages")
            .get(&tid)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod page_cache_tests {
    use std::sync::Arc;

    use crate::{
        test_utils::{create_table, int_desc, int_tuple, test_db, TestDir},
        Database, DbError, DbIterator, Field, HeapFile, PageId, Permissions, TransactionId,
    };

    /// A table with `num_pages` empty pages already on disk
    fn table_with_pages(db: &Database, dir: &TestDir, num_pages: u32) -> Arc<HeapFile> {
        let table = create_table(db, dir, "t", int_desc(1)).unwrap();
        for _ in 0..num_pages {
            table.allocate_page().unwrap();
        }
        table
    }

    fn dirty(db: &Database, tid: TransactionId, pid: PageId, value: i32) {
        let page = db
            .page_cache()
            .get_page(tid, pid, Permissions::ReadWrite)
            .unwrap();
        let mut guard = page.write().unwrap();
        let desc = Arc::clone(guard.desc());
        guard.insert_tuple(int_tuple(&desc, value)).unwrap();
        guard.mark_dirty(true, Some(tid));
    }

    #[test]
    fn test_no_steal_eviction_scenario() {
        let (db, dir) = test_db(2);
        let table = table_with_pages(&db, &dir, 4);
        let [a, b, c, d] = [0, 1, 2, 3].map(|n| PageId::new(table.id(), n));
        let cache = db.page_cache();
        let tx = db.begin();

        cache.get_page(tx.id(), a, Permissions::ReadOnly).unwrap();
        dirty(&db, tx.id(), b, 1);

        cache.get_page(tx.id(), c, Permissions::ReadOnly).unwrap();
        assert!(!cache.is_cached(a));
        assert!(cache.is_cached(b));
        assert!(cache.is_cached(c));
        assert_eq!(cache.len(), 2);

        dirty(&db, tx.id(), c, 2);
        let result = cache.get_page(tx.id(), d, Permissions::ReadOnly);
        assert!(matches!(result, Err(DbError::EvictionExhausted { capacity: 2 })));
        assert!(result.unwrap_err().is_abort());
        assert_eq!(cache.len(), 2);

        tx.abort().unwrap();
        //  the dirty pages never reached disk
        assert_eq!(table.read_page(b).unwrap().num_empty_slots(), 992);
        assert_eq!(table.read_page(c).unwrap().num_empty_slots(), 992);
    }

    #[test]
    fn test_pinned_pages_are_not_evicted() {
        let (db, dir) = test_db(2);
        let table = table_with_pages(&db, &dir, 3);
        let cache = db.page_cache();
        let tx = db.begin();

        let pinned = cache
            .get_page(tx.id(), PageId::new(table.id(), 0), Permissions::ReadOnly)
            .unwrap();
        cache
            .get_page(tx.id(), PageId::new(table.id(), 1), Permissions::ReadOnly)
            .unwrap();
        cache
            .get_page(tx.id(), PageId::new(table.id(), 2), Permissions::ReadOnly)
            .unwrap();

        assert!(cache.is_cached(pinned.id()));
        assert!(!cache.is_cached(PageId::new(table.id(), 1)));
        drop(pinned);
        tx.commit().unwrap();
    }

    #[test]
    fn test_cache_never_exceeds_capacity() {
        let (db, dir) = test_db(3);
        let table = table_with_pages(&db, &dir, 10);
        let cache = db.page_cache();
        let tx = db.begin();
        for n in 0..10 {
            cache
                .get_page(tx.id(), PageId::new(table.id(), n), Permissions::ReadOnly)
                .unwrap();
            assert!(cache.len() <= 3);
        }
        let (hits, misses, evictions) = cache.stats().get();
        assert_eq!((hits, misses, evictions), (0, 10, 7));

        cache
            .get_page(tx.id(), PageId::new(table.id(), 9), Permissions::ReadOnly)
            .unwrap();
        assert_eq!(cache.stats().get().0, 1);
        assert!(cache.stats().hit_rate() > 0.0);
        tx.commit().unwrap();
    }

    #[test]
    fn test_lock_timeout_leaves_no_lock_behind() {
        let (db, dir) = test_db(4);
        let table = table_with_pages(&db, &dir, 1);
        let pid = PageId::new(table.id(), 0);
        let cache = db.page_cache();
        let t1 = db.begin();
        let t2 = db.begin();

        cache.get_page(t1.id(), pid, Permissions::ReadWrite).unwrap();
        let result = cache.get_page(t2.id(), pid, Permissions::ReadOnly);
        match result {
            Err(DbError::LockTimeout { tid, pid: locked, attempts }) => {
                assert_eq!(tid, t2.id());
                assert_eq!(locked, pid);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected lock timeout, got {other:?}"),
        }
        assert!(!cache.holds_lock(t2.id(), pid));
        assert!(cache.touched_pages(t2.id()).is_empty());

        t1.commit().unwrap();
        cache.get_page(t2.id(), pid, Permissions::ReadOnly).unwrap();
        assert!(cache.holds_lock(t2.id(), pid));
        t2.commit().unwrap();
    }

    #[test]
    fn test_upgrade_waits_for_other_reader() {
        let (db, dir) = test_db(4);
        let table = table_with_pages(&db, &dir, 1);
        let pid = PageId::new(table.id(), 0);
        let cache = db.page_cache();
        let t1 = db.begin();
        let t2 = db.begin();

        cache.get_page(t1.id(), pid, Permissions::ReadOnly).unwrap();
        cache.get_page(t2.id(), pid, Permissions::ReadOnly).unwrap();
        assert!(matches!(
            cache.get_page(t1.id(), pid, Permissions::ReadWrite),
            Err(DbError::LockTimeout { .. })
        ));
        //  the failed upgrade keeps the shared lock
        assert!(cache.holds_lock(t1.id(), pid));

        cache.release_page(t2.id(), pid);
        cache.get_page(t1.id(), pid, Permissions::ReadWrite).unwrap();
        assert_eq!(cache.lock_manager().exclusive_holder(pid), Some(t1.id()));
        t1.commit().unwrap();
        t2.commit().unwrap();
    }

    #[test]
    fn test_read_only_handle_cannot_write() {
        let (db, dir) = test_db(4);
        let table = table_with_pages(&db, &dir, 1);
        let tx = db.begin();
        let page = tx
            .get_page(PageId::new(table.id(), 0), Permissions::ReadOnly)
            .unwrap();
        assert!(matches!(page.write(), Err(DbError::IllegalState(_))));
        assert_eq!(page.permissions(), Permissions::ReadOnly);
        drop(page);
        tx.commit().unwrap();
    }

    #[test]
    fn test_commit_writes_page_bytes() {
        let (db, dir) = test_db(4);
        let desc = int_desc(1);
        let table = create_table(&db, &dir, "t", Arc::clone(&desc)).unwrap();
        let pid = PageId::new(table.id(), 0);
        let tx = db.begin();
        for value in 0..10 {
            tx.insert_tuple(table.id(), int_tuple(&desc, value)).unwrap();
        }
        let in_memory = tx
            .get_page(pid, Permissions::ReadOnly)
            .unwrap()
            .read()
            .to_bytes();
        assert_ne!(table.read_page(pid).unwrap().to_bytes(), in_memory);

        let tid = tx.id();
        tx.commit().unwrap();
        assert_eq!(table.read_page(pid).unwrap().to_bytes(), in_memory);
        assert!(db.page_cache().touched_pages(tid).is_empty());
        assert!(db.page_cache().lock_manager().pages_locked_by(tid).is_empty());
        let cached = db
            .page_cache()
            .get_page(db.begin_id(), pid, Permissions::ReadOnly)
            .unwrap();
        assert_eq!(cached.read().is_dirty(), None);
    }

    #[test]
    fn test_abort_restores_disk_image() {
        let (db, dir) = test_db(4);
        let desc = int_desc(1);
        let table = create_table(&db, &dir, "t", Arc::clone(&desc)).unwrap();
        let pid = PageId::new(table.id(), 0);

        let tx = db.begin();
        tx.insert_tuple(table.id(), int_tuple(&desc, 1)).unwrap();
        tx.commit().unwrap();
        let committed = table.read_page(pid).unwrap().to_bytes();

        let tx = db.begin();
        let tid = tx.id();
        tx.insert_tuple(table.id(), int_tuple(&desc, 2)).unwrap();
        tx.abort().unwrap();

        assert_eq!(table.read_page(pid).unwrap().to_bytes(), committed);
        assert!(db.page_cache().touched_pages(tid).is_empty());
        assert!(!db.page_cache().lock_manager().is_locked(pid));

        //  the cached copy was reverted too
        let tx = db.begin();
        let mut scan = table.iterator(tx.id(), Arc::clone(db.page_cache()));
        scan.open().unwrap();
        let tuples = scan.collect_remaining().unwrap();
        scan.close();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].field(0), Some(&Field::Int(1)));
        tx.commit().unwrap();
    }

    #[test]
    fn test_failed_commit_keeps_locks_and_dirty_pages() {
        let (db, dir) = test_db(4);
        let desc = int_desc(1);
        let table = create_table(&db, &dir, "t", Arc::clone(&desc)).unwrap();
        let pid = PageId::new(table.id(), 0);
        let tx = db.begin();
        let tid = tx.id();
        tx.insert_tuple(table.id(), int_tuple(&desc, 9)).unwrap();

        //  same path, same id: the entry is replaced by a handle that cannot write
        let read_only = HeapFile::open_read_only(table.path(), Arc::clone(&desc)).unwrap();
        db.catalog().add_table(read_only, "t");

        let tx = match tx.commit() {
            Err((tx, DbError::Io(_))) => tx,
            other => panic!("expected an io error, got {other:?}"),
        };
        let cache = db.page_cache();
        assert!(cache.is_cached(pid));
        assert!(cache.lock_manager().pages_locked_by(tid).contains(&pid));
        assert_eq!(cache.lock_manager().exclusive_holder(pid), Some(tid));
        assert!(cache.touched_pages(tid).contains(&pid));
        let page = tx.get_page(pid, Permissions::ReadOnly).unwrap();
        assert_eq!(page.read().is_dirty(), Some(tid));
        drop(page);
        assert_eq!(table.read_page(pid).unwrap().iter().count(), 0);

        let writable = HeapFile::open(table.path(), Arc::clone(&desc)).unwrap();
        db.catalog().add_table(writable, "t");
        tx.commit().unwrap();
        assert_eq!(table.read_page(pid).unwrap().iter().count(), 1);
        assert!(cache.lock_manager().pages_locked_by(tid).is_empty());
        assert!(cache.touched_pages(tid).is_empty());
    }

    #[test]
    fn test_failed_revert_discards_page_and_releases_locks() {
        let (db, dir) = test_db(4);
        let desc = int_desc(1);
        let lost = create_table(&db, &dir, "lost", Arc::clone(&desc)).unwrap();
        let kept = create_table(&db, &dir, "kept", Arc::clone(&desc)).unwrap();
        let lost_pid = PageId::new(lost.id(), 0);
        let kept_pid = PageId::new(kept.id(), 0);

        let tx = db.begin();
        let tid = tx.id();
        tx.insert_tuple(lost.id(), int_tuple(&desc, 1)).unwrap();
        tx.insert_tuple(kept.id(), int_tuple(&desc, 2)).unwrap();

        //  the page the abort must reload is gone from disk
        std::fs::OpenOptions::new()
            .write(true)
            .open(lost.path())
            .unwrap()
            .set_len(0)
            .unwrap();

        let result = tx.abort();
        assert!(matches!(result, Err(DbError::PageOutOfRange { .. })));

        let cache = db.page_cache();
        assert!(!cache.is_cached(lost_pid));
        assert!(cache.lock_manager().pages_locked_by(tid).is_empty());
        assert!(!cache.lock_manager().is_locked(lost_pid));
        assert!(!cache.lock_manager().is_locked(kept_pid));
        assert!(cache.touched_pages(tid).is_empty());

        //  the other page was still reverted
        let page = cache
            .get_page(db.begin_id(), kept_pid, Permissions::ReadOnly)
            .unwrap();
        assert_eq!(page.read().is_dirty(), None);
        assert_eq!(page.read().iter().count(), 0);
    }

    #[test]
    fn test_dropped_transaction_is_aborted() {
        let (db, dir) = test_db(4);
        let desc = int_desc(1);
        let table = create_table(&db, &dir, "t", Arc::clone(&desc)).unwrap();
        let pid = PageId::new(table.id(), 0);
        {
            let tx = db.begin();
            tx.insert_tuple(table.id(), int_tuple(&desc, 5)).unwrap();
        }
        assert!(!db.page_cache().lock_manager().is_locked(pid));
        assert_eq!(table.read_page(pid).unwrap().iter().count(), 0);
        let page = db
            .page_cache()
            .get_page(db.begin_id(), pid, Permissions::ReadOnly)
            .unwrap();
        assert_eq!(page.read().iter().count(), 0);
    }

    #[test]
    fn test_flush_page_and_discard() {
        let (db, dir) = test_db(4);
        let table = table_with_pages(&db, &dir, 1);
        let pid = PageId::new(table.id(), 0);
        let tx = db.begin();
        dirty(&db, tx.id(), pid, 9);

        db.page_cache().flush_page(pid).unwrap();
        assert_eq!(table.read_page(pid).unwrap().iter().count(), 1);
        let page = tx.get_page(pid, Permissions::ReadOnly).unwrap();
        assert_eq!(page.read().is_dirty(), None);
        drop(page);

        db.page_cache().discard_page(pid);
        assert!(!db.page_cache().is_cached(pid));
        //  the lock survives a discard
        assert!(db.page_cache().holds_lock(tx.id(), pid));
        tx.commit().unwrap();
    }

    #[test]
    fn test_flush_all_pages() {
        let (db, dir) = test_db(4);
        let table = table_with_pages(&db, &dir, 2);
        let t1 = db.begin();
        let t2 = db.begin();
        dirty(&db, t1.id(), PageId::new(table.id(), 0), 1);
        dirty(&db, t2.id(), PageId::new(table.id(), 1), 2);

        db.page_cache().flush_all_pages().unwrap();
        assert_eq!(table.read_page(PageId::new(table.id(), 0)).unwrap().iter().count(), 1);
        assert_eq!(table.read_page(PageId::new(table.id(), 1)).unwrap().iter().count(), 1);
        t1.commit().unwrap();
        t2.commit().unwrap();
    }

    #[test]
    fn test_flush_pages_skips_pages_dirtied_by_others() {
        let (db, dir) = test_db(4);
        let table = table_with_pages(&db, &dir, 2);
        let t1 = db.begin();
        let t2 = db.begin();
        let shared = PageId::new(table.id(), 0);

        //  t1 reads page 0 and gives its lock back early, t2 then dirties it
        t1.get_page(shared, Permissions::ReadOnly).unwrap();
        db.page_cache().release_page(t1.id(), shared);
        dirty(&db, t2.id(), shared, 4);

        db.page_cache().flush_pages(t1.id()).unwrap();
        assert_eq!(table.read_page(shared).unwrap().iter().count(), 0);
        t2.abort().unwrap();
        t1.commit().unwrap();
    }

    #[test]
    fn test_unknown_table() {
        let (db, _dir) = test_db(4);
        let tx = db.begin();
        let result = tx.get_page(PageId::new(7, 0), Permissions::ReadOnly);
        assert!(matches!(result, Err(DbError::NoSuchTable { table_id: 7 })));
        tx.abort().unwrap();
    }
}
