//! The paged heap file: an unordered collection of tuples stored on fixed-size pages.
//!
//! Page `n` of a file lives at byte offset `n * PAGE_SIZE`. Page reads and writes go straight to
//! disk; everything that touches tuples goes through the [`PageCache`] so it is locked.

use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::debug;

use crate::{
    error::{DbError, Result},
    sync::lock_with_recovery,
    DbIterator, HeapPage, PageCache, PageId, Permissions, TableId, TransactionId, Tuple,
    TupleDesc, PAGE_SIZE,
};

/// Derive a table id from a path. FNV-1a keeps it stable across runs and builds.
fn table_id_for(path: &Path) -> TableId {
    let mut h = 0xcbf29ce484222325u64;
    for &byte in path.to_string_lossy().as_bytes() {
        h ^= byte as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    ((h >> 32) ^ h) as TableId
}

#[derive(Debug)]
pub struct HeapFile {
    path: PathBuf,
    id: TableId,
    desc: Arc<TupleDesc>,
    file: Mutex<File>,
}

impl HeapFile {
    /// Open the heap file at `path`, creating an empty one if it does not exist
    pub fn open<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        Self::from_file(path.as_ref(), file, desc)
    }

    /// Open an existing file without write access. Any page write through it fails with
    /// [`DbError::Io`]. The table id is the same as for [`HeapFile::open`] on the same path.
    pub fn open_read_only<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path.as_ref())?;
        Self::from_file(path.as_ref(), file, desc)
    }

    fn from_file(path: &Path, file: File, desc: Arc<TupleDesc>) -> Result<Self> {
        let path = path.canonicalize()?;
        let id = table_id_for(&path);
        Ok(Self {
            path,
            id,
            desc,
            file: Mutex::new(file),
        })
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Number of pages in the file, counting a trailing partial page
    pub fn num_pages(&self) -> Result<u32> {
        let file = lock_with_recovery(&self.file, "heap_file");
        Self::num_pages_locked(&file)
    }

    fn num_pages_locked(file: &File) -> Result<u32> {
        let len = file.metadata()?.len();
        Ok(len.div_ceil(PAGE_SIZE as u64) as u32)
    }

    /// Read one page from disk
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        self.check_owned(pid)?;
        let mut bytes = HeapPage::create_empty_page_data();
        {
            let mut file = lock_with_recovery(&self.file, "heap_file");
            let len = file.metadata()?.len();
            if pid.offset() >= len {
                return Err(DbError::PageOutOfRange {
                    pid,
                    num_pages: Self::num_pages_locked(&file)?,
                });
            }
            //  a trailing partial page reads as zero-padded
            let available = (len - pid.offset()).min(PAGE_SIZE as u64) as usize;
            file.seek(SeekFrom::Start(pid.offset()))?;
            file.read_exact(&mut bytes[..available])?;
        }
        HeapPage::from_bytes(pid, Arc::clone(&self.desc), &bytes)
    }

    /// Write a full page-sized block at the page's offset
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let pid = page.id();
        self.check_owned(pid)?;
        let bytes = page.to_bytes();
        let mut file = lock_with_recovery(&self.file, "heap_file");
        file.seek(SeekFrom::Start(pid.offset()))?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        Ok(())
    }

    /// Append an empty page to the end of the file and return its id
    pub(crate) fn allocate_page(&self) -> Result<PageId> {
        let mut file = lock_with_recovery(&self.file, "heap_file");
        let pid = PageId::new(self.id, Self::num_pages_locked(&file)?);
        file.seek(SeekFrom::Start(pid.offset()))?;
        file.write_all(&HeapPage::create_empty_page_data())?;
        file.sync_data()?;
        debug!(table_id = self.id, page_no = pid.page_no, "heap file grew");
        Ok(pid)
    }

    /// Store `tuple` in the lowest-numbered page with a free slot, growing the file by one
    /// page if every page is full. Returns the pages modified.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        tuple: Tuple,
        page_cache: &PageCache,
    ) -> Result<Vec<PageId>> {
        if **tuple.desc() != *self.desc {
            return Err(DbError::SchemaMismatch {
                detail: format!("tuple ({}) does not match table ({})", tuple.desc(), self.desc),
            });
        }

        let num_pages = self.num_pages()?;
        for page_no in 0..num_pages {
            let pid = PageId::new(self.id, page_no);
            let held_before = page_cache.holds_lock(tid, pid);
            let has_room = page_cache
                .get_page(tid, pid, Permissions::ReadOnly)?
                .read()
                .num_empty_slots()
                > 0;
            if has_room {
                let page = page_cache.get_page(tid, pid, Permissions::ReadWrite)?;
                let mut page_guard = page.write()?;
                //  another transaction may have filled it before the upgrade went through
                if page_guard.num_empty_slots() > 0 {
                    page_guard.insert_tuple(tuple)?;
                    page_guard.mark_dirty(true, Some(tid));
                    return Ok(vec![pid]);
                }
            }
            if !held_before {
                page_cache.release_page(tid, pid);
            }
        }

        let pid = self.allocate_page()?;
        let page = page_cache.get_page(tid, pid, Permissions::ReadWrite)?;
        let mut page_guard = page.write()?;
        page_guard.insert_tuple(tuple)?;
        page_guard.mark_dirty(true, Some(tid));
        Ok(vec![pid])
    }

    /// Free the slot `tuple` occupies. Returns the page modified.
    pub fn delete_tuple(
        &self,
        tid: TransactionId,
        tuple: &Tuple,
        page_cache: &PageCache,
    ) -> Result<PageId> {
        let rid = tuple.record_id().ok_or(DbError::MissingRecordId)?;
        self.check_owned(rid.page_id)?;
        let page = page_cache.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        let mut page_guard = page.write()?;
        page_guard.delete_tuple(tuple)?;
        page_guard.mark_dirty(true, Some(tid));
        Ok(rid.page_id)
    }

    /// A lazy scan over every tuple in page order, then slot order
    pub fn iterator(
        self: &Arc<Self>,
        tid: TransactionId,
        page_cache: Arc<PageCache>,
    ) -> HeapFileIterator {
        HeapFileIterator {
            file: Arc::clone(self),
            page_cache,
            tid,
            scan: None,
        }
    }

    fn check_owned(&self, pid: PageId) -> Result<()> {
        if pid.table_id != self.id {
            return Err(DbError::illegal_state(format!(
                "page {pid} does not belong to table {}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Position of an open [`HeapFileIterator`]
#[derive(Debug)]
struct ScanState {
    num_pages: u32,
    page_no: u32,
    //  the page whose tuples are buffered and whether this scan took its lock
    current: Option<(PageId, bool)>,
    tuples: VecDeque<Tuple>,
}

/// Scans a [`HeapFile`] one page at a time under shared locks.
///
/// The page count is fixed when the iterator is opened. Moving to the next page releases the
/// lock on the previous one unless the transaction already held it before the scan or has since
/// taken it exclusively. A page that fails to load is retried by the next `has_next`.
#[derive(Debug)]
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    page_cache: Arc<PageCache>,
    tid: TransactionId,
    scan: Option<ScanState>,
}

impl HeapFileIterator {
    /// Buffer the tuples of `page_no`. The scan position only moves once the page is loaded.
    fn load_page(&self, scan: &mut ScanState, page_no: u32) -> Result<()> {
        let pid = PageId::new(self.file.id(), page_no);
        let held_before = self.page_cache.holds_lock(self.tid, pid);
        let page = self
            .page_cache
            .get_page(self.tid, pid, Permissions::ReadOnly)?;
        scan.tuples = page.read().iter().cloned().collect();
        scan.current = Some((pid, !held_before));
        scan.page_no = page_no;
        Ok(())
    }

    /// Give back the shared lock this scan took on the current page. A lock the transaction
    /// upgraded to exclusive meanwhile is kept until the transaction ends.
    fn release_current(&self, scan: &mut ScanState) {
        if let Some((pid, acquired)) = scan.current.take() {
            let upgraded = self.page_cache.lock_manager().exclusive_holder(pid) == Some(self.tid);
            if acquired && !upgraded {
                self.page_cache.release_page(self.tid, pid);
            }
        }
    }
}

impl DbIterator for HeapFileIterator {
    fn open(&mut self) -> Result<()> {
        self.close();
        let mut scan = ScanState {
            num_pages: self.file.num_pages()?,
            page_no: 0,
            current: None,
            tuples: VecDeque::new(),
        };
        if scan.num_pages > 0 {
            self.load_page(&mut scan, 0)?;
        }
        self.scan = Some(scan);
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        let mut scan = self
            .scan
            .take()
            .ok_or_else(|| DbError::illegal_state("iterator is not open"))?;
        let result = loop {
            if !scan.tuples.is_empty() {
                break Ok(true);
            }
            if scan.page_no + 1 >= scan.num_pages {
                break Ok(false);
            }
            self.release_current(&mut scan);
            let next_page = scan.page_no + 1;
            if let Err(e) = self.load_page(&mut scan, next_page) {
                break Err(e);
            }
        };
        self.scan = Some(scan);
        result
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(DbError::illegal_state("no more tuples"));
        }
        self.scan
            .as_mut()
            .and_then(|scan| scan.tuples.pop_front())
            .ok_or_else(|| DbError::illegal_state("iterator is not open"))
    }

    fn close(&mut self) {
        if let Some(mut scan) = self.scan.take() {
            self.release_current(&mut scan);
        }
    }
}

impl Drop for HeapFileIterator {
    fn drop(&mut self) {
        self.close();
    }
}
