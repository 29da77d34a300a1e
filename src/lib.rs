//! A paged heap-file storage engine with a no-steal page cache and strict two-phase locking.

use std::{path::Path, sync::Arc};

mod catalog;
mod config;
mod error;
mod eviction_cache;
mod heap_file;
mod iterator;
mod lock_manager;
pub mod page;
mod page_cache;
mod page_id;
mod sync;
#[cfg(test)]
mod test_utils;
mod transaction;
mod tuple;

pub use catalog::Catalog;
pub use config::{PageCacheConfig, RetryPolicy, DEFAULT_PAGES, PAGE_SIZE};
pub use error::{DbError, Result};
pub use eviction_cache::{CacheFull, EvictionPolicy, LeastRecentlyUsed, LruCache};
pub use heap_file::{HeapFile, HeapFileIterator};
pub use iterator::DbIterator;
pub use lock_manager::{LockManager, Permissions};
pub use page::HeapPage;
pub use page_cache::{CacheStats, NoSteal, PageCache, PageRef};
pub use page_id::{PageId, RecordId, TableId};
pub use transaction::{Transaction, TransactionId};
pub use tuple::{Field, FieldType, Tuple, TupleDesc, STRING_LEN};

use transaction::TxIdGenerator;

/// One independent storage instance: a catalog of heap files behind a shared page cache
#[derive(Debug)]
pub struct Database {
    catalog: Arc<Catalog>,
    page_cache: Arc<PageCache>,
    tx_ids: TxIdGenerator,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(PageCacheConfig::default())
    }
}

impl Database {
    pub fn new(config: PageCacheConfig) -> Self {
        let catalog = Arc::new(Catalog::new());
        let page_cache = Arc::new(PageCache::new(config, Arc::clone(&catalog)));
        Self {
            catalog,
            page_cache,
            tx_ids: TxIdGenerator::new(),
        }
    }

    /// Open (or create) the heap file at `path` and register it under `name`
    pub fn open_table<P: AsRef<Path>>(
        &self,
        path: P,
        desc: Arc<TupleDesc>,
        name: &str,
    ) -> Result<Arc<HeapFile>> {
        let file = HeapFile::open(path, desc)?;
        let table_id = self.catalog.add_table(file, name);
        self.catalog.lookup(table_id)
    }

    /// Start a transaction
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.begin_id(), Arc::clone(&self.page_cache))
    }

    /// Mint a transaction id without a handle, for callers that drive
    /// [`PageCache::transaction_complete`] themselves
    pub fn begin_id(&self) -> TransactionId {
        self.tx_ids.next_id()
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn page_cache(&self) -> &Arc<PageCache> {
        &self.page_cache
    }
}
