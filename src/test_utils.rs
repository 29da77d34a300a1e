use std::{path::Path, sync::Arc, time::Duration};

use tempfile::TempDir;

use crate::{
    Database, Field, FieldType, HeapFile, PageCacheConfig, Result, RetryPolicy, Tuple, TupleDesc,
};

/// Scratch directory removed when dropped
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        self.dir.path()
    }
}

/// A database whose lock waits give up after three short attempts
pub fn test_db(capacity: usize) -> (Database, TestDir) {
    let config = PageCacheConfig::default()
        .with_capacity(capacity)
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1), 1));
    (Database::new(config), TestDir::new())
}

pub fn create_table(
    db: &Database,
    dir: &TestDir,
    name: &str,
    desc: Arc<TupleDesc>,
) -> Result<Arc<HeapFile>> {
    db.open_table(dir.as_ref().join(format!("{name}.dat")), desc, name)
}

pub fn int_desc(num_fields: usize) -> Arc<TupleDesc> {
    Arc::new(TupleDesc::new(&vec![FieldType::Int; num_fields]))
}

/// A tuple with every field set to `value`
pub fn int_tuple(desc: &Arc<TupleDesc>, value: i32) -> Tuple {
    let fields = vec![Field::Int(value); desc.num_fields()];
    Tuple::new(Arc::clone(desc), fields).unwrap()
}
