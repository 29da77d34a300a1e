use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    error::{DbError, Result},
    sync::{read_with_recovery, write_with_recovery},
    HeapFile, TableId, TupleDesc,
};

#[derive(Debug)]
struct TableEntry {
    file: Arc<HeapFile>,
    name: String,
}

/// Maps table ids to the heap files that store them
#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableId, TableEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `file` under `name`. A table already registered under the same name or the same
    /// id is replaced.
    pub fn add_table(&self, file: HeapFile, name: &str) -> TableId {
        let id = file.id();
        let mut tables = write_with_recovery(&self.tables, "catalog");
        tables.retain(|_, entry| entry.name != name);
        tables.insert(
            id,
            TableEntry {
                file: Arc::new(file),
                name: name.to_string(),
            },
        );
        id
    }

    pub fn lookup(&self, table_id: TableId) -> Result<Arc<HeapFile>> {
        read_with_recovery(&self.tables, "catalog")
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or(DbError::NoSuchTable { table_id })
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        read_with_recovery(&self.tables, "catalog")
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }

    pub fn table_name(&self, table_id: TableId) -> Option<String> {
        read_with_recovery(&self.tables, "catalog")
            .get(&table_id)
            .map(|entry| entry.name.clone())
    }

    pub fn tuple_desc(&self, table_id: TableId) -> Result<Arc<TupleDesc>> {
        Ok(Arc::clone(self.lookup(table_id)?.desc()))
    }

    /// Every registered table id, in ascending order
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = read_with_recovery(&self.tables, "catalog")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}
