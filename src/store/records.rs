//! Record store: per-record file I/O with table-level locking
//!
//! A record is any JSON value, stored as one file under
//! `dbs/<db>/<table>/r/<encoded-id>`. Every filesystem transition for a
//! table happens under that table's mutex (created lazily, guarded by the
//! table-map mutex), so readers never observe a half-written file. Index
//! maintenance runs after the table mutex is released; indexes carry their
//! own locks.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use crate::common::cache::ValueCache;
use crate::common::error::{Error, Result};
use crate::common::fskey;
use crate::store::catalog::{Catalog, DatabaseSpec, TableSpec};
use crate::store::index::IndexRegistry;

pub struct RecordStore {
    catalog: Arc<Catalog>,
    cache: Arc<ValueCache>,
    indexes: IndexRegistry,
    table_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl RecordStore {
    pub fn new(catalog: Arc<Catalog>, cache: Arc<ValueCache>) -> Self {
        let indexes = IndexRegistry::new(catalog.base());
        Self {
            catalog,
            cache,
            indexes,
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Find or create the mutex for `(db, table)`. The table-map lock is
    /// held only for the lookup, never during I/O.
    fn table_lock(&self, db: &str, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock().expect("table map lock poisoned");
        locks
            .entry((db.to_string(), table.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // === Record operations ===

    pub fn get(&self, db: &str, table: &str, item: &str) -> Result<Value> {
        if self.catalog.table(db, table).is_none() {
            return Err(Error::table_not_found(table));
        }

        let cache_key = ValueCache::record_key(db, table, item);
        if let Some(bytes) = self.cache.get(&cache_key) {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let lock = self.table_lock(db, table);
        let _guard = lock.lock().expect("table lock poisoned");

        let path = self.catalog.records_dir(db, table).join(fskey::encode(item));
        if !path.exists() {
            return Err(Error::record_not_found());
        }
        let data = fs::read(&path)?;
        let value: Value = serde_json::from_slice(&data)?;
        self.cache.set(&cache_key, data);
        Ok(value)
    }

    /// Strict insert: fails when the record already exists. The value is
    /// not cached here; the next `get` will populate the cache from disk.
    pub fn insert(&self, db: &str, table: &str, key: &str, value: &Value) -> Result<()> {
        let spec = self
            .catalog
            .table(db, table)
            .ok_or_else(|| Error::table_not_found(table))?;

        match self.get(db, table, key) {
            Ok(_) => return Err(Error::record_exists(key)),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        {
            let lock = self.table_lock(db, table);
            let _guard = lock.lock().expect("table lock poisoned");
            let path = self.catalog.records_dir(db, table).join(fskey::encode(key));
            fs::write(&path, serde_json::to_vec(value)?)?;
        }

        // Index maintenance happens outside the table mutex; only indexes
        // whose every key is present on the record apply.
        if let Some(fields) = value.as_object() {
            for index in &spec.indexes {
                if let Some(canonical) = canonical_index_key(fields, &index.keys)? {
                    self.indexes
                        .insert(db, table, &index.name, &canonical, key)?;
                }
            }
        }

        Ok(())
    }

    pub fn delete_record(&self, db: &str, table: &str, item: &str) -> Result<()> {
        // Fetch first: the record's fields drive index cleanup.
        let value = self.get(db, table, item)?;

        {
            let lock = self.table_lock(db, table);
            let _guard = lock.lock().expect("table lock poisoned");
            let path = self.catalog.records_dir(db, table).join(fskey::encode(item));
            fs::remove_file(&path)?;
        }

        self.cache.delete(&ValueCache::record_key(db, table, item));

        if let Some(fields) = value.as_object() {
            if let Some(spec) = self.catalog.table(db, table) {
                for index in &spec.indexes {
                    if canonical_index_key(fields, &index.keys)?.is_some() {
                        self.indexes.delete_item(db, table, &index.name, item)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Decoded ids of every record in the table.
    pub fn table_keys(&self, db: &str, table: &str) -> Result<Vec<String>> {
        if self.catalog.table(db, table).is_none() {
            return Err(Error::table_not_found(table));
        }

        let lock = self.table_lock(db, table);
        let _guard = lock.lock().expect("table lock poisoned");

        let mut keys = Vec::new();
        for entry in fs::read_dir(self.catalog.records_dir(db, table))? {
            let entry = entry?;
            let name = entry.file_name();
            let encoded = name.to_string_lossy();
            keys.push(fskey::decode(&encoded)?);
        }
        Ok(keys)
    }

    /// Equality lookup on an index: record ids whose indexed fields equal
    /// `values` (in the index's declared key order).
    pub fn find_by_index(
        &self,
        db: &str,
        table: &str,
        index: &str,
        values: &[Value],
    ) -> Result<Vec<String>> {
        let spec = self
            .catalog
            .table(db, table)
            .ok_or_else(|| Error::table_not_found(table))?;
        if !spec.indexes.iter().any(|i| i.name == index) {
            return Err(Error::index_not_found(index));
        }
        let canonical = serde_json::to_string(values)?;
        self.indexes.lookup(db, table, index, &canonical)
    }

    // === Catalog passthroughs and DDL that touches runtime state ===

    pub fn database(&self, name: &str) -> Option<DatabaseSpec> {
        self.catalog.database(name)
    }

    pub fn table(&self, db: &str, table: &str) -> Option<TableSpec> {
        self.catalog.table(db, table)
    }

    pub fn databases(&self) -> Vec<DatabaseSpec> {
        self.catalog.databases()
    }

    pub fn create_database(&self, name: &str) -> Result<()> {
        self.catalog.create_database(name)
    }

    pub fn create_table(&self, db: &str, table: &str) -> Result<()> {
        self.catalog.create_table(db, table)
    }

    pub fn create_index(&self, db: &str, table: &str, index: &str, keys: &[String]) -> Result<()> {
        self.catalog.create_index(db, table, index, keys)
    }

    pub fn delete_database(&self, name: &str) -> Result<()> {
        self.catalog.delete_database(name)?;
        self.indexes.evict_database(name);
        self.cache.purge_prefix(&format!("{name}:"));
        let mut locks = self.table_locks.lock().expect("table map lock poisoned");
        locks.retain(|(db, _), _| db != name);
        Ok(())
    }

    pub fn delete_table(&self, db: &str, table: &str) -> Result<()> {
        self.catalog.delete_table(db, table)?;
        self.indexes.evict_table(db, table);
        self.cache.purge_prefix(&format!("{db}:{table}:"));
        let mut locks = self.table_locks.lock().expect("table map lock poisoned");
        locks.remove(&(db.to_string(), table.to_string()));
        Ok(())
    }

    pub fn delete_index(&self, db: &str, table: &str, index: &str) -> Result<()> {
        self.catalog.delete_index(db, table, index)?;
        self.indexes.evict_index(db, table, index);
        Ok(())
    }
}

/// The canonical index key: the JSON-array spelling of the indexed field
/// values in declared order. `None` when any indexed field is missing (a
/// JSON `null` counts as missing).
fn canonical_index_key(fields: &Map<String, Value>, keys: &[String]) -> Result<Option<String>> {
    let mut parts: Vec<&Value> = Vec::with_capacity(keys.len());
    for key in keys {
        match fields.get(key) {
            Some(v) if !v.is_null() => parts.push(v),
            _ => return Ok(None),
        }
    }
    Ok(Some(serde_json::to_string(&parts)?))
}
