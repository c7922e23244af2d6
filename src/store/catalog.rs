//! Catalog of databases, tables, and secondary indexes
//!
//! The in-memory catalog is the source of truth while the process runs;
//! the `structure` file at the data root is rewritten (atomically, via a
//! temp file and rename) after every successful mutation, so the two never
//! diverge. Accessors hand out deep clones - callers can never reach into
//! live catalog state.
//!
//! Wire shape of `structure`:
//! `[{"n": db, "t": [{"n": table, "i": [{"n": index, "k": [keys]}]}]}]`

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::common::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "k")]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "i")]
    pub indexes: Vec<IndexSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "t")]
    pub tables: Vec<TableSpec>,
}

pub struct Catalog {
    base: PathBuf,
    /// Catalog slice lock: held for reads-that-copy and for the whole of
    /// every mutation, including the persist, so disk always matches memory.
    structure: Mutex<Vec<DatabaseSpec>>,
    /// Catalog-file lock: held only while writing `structure`.
    fs_lock: Mutex<()>,
}

impl Catalog {
    /// Open the catalog at `base`, creating the directory skeleton and an
    /// empty `structure` file on first boot.
    pub fn open(base: &Path) -> Result<Self> {
        fs::create_dir_all(base.join("dbs"))?;

        let catalog = Self {
            base: base.to_path_buf(),
            structure: Mutex::new(Vec::new()),
            fs_lock: Mutex::new(()),
        };

        let path = catalog.structure_path();
        if path.exists() {
            let data = fs::read(&path)?;
            let loaded: Vec<DatabaseSpec> = serde_json::from_slice(&data)?;
            *catalog.structure.lock().expect("catalog lock poisoned") = loaded;
        } else {
            catalog.save(&[])?;
        }

        Ok(catalog)
    }

    // === Path helpers ===

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn structure_path(&self) -> PathBuf {
        self.base.join("structure")
    }

    pub fn database_dir(&self, db: &str) -> PathBuf {
        self.base.join("dbs").join(db)
    }

    pub fn table_dir(&self, db: &str, table: &str) -> PathBuf {
        self.database_dir(db).join(table)
    }

    pub fn records_dir(&self, db: &str, table: &str) -> PathBuf {
        self.table_dir(db, table).join("r")
    }

    pub fn indexes_dir(&self, db: &str, table: &str) -> PathBuf {
        self.table_dir(db, table).join("i")
    }

    pub fn index_dir(&self, db: &str, table: &str, index: &str) -> PathBuf {
        self.indexes_dir(db, table).join(index)
    }

    // === Accessors (deep copies) ===

    pub fn database(&self, name: &str) -> Option<DatabaseSpec> {
        let structure = self.structure.lock().expect("catalog lock poisoned");
        structure.iter().find(|d| d.name == name).cloned()
    }

    pub fn table(&self, db: &str, table: &str) -> Option<TableSpec> {
        self.database(db)
            .and_then(|d| d.tables.into_iter().find(|t| t.name == table))
    }

    pub fn databases(&self) -> Vec<DatabaseSpec> {
        self.structure.lock().expect("catalog lock poisoned").clone()
    }

    pub fn database_names(&self) -> Vec<String> {
        let structure = self.structure.lock().expect("catalog lock poisoned");
        structure.iter().map(|d| d.name.clone()).collect()
    }

    // === Mutators ===

    pub fn create_database(&self, name: &str) -> Result<()> {
        let mut structure = self.structure.lock().expect("catalog lock poisoned");
        if structure.iter().any(|d| d.name == name) {
            return Err(Error::database_exists(name));
        }

        fs::create_dir_all(self.database_dir(name))?;
        structure.push(DatabaseSpec {
            name: name.to_string(),
            tables: Vec::new(),
        });
        self.save(&structure)
    }

    pub fn create_table(&self, db: &str, table: &str) -> Result<()> {
        let mut structure = self.structure.lock().expect("catalog lock poisoned");
        let database = structure
            .iter_mut()
            .find(|d| d.name == db)
            .ok_or_else(|| Error::database_not_found(db))?;
        if database.tables.iter().any(|t| t.name == table) {
            return Err(Error::table_exists(table));
        }

        fs::create_dir_all(self.records_dir(db, table))?;
        fs::create_dir_all(self.indexes_dir(db, table))?;
        database.tables.push(TableSpec {
            name: table.to_string(),
            indexes: Vec::new(),
        });
        self.save(&structure)
    }

    pub fn create_index(&self, db: &str, table: &str, index: &str, keys: &[String]) -> Result<()> {
        let mut structure = self.structure.lock().expect("catalog lock poisoned");
        let database = structure
            .iter_mut()
            .find(|d| d.name == db)
            .ok_or_else(|| Error::database_not_found(db))?;
        let tbl = database
            .tables
            .iter_mut()
            .find(|t| t.name == table)
            .ok_or_else(|| Error::table_not_found(table))?;
        if tbl.indexes.iter().any(|i| i.name == index) {
            return Err(Error::index_exists(index));
        }

        fs::create_dir_all(self.index_dir(db, table, index))?;
        tbl.indexes.push(IndexSpec {
            name: index.to_string(),
            keys: keys.to_vec(),
        });
        self.save(&structure)
    }

    pub fn delete_database(&self, name: &str) -> Result<()> {
        let mut structure = self.structure.lock().expect("catalog lock poisoned");
        let pos = structure
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| Error::database_not_found(name))?;

        let dir = self.database_dir(name);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        structure.remove(pos);
        self.save(&structure)
    }

    pub fn delete_table(&self, db: &str, table: &str) -> Result<()> {
        let mut structure = self.structure.lock().expect("catalog lock poisoned");
        let database = structure
            .iter_mut()
            .find(|d| d.name == db)
            .ok_or_else(|| Error::database_not_found(db))?;
        let pos = database
            .tables
            .iter()
            .position(|t| t.name == table)
            .ok_or_else(|| Error::table_not_found(table))?;

        let dir = self.table_dir(db, table);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        database.tables.remove(pos);
        self.save(&structure)
    }

    pub fn delete_index(&self, db: &str, table: &str, index: &str) -> Result<()> {
        let mut structure = self.structure.lock().expect("catalog lock poisoned");
        let database = structure
            .iter_mut()
            .find(|d| d.name == db)
            .ok_or_else(|| Error::database_not_found(db))?;
        let tbl = database
            .tables
            .iter_mut()
            .find(|t| t.name == table)
            .ok_or_else(|| Error::table_not_found(table))?;
        let pos = tbl
            .indexes
            .iter()
            .position(|i| i.name == index)
            .ok_or_else(|| Error::index_not_found(index))?;

        let dir = self.index_dir(db, table, index);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        tbl.indexes.remove(pos);
        self.save(&structure)
    }

    /// Persist a snapshot to the `structure` file: write to a temp file,
    /// then rename over the old one.
    fn save(&self, snapshot: &[DatabaseSpec]) -> Result<()> {
        let _guard = self.fs_lock.lock().expect("catalog file lock poisoned");
        let data = serde_json::to_vec(snapshot)?;
        let tmp = self.base.join("structure.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, self.structure_path())?;
        Ok(())
    }
}
