//! Segmented secondary index engine
//!
//! Each index is an inverted map from a canonical key (the JSON-array
//! spelling of the indexed field values, in declared order) to the record
//! ids carrying those values. On disk an index is a directory of segment
//! files `0, 1, 2, ...`, each a JSON object `{canonical-key: [ids]}`.
//!
//! Segment `0` is the hot segment and stays fully resident in memory. A
//! segment holds at most [`SEGMENT_CAPACITY`] distinct canonical keys; once
//! the hot segment is full, growth continues in the highest-numbered cold
//! segment, so segment `0` never exceeds the bound.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::common::error::Result;

/// Maximum number of distinct canonical keys per segment file.
pub const SEGMENT_CAPACITY: usize = 50_000;

/// One segment: canonical key -> record ids, sorted for stable output.
type Segment = BTreeMap<String, Vec<String>>;

/// Registry of live index state, keyed by `(db, table, index)`.
///
/// The catalog owns index *definitions*; this registry owns the runtime
/// side (per-index mutex, resident hot segment, segment count), created
/// lazily on first touch and evicted when the index or its table goes away.
pub struct IndexRegistry {
    base: PathBuf,
    segment_capacity: usize,
    handles: Mutex<HashMap<(String, String, String), Arc<IndexHandle>>>,
}

struct IndexHandle {
    dir: PathBuf,
    state: Mutex<IndexState>,
}

#[derive(Default)]
struct IndexState {
    initialized: bool,
    hot: Segment,
    segment_count: usize,
}

impl IndexRegistry {
    pub fn new(base: &Path) -> Self {
        Self::with_segment_capacity(base, SEGMENT_CAPACITY)
    }

    /// Registry with a custom per-segment bound. Production code uses
    /// [`SEGMENT_CAPACITY`]; tests shrink it to exercise segment rollover.
    pub fn with_segment_capacity(base: &Path, segment_capacity: usize) -> Self {
        Self {
            base: base.to_path_buf(),
            segment_capacity,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self, db: &str, table: &str, index: &str) -> Arc<IndexHandle> {
        let mut handles = self.handles.lock().expect("index registry lock poisoned");
        handles
            .entry((db.to_string(), table.to_string(), index.to_string()))
            .or_insert_with(|| {
                Arc::new(IndexHandle {
                    dir: self
                        .base
                        .join("dbs")
                        .join(db)
                        .join(table)
                        .join("i")
                        .join(index),
                    state: Mutex::new(IndexState::default()),
                })
            })
            .clone()
    }

    /// Record `record_id` under `canonical_key`.
    pub fn insert(
        &self,
        db: &str,
        table: &str,
        index: &str,
        canonical_key: &str,
        record_id: &str,
    ) -> Result<()> {
        let handle = self.handle(db, table, index);
        let mut state = handle.state.lock().expect("index lock poisoned");
        handle.ensure_init(&mut state)?;

        if state.hot.len() < self.segment_capacity {
            state
                .hot
                .entry(canonical_key.to_string())
                .or_default()
                .push(record_id.to_string());
            let data = serde_json::to_vec(&state.hot)?;
            fs::write(handle.segment_path(0), data)?;
            if state.segment_count == 0 {
                state.segment_count = 1;
            }
            return Ok(());
        }

        // Hot segment is full: growth continues at the highest-numbered
        // cold segment, never in segment 0.
        let last = state.segment_count - 1;
        let mut segment = handle.load_segment(last)?;
        let target = if segment.len() < self.segment_capacity {
            last
        } else {
            segment = Segment::new();
            state.segment_count += 1;
            state.segment_count - 1
        };
        segment
            .entry(canonical_key.to_string())
            .or_default()
            .push(record_id.to_string());
        let data = serde_json::to_vec(&segment)?;
        fs::write(handle.segment_path(target), data)?;
        Ok(())
    }

    /// Remove `record_id` from the first entry list containing it.
    ///
    /// The scan walks the hot segment first, then cold segments in order; a
    /// record id appears at most once per index, so the scan stops at the
    /// first hit. Linear in the worst case, which the design accepts.
    pub fn delete_item(&self, db: &str, table: &str, index: &str, record_id: &str) -> Result<()> {
        let handle = self.handle(db, table, index);
        let mut state = handle.state.lock().expect("index lock poisoned");
        handle.ensure_init(&mut state)?;

        let mut hot_hit = false;
        for list in state.hot.values_mut() {
            if let Some(pos) = list.iter().position(|id| id == record_id) {
                list.remove(pos);
                hot_hit = true;
                break;
            }
        }
        if hot_hit {
            let data = serde_json::to_vec(&state.hot)?;
            fs::write(handle.segment_path(0), data)?;
            return Ok(());
        }

        for seg_no in 1..state.segment_count {
            let mut segment = handle.load_segment(seg_no)?;
            let mut hit = false;
            for list in segment.values_mut() {
                if let Some(pos) = list.iter().position(|id| id == record_id) {
                    list.remove(pos);
                    hit = true;
                    break;
                }
            }
            if hit {
                let data = serde_json::to_vec(&segment)?;
                fs::write(handle.segment_path(seg_no), data)?;
                return Ok(());
            }
        }

        Ok(())
    }

    /// All record ids filed under `canonical_key`, across every segment.
    pub fn lookup(
        &self,
        db: &str,
        table: &str,
        index: &str,
        canonical_key: &str,
    ) -> Result<Vec<String>> {
        let handle = self.handle(db, table, index);
        let mut state = handle.state.lock().expect("index lock poisoned");
        handle.ensure_init(&mut state)?;

        let mut out = state.hot.get(canonical_key).cloned().unwrap_or_default();
        for seg_no in 1..state.segment_count {
            let segment = handle.load_segment(seg_no)?;
            if let Some(ids) = segment.get(canonical_key) {
                out.extend(ids.iter().cloned());
            }
        }
        Ok(out)
    }

    // === Eviction on DDL deletes ===

    pub fn evict_index(&self, db: &str, table: &str, index: &str) {
        let mut handles = self.handles.lock().expect("index registry lock poisoned");
        handles.remove(&(db.to_string(), table.to_string(), index.to_string()));
    }

    pub fn evict_table(&self, db: &str, table: &str) {
        let mut handles = self.handles.lock().expect("index registry lock poisoned");
        handles.retain(|(d, t, _), _| !(d == db && t == table));
    }

    pub fn evict_database(&self, db: &str) {
        let mut handles = self.handles.lock().expect("index registry lock poisoned");
        handles.retain(|(d, _, _), _| d != db);
    }
}

impl IndexHandle {
    fn segment_path(&self, seg_no: usize) -> PathBuf {
        self.dir.join(seg_no.to_string())
    }

    /// Idempotent startup: create the directory, count existing segment
    /// files, and pull segment 0 into memory when it exists.
    fn ensure_init(&self, state: &mut IndexState) -> Result<()> {
        if state.initialized {
            return Ok(());
        }
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        state.segment_count = fs::read_dir(&self.dir)?.count();
        if state.segment_count > 0 {
            let data = fs::read(self.segment_path(0))?;
            state.hot = serde_json::from_slice(&data)?;
        }
        state.initialized = true;
        Ok(())
    }

    fn load_segment(&self, seg_no: usize) -> Result<Segment> {
        let data = fs::read(self.segment_path(seg_no))?;
        Ok(serde_json::from_slice(&data)?)
    }
}
