//! Single-node storage engine: catalog, record files, secondary indexes

pub mod catalog;
pub mod index;
pub mod records;

pub use catalog::{Catalog, DatabaseSpec, IndexSpec, TableSpec};
pub use index::{IndexRegistry, SEGMENT_CAPACITY};
pub use records::RecordStore;
