pub mod catalog;

pub use catalog::{CatalogEntry, CatalogStore, SqliteCatalog};
