//! # Storage Backends
//!
//! Disk-backed implementations of the composition store traits.

mod redb_store;

pub use redb_store::{RedbSnapshot, RedbStore};
