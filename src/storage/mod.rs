//! Secondary storage
//!
//! JSON backup mirror of the durable content store.

mod backup;

pub use backup::JsonBackup;
pub(crate) use backup::write_atomic;
