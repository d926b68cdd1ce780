//! Incremental synchronization

mod controller;

pub use controller::{AccountRunReport, RunState, SyncController, SyncOptions};
