//! drover-state: redb-backed implementation of the drover `Store`.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{run_as}/{app_id}`, `{run_as}/{app_id}:{taskgroup_id}`)
//! enable prefix scans for an application's taskgroups.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and also carries the advisory per-application locks the constraint
//! engine takes while listing taskgroups.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
