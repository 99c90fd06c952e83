//! Domain types and pure functions for regional analysis runs.
//!
//! Nothing in this crate performs I/O. The broker, queue and storage
//! adapters live in `analyst-cluster`; the coordination engine lives in
//! `analyst-engine`.

pub mod access_grid;
pub mod error;
pub mod job;
pub mod partition;
pub mod regional;
pub mod tile;
pub mod types;
