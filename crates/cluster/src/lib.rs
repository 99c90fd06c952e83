//! Adapters for the services a regional analysis run depends on.
//!
//! Each external collaborator sits behind a small object-safe trait so the
//! engine can be wired to real infrastructure in production and to
//! in-process fakes in offline mode and tests:
//!
//! - [`broker::BrokerClient`]: schedules tiles onto remote workers.
//! - [`queue::ResultQueue`]: at-least-once delivery of tile results.
//! - [`storage::BlobStorage`]: named byte blobs (scenarios, output grids).
//! - [`documents::DocumentStore`]: bundle and project metadata.
//! - [`backoff`]: exponential backoff shared by the retrying loops.

pub mod backoff;
pub mod broker;
pub mod documents;
pub mod queue;
pub mod storage;
