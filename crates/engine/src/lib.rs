//! Regional analysis job distribution and result assembly.
//!
//! A submitted [`RegionalAnalysis`](analyst_core::regional::RegionalAnalysis)
//! is registered, partitioned into tiles and handed to the broker by the
//! [`submitter`]. Workers post tile results to a queue drained by the
//! [`listener`], which routes each result through the [`registry`] to the
//! job's [`assembler`]. Callers poll progress through [`status`]; the
//! [`retention`] sweeper evicts finished jobs and fails stalled ones.
//! [`manager::RegionalAnalysisManager`] wires all of it together.

pub mod assembler;
pub mod config;
pub mod events;
pub mod listener;
pub mod manager;
pub mod registry;
pub mod retention;
pub mod status;
pub mod submitter;

#[cfg(test)]
pub(crate) mod testing;
