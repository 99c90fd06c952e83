use std::sync::Arc;

use analyst_cluster::queue::MemoryResultQueue;
use analyst_engine::manager::RegionalAnalysisManager;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub manager: Arc<RegionalAnalysisManager>,
    /// In-process result queue fed by `POST /api/v1/regional/results`.
    /// Only present in offline mode.
    pub local_results: Option<Arc<MemoryResultQueue>>,
}
