pub mod health;
pub mod regional;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /regional                 submit (POST), list (GET)
/// /regional/{job_id}        status (GET)
/// /regional/results         local result sink (POST, offline mode only)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/regional", regional::router())
}
