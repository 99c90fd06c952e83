//! Route definitions for the `/regional` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::regional;
use crate::state::AppState;

/// Routes mounted at `/regional`.
///
/// ```text
/// GET    /              -> list_analyses
/// POST   /              -> submit_analysis
/// POST   /results       -> post_result
/// GET    /results       -> results_is_not_a_job (404)
/// GET    /{job_id}      -> get_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(regional::list_analyses).post(regional::submit_analysis))
        .route(
            "/results",
            post(regional::post_result).get(regional::results_is_not_a_job),
        )
        .route("/{job_id}", get(regional::get_status))
}
