//! Grid partitioning: one [`TileRequest`] per origin cell.
//!
//! Tiles are produced column-major, `x` in the outer loop and `y` in the
//! inner loop, so the first request is always `(0, 0)` and
//! `index = x * height + y`.

use crate::error::CoreError;
use crate::regional::{ProfileRequest, RegionalAnalysis};
use crate::tile::TileRequest;
use crate::types::JobId;

/// Values shared by every tile of one submission that are not part of the
/// definition itself.
#[derive(Debug, Clone)]
pub struct TileContext {
    pub job_id: JobId,
    /// Address workers post results to.
    pub output_queue: String,
    /// Storage key of the opportunity grid (see [`grid_key`]).
    pub grid_key: String,
    /// Query embedded in each tile; may reference a persisted scenario.
    pub request: ProfileRequest,
}

/// Storage key of an opportunity grid within a project.
pub fn grid_key(project_id: &str, grid: &str) -> String {
    format!("{project_id}/{grid}.grid")
}

/// Split `analysis` into `width * height` tile requests sharing
/// `context.job_id`.
///
/// Fails with [`CoreError::Validation`] for an invalid definition; nothing
/// is produced in that case.
pub fn partition(
    analysis: &RegionalAnalysis,
    context: &TileContext,
) -> Result<Vec<TileRequest>, CoreError> {
    analysis.validate()?;

    let mut tiles = Vec::with_capacity(analysis.tile_count() as usize);
    for x in 0..analysis.width {
        for y in 0..analysis.height {
            tiles.push(TileRequest {
                job_id: context.job_id,
                graph_id: analysis.bundle_id.clone(),
                worker_version: analysis.worker_version.clone(),
                north: analysis.north,
                west: analysis.west,
                width: analysis.width,
                height: analysis.height,
                zoom: analysis.zoom,
                cutoff_minutes: analysis.cutoff_minutes,
                request: context.request.clone(),
                output_queue: context.output_queue.clone(),
                grid: context.grid_key.clone(),
                x,
                y,
            });
        }
    }
    Ok(tiles)
}
