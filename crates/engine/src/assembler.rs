//! Per-job accumulation of tile results.
//!
//! A [`JobAssembler`] is created when a job is submitted and lives in the
//! registry until evicted. It moves through `Active -> Complete` or
//! `Active -> Failed`; both are terminal.
//!
//! All mutable state sits behind one mutex per job. The listener merges
//! under it, status polls snapshot under it, and the `complete == total`
//! check shares the critical section with the state write, so exactly one
//! merge ever observes completion.

use std::sync::{Mutex, MutexGuard};

use analyst_core::access_grid::{self, GridHeader};
use analyst_core::error::CoreError;
use analyst_core::job::{JobState, JobStatus};
use analyst_core::regional::{RegionalAnalysis, MAX_VALUES_PER_ORIGIN};
use analyst_core::tile::{TilePayload, TileResult};
use analyst_core::types::{JobId, Timestamp};
use tokio::time::Instant;

/// What merging one tile result did to the job.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The tile was new and has been recorded.
    Applied { complete: u32, total: u32 },
    /// The tile was the last one missing. Carries the encoded output grid;
    /// returned exactly once per job.
    Completed { output: Vec<u8> },
    /// The tile had already been applied; nothing changed.
    Duplicate,
    /// The tile's coordinates lie outside the grid.
    OutOfBounds,
    /// The result belongs to a different job.
    Misrouted,
    /// The job is no longer active; the result was ignored.
    Closed(JobState),
    /// The result moved the job to `Failed`.
    Failed { reason: String },
}

struct AssemblerState {
    state: JobState,
    applied: Vec<bool>,
    complete: u32,
    values_per_origin: Option<usize>,
    values: Vec<i32>,
    error: Option<String>,
    output_key: Option<String>,
    last_progress: Instant,
    finished_at: Option<Instant>,
}

impl AssemblerState {
    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.finished_at = Some(Instant::now());
        self.values = Vec::new();
        self.applied = Vec::new();
    }

    fn fail(&mut self, reason: String) {
        self.error = Some(reason);
        self.finish(JobState::Failed);
    }
}

/// Accumulator and progress counter for one job.
pub struct JobAssembler {
    job_id: JobId,
    header: GridHeader,
    total: u32,
    created_at: Timestamp,
    inner: Mutex<AssemblerState>,
}

impl JobAssembler {
    /// Create the assembler for a validated definition.
    pub fn new(job_id: JobId, analysis: &RegionalAnalysis) -> Result<Self, CoreError> {
        analysis.validate()?;
        let total = u32::try_from(analysis.tile_count()).map_err(|_| {
            CoreError::Validation(format!("{} tiles is too many", analysis.tile_count()))
        })?;
        let header = GridHeader {
            zoom: analysis.zoom,
            west: analysis.west,
            north: analysis.north,
            width: analysis.width,
            height: analysis.height,
        };

        Ok(Self {
            job_id,
            header,
            total,
            created_at: chrono::Utc::now(),
            inner: Mutex::new(AssemblerState {
                state: JobState::Active,
                applied: vec![false; header.cell_count()],
                complete: 0,
                values_per_origin: None,
                values: Vec::new(),
                error: None,
                output_key: None,
                last_progress: Instant::now(),
                finished_at: None,
            }),
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// When the job last made progress: creation or the latest new tile.
    pub fn last_progress(&self) -> Instant {
        self.lock().last_progress
    }

    /// When the job reached a terminal state, if it has.
    pub fn finished_at(&self) -> Option<Instant> {
        self.lock().finished_at
    }

    /// Snapshot of the job's progress.
    pub fn status(&self) -> JobStatus {
        let inner = self.lock();
        JobStatus {
            job_id: self.job_id,
            total: self.total,
            complete: inner.complete,
            state: inner.state,
            error: inner.error.clone(),
            output_key: inner.output_key.clone(),
            created_at: self.created_at,
        }
    }

    /// Merge one tile result. Idempotent per `(x, y)`.
    pub fn merge(&self, result: &TileResult) -> MergeOutcome {
        if result.job_id != self.job_id {
            return MergeOutcome::Misrouted;
        }

        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return MergeOutcome::Closed(inner.state);
        }

        let Some(cell) = self.header.cell_index(result.x, result.y) else {
            return MergeOutcome::OutOfBounds;
        };
        if inner.applied[cell] {
            return MergeOutcome::Duplicate;
        }

        let values = match &result.payload {
            TilePayload::Values(values) => values,
            TilePayload::Error(message) => {
                let reason = format!("tile ({}, {}) failed: {message}", result.x, result.y);
                inner.fail(reason.clone());
                return MergeOutcome::Failed { reason };
            }
        };

        let per_origin = match inner.values_per_origin {
            Some(expected) if expected == values.len() => expected,
            Some(expected) => {
                let reason = format!(
                    "tile ({}, {}) has {} values, expected {expected}",
                    result.x,
                    result.y,
                    values.len()
                );
                inner.fail(reason.clone());
                return MergeOutcome::Failed { reason };
            }
            None if values.is_empty() => {
                let reason = format!("tile ({}, {}) has no values", result.x, result.y);
                inner.fail(reason.clone());
                return MergeOutcome::Failed { reason };
            }
            None if values.len() > MAX_VALUES_PER_ORIGIN => {
                let reason = format!(
                    "tile ({}, {}) has {} values, limit is {MAX_VALUES_PER_ORIGIN}",
                    result.x,
                    result.y,
                    values.len()
                );
                inner.fail(reason.clone());
                return MergeOutcome::Failed { reason };
            }
            None => match self.allocate_values(values.len()) {
                Some(buffer) => {
                    inner.values_per_origin = Some(values.len());
                    inner.values = buffer;
                    values.len()
                }
                None => {
                    let reason = format!(
                        "cannot allocate output for {} values per origin",
                        values.len()
                    );
                    inner.fail(reason.clone());
                    return MergeOutcome::Failed { reason };
                }
            },
        };

        let offset = cell * per_origin;
        inner.values[offset..offset + per_origin].copy_from_slice(values);
        inner.applied[cell] = true;
        inner.complete += 1;
        inner.last_progress = Instant::now();

        if inner.complete < self.total {
            return MergeOutcome::Applied {
                complete: inner.complete,
                total: self.total,
            };
        }

        match access_grid::encode(&self.header, per_origin, &inner.values) {
            Ok(output) => {
                inner.finish(JobState::Complete);
                MergeOutcome::Completed { output }
            }
            Err(e) => {
                let reason = format!("failed to encode output: {e}");
                inner.fail(reason.clone());
                MergeOutcome::Failed { reason }
            }
        }
    }

    /// Move an active job to `Failed`.
    ///
    /// Returns `false` when the job was already terminal, in which case
    /// nothing changes.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.fail(reason.into());
        true
    }

    /// Record where the finished output grid was stored.
    pub fn record_output(&self, key: impl Into<String>) {
        self.lock().output_key = Some(key.into());
    }

    /// Record that the finished output grid could not be stored.
    ///
    /// The job stays `Complete` (every tile arrived) but carries an error
    /// and no output key, telling callers to resubmit.
    pub fn record_output_failure(&self, reason: impl Into<String>) {
        self.lock().error = Some(reason.into());
    }

    /// Zeroed buffer for every cell of the grid, or `None` when it cannot
    /// be sized or allocated.
    fn allocate_values(&self, per_origin: usize) -> Option<Vec<i32>> {
        let len = self.header.cell_count().checked_mul(per_origin)?;
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).ok()?;
        buffer.resize(len, 0);
        Some(buffer)
    }

    fn lock(&self) -> MutexGuard<'_, AssemblerState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
