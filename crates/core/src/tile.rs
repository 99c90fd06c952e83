//! Units of dispatched work and the replies workers post back.
//!
//! Both types travel as camelCase JSON: [`TileRequest`]s to the broker,
//! [`TileResult`]s over the result queue.

use serde::{Deserialize, Serialize};

use crate::regional::ProfileRequest;
use crate::types::JobId;

/// One origin cell of a partitioned grid, with everything a worker needs to
/// compute it independently.
///
/// Identity is `(job_id, x, y)`; the job id alone is shared by every tile of
/// the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRequest {
    pub job_id: JobId,
    /// Bundle (transport network) the worker loads.
    pub graph_id: String,
    pub worker_version: String,
    pub north: i32,
    pub west: i32,
    pub width: i32,
    pub height: i32,
    pub zoom: i32,
    pub cutoff_minutes: i32,
    pub request: ProfileRequest,
    /// Where the worker posts its [`TileResult`].
    pub output_queue: String,
    /// Storage key of the opportunity grid, `"{project}/{grid}.grid"`.
    pub grid: String,
    pub x: i32,
    pub y: i32,
}

impl TileRequest {
    pub fn key(&self) -> TileKey {
        TileKey {
            job_id: self.job_id,
            x: self.x,
            y: self.y,
        }
    }
}

/// Identity of a tile within the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub job_id: JobId,
    pub x: i32,
    pub y: i32,
}

/// What a worker computed for a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TilePayload {
    /// Accessibility values for the origin, one per sample.
    Values(Vec<i32>),
    /// The worker could not compute the tile.
    Error(String),
}

/// A worker's reply for one [`TileRequest`].
///
/// Serialized as `{"jobId": .., "x": .., "y": .., "values": [..]}` or with
/// `"error": ".."` in place of `values`. Delivery is at-least-once, so the
/// same result may arrive more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileResult {
    pub job_id: JobId,
    pub x: i32,
    pub y: i32,
    #[serde(flatten)]
    pub payload: TilePayload,
}

impl TileResult {
    pub fn values(job_id: JobId, x: i32, y: i32, values: Vec<i32>) -> Self {
        Self {
            job_id,
            x,
            y,
            payload: TilePayload::Values(values),
        }
    }

    pub fn error(job_id: JobId, x: i32, y: i32, message: impl Into<String>) -> Self {
        Self {
            job_id,
            x,
            y,
            payload: TilePayload::Error(message.into()),
        }
    }

    pub fn key(&self) -> TileKey {
        TileKey {
            job_id: self.job_id,
            x: self.x,
            y: self.y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn result_with_values_parses() {
        let job_id = JobId::now_v7();
        let body = format!(r#"{{"jobId":"{job_id}","x":3,"y":7,"values":[10,20,30]}}"#);

        let result: TileResult = serde_json::from_str(&body).unwrap();

        assert_eq!(result.key(), TileKey { job_id, x: 3, y: 7 });
        assert_matches!(result.payload, TilePayload::Values(ref v) if v == &[10, 20, 30]);
    }

    #[test]
    fn result_with_error_parses() {
        let job_id = JobId::now_v7();
        let body = format!(r#"{{"jobId":"{job_id}","x":0,"y":0,"error":"worker lost network"}}"#);

        let result: TileResult = serde_json::from_str(&body).unwrap();

        assert_matches!(result.payload, TilePayload::Error(ref m) if m == "worker lost network");
    }

    #[test]
    fn result_without_payload_is_rejected() {
        let job_id = JobId::now_v7();
        let body = format!(r#"{{"jobId":"{job_id}","x":0,"y":0}}"#);

        assert!(serde_json::from_str::<TileResult>(&body).is_err());
    }

    #[test]
    fn result_serializes_flat() {
        let job_id = JobId::now_v7();
        let json = serde_json::to_value(TileResult::values(job_id, 1, 2, vec![5])).unwrap();

        assert_eq!(json["x"], 1);
        assert_eq!(json["values"], serde_json::json!([5]));
        assert!(json.get("payload").is_none());
    }
}
