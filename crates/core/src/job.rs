//! Job lifecycle states and the status snapshot reported to callers.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Lifecycle of a regional analysis job. `Complete` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Active,
    Complete,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Active)
    }
}

/// Point-in-time progress of one job.
///
/// Derived from the job's assembler at poll time and never stored. A
/// `complete` below `total` with no `error` means the job is still running;
/// with an `error` it will never finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: JobId,
    pub total: u32,
    pub complete: u32,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Storage key of the finalized output grid, once written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    pub created_at: Timestamp,
}

/// Storage key of a job's finalized output grid.
pub fn output_key(job_id: JobId) -> String {
    format!("{job_id}.access")
}

/// Storage key under which a scenario is shared with the workers.
pub fn scenario_key(bundle_id: &str, scenario_id: &str) -> String {
    format!("{bundle_id}_{scenario_id}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_is_not_terminal() {
        assert!(!JobState::Active.is_terminal());
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase_state_and_omits_empty_fields() {
        let status = JobStatus {
            job_id: JobId::now_v7(),
            total: 2,
            complete: 1,
            state: JobState::Active,
            error: None,
            output_key: None,
            created_at: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["total"], 2);
        assert!(json.get("error").is_none());
        assert!(json.get("outputKey").is_none());
    }

    #[test]
    fn storage_keys() {
        let job_id = JobId::nil();
        assert_eq!(
            output_key(job_id),
            "00000000-0000-0000-0000-000000000000.access"
        );
        assert_eq!(scenario_key("b1", "s1"), "b1_s1.json");
    }
}
