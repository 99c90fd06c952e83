//! Regional analysis definitions and their validation.
//!
//! A [`RegionalAnalysis`] describes one run: the origin grid (web-mercator
//! pixels at `zoom`), the travel-time query evaluated at every origin, and
//! the bundle/grid the workers compute against. It is owned by the caller
//! and read-only to the engine.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Smallest web-mercator zoom level accepted for an origin grid.
pub const MIN_ZOOM: i32 = 1;

/// Largest web-mercator zoom level accepted for an origin grid.
pub const MAX_ZOOM: i32 = 22;

/// Largest travel-time cutoff, in minutes.
pub const MAX_CUTOFF_MINUTES: i32 = 240;

/// Upper bound on `width * height`. Keeps the assembler buffer and the
/// broker batch within reason.
pub const MAX_TILES: u64 = 4_000_000;

/// Upper bound on the number of values a worker may return per origin
/// (one per cutoff and percentile combination).
pub const MAX_VALUES_PER_ORIGIN: usize = 100;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A set of modifications applied to the transport network before routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    #[serde(default)]
    pub modifications: Vec<serde_json::Value>,
}

/// Routing parameters evaluated from every origin of the grid.
///
/// Only the fields the engine itself reads are typed; everything else is
/// carried through to the workers untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    /// Inline scenario. Cleared once the scenario has been persisted to
    /// shared storage, in which case `scenario_id` is set instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<Scenario>,

    /// Id of a scenario previously persisted to shared storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProfileRequest {
    /// Return a copy that refers to the scenario by id instead of carrying it.
    pub fn with_scenario_reference(&self) -> Self {
        let mut request = self.clone();
        if let Some(scenario) = request.scenario.take() {
            request.scenario_id = Some(scenario.id);
        }
        request
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// Immutable description of a regional analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionalAnalysis {
    /// Optional human-readable label, echoed in logs only.
    #[serde(default)]
    pub name: Option<String>,
    /// Transport network bundle the workers route on.
    pub bundle_id: String,
    /// Opportunity grid name, resolved against the bundle's project.
    pub grid: String,
    pub worker_version: String,
    pub north: i32,
    pub west: i32,
    pub width: i32,
    pub height: i32,
    pub zoom: i32,
    pub cutoff_minutes: i32,
    pub request: ProfileRequest,
}

impl RegionalAnalysis {
    /// Number of tiles the grid partitions into.
    ///
    /// Only meaningful after [`validate`](Self::validate) has passed.
    pub fn tile_count(&self) -> u64 {
        self.width.max(0) as u64 * self.height.max(0) as u64
    }

    /// Scenario embedded in the query.
    ///
    /// Guaranteed to be present once [`validate`](Self::validate) passes.
    pub fn scenario(&self) -> Result<&Scenario, CoreError> {
        self.request
            .scenario
            .as_ref()
            .ok_or_else(|| CoreError::Validation("Request must include a scenario".to_string()))
    }

    /// Validate the definition before any background work is started.
    ///
    /// Rules:
    /// - `width` and `height` must be at least 1 and their product must not
    ///   exceed [`MAX_TILES`].
    /// - `zoom` must be within [`MIN_ZOOM`]..=[`MAX_ZOOM`].
    /// - `cutoff_minutes` must be within 1..=[`MAX_CUTOFF_MINUTES`].
    /// - `bundle_id`, `grid` and `worker_version` must not be blank.
    /// - The request must carry a scenario with a non-blank id.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.width < 1 || self.height < 1 {
            return Err(CoreError::Validation(format!(
                "Grid must be at least 1x1, got {}x{}",
                self.width, self.height
            )));
        }
        if self.tile_count() > MAX_TILES {
            return Err(CoreError::Validation(format!(
                "Grid of {}x{} exceeds the limit of {MAX_TILES} tiles",
                self.width, self.height
            )));
        }
        if !(MIN_ZOOM..=MAX_ZOOM).contains(&self.zoom) {
            return Err(CoreError::Validation(format!(
                "Zoom must be between {MIN_ZOOM} and {MAX_ZOOM}, got {}",
                self.zoom
            )));
        }
        if !(1..=MAX_CUTOFF_MINUTES).contains(&self.cutoff_minutes) {
            return Err(CoreError::Validation(format!(
                "Cutoff must be between 1 and {MAX_CUTOFF_MINUTES} minutes, got {}",
                self.cutoff_minutes
            )));
        }
        require_non_blank("bundleId", &self.bundle_id)?;
        require_non_blank("grid", &self.grid)?;
        require_non_blank("workerVersion", &self.worker_version)?;

        let scenario = self.scenario()?;
        require_non_blank("scenario id", &scenario.id)?;

        Ok(())
    }
}

/// Helper: ensure a string field is not empty or whitespace.
fn require_non_blank(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample(width: i32, height: i32) -> RegionalAnalysis {
        RegionalAnalysis {
            name: Some("baseline".to_string()),
            bundle_id: "bundle-1".to_string(),
            grid: "jobs".to_string(),
            worker_version: "v4.0.0".to_string(),
            north: 12_000,
            west: 9_000,
            width,
            height,
            zoom: 9,
            cutoff_minutes: 60,
            request: ProfileRequest {
                scenario: Some(Scenario {
                    id: "scenario-1".to_string(),
                    modifications: vec![serde_json::json!({"type": "remove-trips"})],
                }),
                scenario_id: None,
                extra: serde_json::Map::new(),
            },
        }
    }

    // -- validate -------------------------------------------------------------

    #[test]
    fn valid_definition_passes() {
        assert!(sample(2, 1).validate().is_ok());
    }

    #[test]
    fn zero_width_rejected() {
        assert!(sample(0, 5).validate().is_err());
    }

    #[test]
    fn negative_height_rejected() {
        assert!(sample(5, -1).validate().is_err());
    }

    #[test]
    fn oversized_grid_rejected() {
        assert!(sample(4_000, 4_000).validate().is_err());
    }

    #[test]
    fn zoom_out_of_range_rejected() {
        let mut def = sample(1, 1);
        def.zoom = 23;
        assert!(def.validate().is_err());
    }

    #[test]
    fn zero_cutoff_rejected() {
        let mut def = sample(1, 1);
        def.cutoff_minutes = 0;
        assert!(def.validate().is_err());
    }

    #[test]
    fn blank_bundle_rejected() {
        let mut def = sample(1, 1);
        def.bundle_id = "  ".to_string();
        assert!(def.validate().is_err());
    }

    #[test]
    fn missing_scenario_rejected() {
        let mut def = sample(1, 1);
        def.request.scenario = None;
        assert!(def.validate().is_err());
    }

    // -- serde ----------------------------------------------------------------

    #[test]
    fn deserializes_camel_case_and_keeps_extra_fields() {
        let def: RegionalAnalysis = serde_json::from_value(serde_json::json!({
            "bundleId": "b",
            "grid": "jobs",
            "workerVersion": "v1",
            "north": 1, "west": 2, "width": 3, "height": 4, "zoom": 9,
            "cutoffMinutes": 45,
            "request": {
                "scenario": {"id": "s", "modifications": []},
                "fromTime": 25200,
                "transitModes": "BUS,RAIL"
            }
        }))
        .unwrap();

        assert_eq!(def.tile_count(), 12);
        assert_eq!(def.request.extra["fromTime"], 25200);
        assert_eq!(def.request.extra["transitModes"], "BUS,RAIL");
    }

    #[test]
    fn scenario_reference_replaces_inline_scenario() {
        let request = sample(1, 1).request.with_scenario_reference();
        assert!(request.scenario.is_none());
        assert_eq!(request.scenario_id.as_deref(), Some("scenario-1"));

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("scenario").is_none());
        assert_eq!(json["scenarioId"], "scenario-1");
    }
}
