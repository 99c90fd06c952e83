//! Read-only access to bundle and project documents.
//!
//! The submitter resolves a definition's bundle to its project in order to
//! locate the opportunity grid. Document persistence itself lives elsewhere;
//! [`MemoryDocumentStore`] serves a snapshot loaded at startup.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A transport network bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: String,
}

/// A project grouping bundles and opportunity grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Errors from looking up documents.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Failed to read documents: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed documents: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn bundle(&self, id: &str) -> Result<Option<Bundle>, DocumentError>;

    async fn project(&self, id: &str) -> Result<Option<Project>, DocumentError>;
}

/// On-disk snapshot format: `{"bundles": [...], "projects": [...]}`.
#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    #[serde(default)]
    bundles: Vec<Bundle>,
    #[serde(default)]
    projects: Vec<Project>,
}

/// Document store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    bundles: RwLock<HashMap<String, Bundle>>,
    projects: RwLock<HashMap<String, Project>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON snapshot.
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        let bundles = snapshot
            .bundles
            .into_iter()
            .map(|b| (b.id.clone(), b))
            .collect();
        let projects = snapshot
            .projects
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Ok(Self {
            bundles: RwLock::new(bundles),
            projects: RwLock::new(projects),
        })
    }

    /// Load a JSON snapshot from `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub async fn insert_bundle(&self, bundle: Bundle) {
        self.bundles.write().await.insert(bundle.id.clone(), bundle);
    }

    pub async fn insert_project(&self, project: Project) {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project);
    }

    pub async fn bundle_count(&self) -> usize {
        self.bundles.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn bundle(&self, id: &str) -> Result<Option<Bundle>, DocumentError> {
        Ok(self.bundles.read().await.get(id).cloned())
    }

    async fn project(&self, id: &str) -> Result<Option<Project>, DocumentError> {
        Ok(self.projects.read().await.get(id).cloned())
    }
}
