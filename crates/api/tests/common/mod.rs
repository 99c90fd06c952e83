#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analyst_api::config::ServerConfig;
use analyst_api::router::build_app_router;
use analyst_api::state::AppState;
use analyst_cluster::broker::{BrokerClient, BrokerError};
use analyst_cluster::documents::{Bundle, MemoryDocumentStore, Project};
use analyst_cluster::queue::{MemoryResultQueue, ResultQueue};
use analyst_cluster::storage::{BlobStorage, MemoryStorage};
use analyst_core::tile::TileRequest;
use analyst_core::types::JobId;
use analyst_engine::config::EngineConfig;
use analyst_engine::manager::{ManagerDeps, RegionalAnalysisManager};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(offline: bool) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        offline,
        public_url: "http://localhost:3000".to_string(),
        broker_url: "http://localhost:6001".to_string(),
        results_queue: "analyst-results".to_string(),
        results_bucket: "analyst-results".to_string(),
        bundle_bucket: "analyst-bundles".to_string(),
        local_cache: PathBuf::from("cache"),
        documents_path: None,
        engine: EngineConfig {
            result_wait: Duration::from_millis(50),
            ..EngineConfig::default()
        },
    }
}

/// Broker that accepts and records every batch.
#[derive(Default)]
pub struct TestBroker {
    batches: Mutex<Vec<(JobId, Vec<TileRequest>)>>,
}

impl TestBroker {
    pub fn batches(&self) -> Vec<(JobId, Vec<TileRequest>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerClient for TestBroker {
    async fn dispatch(&self, job_id: JobId, tiles: &[TileRequest]) -> Result<(), BrokerError> {
        self.batches.lock().unwrap().push((job_id, tiles.to_vec()));
        Ok(())
    }
}

/// Everything a test may want to poke at behind the router.
pub struct TestApp {
    pub router: Router,
    pub manager: Arc<RegionalAnalysisManager>,
    pub broker: Arc<TestBroker>,
    pub storage: Arc<MemoryStorage>,
}

/// Build the full application router against in-memory cluster services.
///
/// Bundle `b1` in project `p1` is known. In offline mode the result sink
/// route feeds the same in-process queue the listener drains.
pub async fn build_test_app(offline: bool) -> TestApp {
    let config = test_config(offline);

    let documents = MemoryDocumentStore::new();
    documents
        .insert_project(Project {
            id: "p1".to_string(),
            name: "Test project".to_string(),
        })
        .await;
    documents
        .insert_bundle(Bundle {
            id: "b1".to_string(),
            project_id: "p1".to_string(),
            name: "Test network".to_string(),
        })
        .await;

    let broker = Arc::new(TestBroker::default());
    let storage = Arc::new(MemoryStorage::new());
    let queue = Arc::new(MemoryResultQueue::new(config.local_results_url()));

    let manager = RegionalAnalysisManager::start(
        config.engine.clone(),
        ManagerDeps {
            broker: Arc::clone(&broker) as Arc<dyn BrokerClient>,
            queue: Arc::clone(&queue) as Arc<dyn ResultQueue>,
            bundle_storage: Arc::clone(&storage) as Arc<dyn BlobStorage>,
            result_storage: Arc::clone(&storage) as Arc<dyn BlobStorage>,
            documents: Arc::new(documents),
        },
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        manager: Arc::clone(&manager),
        local_results: offline.then_some(queue),
    };

    TestApp {
        router: build_app_router(state, &config),
        manager,
        broker,
        storage,
    }
}

/// A valid definition over bundle `b1`.
pub fn sample_definition(width: i32, height: i32) -> serde_json::Value {
    serde_json::json!({
        "name": "api test",
        "bundleId": "b1",
        "grid": "jobs",
        "workerVersion": "v4.0.0",
        "north": 5000,
        "west": 3000,
        "width": width,
        "height": height,
        "zoom": 9,
        "cutoffMinutes": 60,
        "request": {
            "scenario": {"id": "s1", "modifications": []},
            "date": "2024-05-01"
        }
    })
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: &serde_json::Value) -> Response<Body> {
    post_raw(app, uri, body.to_string()).await
}

pub async fn post_raw(app: &Router, uri: &str, body: String) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
