//! # Vigil Node
//!
//! HTTP and WebSocket front end for the Vigil planning runtime.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vigil_core::Manifest;
use vigil_runtime::{lifecycle, Engine, RuntimeConfig};

mod agents;
mod api;
mod state;

use state::{AppState, DEFAULT_RUN_RETENTION};

/// Manifest served when `VIGIL_MANIFEST` is not set.
const DEFAULT_MANIFEST: &str = include_str!("../manifest/clinical.json");

/// Node settings read from the environment.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// `VIGIL_ADDR`, default `0.0.0.0:3000`.
    pub addr: SocketAddr,

    /// `VIGIL_MANIFEST`; the built-in clinical manifest when unset.
    pub manifest: Option<PathBuf>,

    /// `VIGIL_SIMULATED_LATENCY_MS` for agents without an endpoint.
    pub simulated_latency: Duration,

    /// `VIGIL_RUN_RETENTION`: finished runs kept in memory.
    pub run_retention: usize,
}

impl NodeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let addr = match std::env::var("VIGIL_ADDR") {
            Ok(raw) => raw.parse().with_context(|| format!("invalid VIGIL_ADDR {:?}", raw))?,
            Err(_) => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };
        let simulated_latency = match std::env::var("VIGIL_SIMULATED_LATENCY_MS") {
            Ok(raw) => Duration::from_millis(
                raw.parse()
                    .with_context(|| format!("invalid VIGIL_SIMULATED_LATENCY_MS {:?}", raw))?,
            ),
            Err(_) => Duration::from_millis(100),
        };
        let run_retention = match std::env::var("VIGIL_RUN_RETENTION") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid VIGIL_RUN_RETENTION {:?}", raw))?,
            Err(_) => DEFAULT_RUN_RETENTION,
        };
        Ok(Self {
            addr,
            manifest: std::env::var_os("VIGIL_MANIFEST").map(PathBuf::from),
            simulated_latency,
            run_retention,
        })
    }

    fn load_manifest(&self) -> anyhow::Result<Manifest> {
        let manifest = match &self.manifest {
            Some(path) => Manifest::from_path(path)?,
            None => Manifest::from_json(DEFAULT_MANIFEST)?,
        };
        Ok(manifest)
    }
}

/// Build an engine from a manifest, binding every entry to an agent.
pub fn build_engine(
    manifest: &Manifest,
    config: RuntimeConfig,
    simulated_latency: Duration,
) -> vigil_core::Result<Engine> {
    let registry = manifest.into_registry()?;
    Engine::builder(registry)
        .agents(agents::bind_manifest(manifest, simulated_latency))
        .config(config)
        .build()
}

/// Run the Vigil node server.
pub async fn run_server(node: NodeConfig) -> anyhow::Result<()> {
    info!("🚀 Vigil Node starting...");

    let manifest = node.load_manifest()?;
    let runtime_config = RuntimeConfig::from_env()?;
    let engine = build_engine(&manifest, runtime_config, node.simulated_latency)?;
    let engine = lifecycle::initialize(engine)?;

    let state = AppState::new(engine).with_retention(node.run_retention);
    let app = create_router(state);

    info!("🌐 Listening on http://{}", node.addr);

    let listener = TcpListener::bind(node.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    lifecycle::shutdown()?;
    Ok(())
}

/// Create the API router.
fn create_router(state: AppState) -> Router {
    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health and metrics
        .route("/health", get(api::health::health_check))
        .route("/api/v1/metrics", get(api::health::metrics))

        // Registry and planning
        .route("/api/v1/registry", get(api::plan::get_registry))
        .route("/api/v1/plan", post(api::plan::create_plan))

        // Runs
        .route("/api/v1/runs", post(api::runs::submit_run))
        .route("/api/v1/runs", get(api::runs::list_runs))
        .route("/api/v1/runs/:id", get(api::runs::get_run))
        .route("/api/v1/runs/:id", delete(api::runs::cancel_run))
        .route("/api/v1/runs/:id/drift", post(api::runs::report_drift))
        .route("/api/v1/runs/:id/replan", post(api::runs::replan_run))

        // WebSocket events
        .route("/ws/events", get(api::ws::event_stream))

        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let node = NodeConfig::from_env()?;
    run_server(node).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::{header, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};

    fn app_state(latency: Duration) -> AppState {
        let manifest = Manifest::from_json(DEFAULT_MANIFEST).unwrap();
        let engine = build_engine(&manifest, RuntimeConfig::default(), latency).unwrap();
        AppState::new(Arc::new(engine))
    }

    fn server() -> TestServer {
        TestServer::new(create_router(app_state(Duration::from_millis(5)))).unwrap()
    }

    async fn wait_for_trace(server: &TestServer, run_id: &str) -> Value {
        for _ in 0..100 {
            let run: Value = server.get(&format!("/api/v1/runs/{}", run_id)).await.json();
            if !run["trace"].is_null() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("run {} did not finish", run_id);
    }

    #[test]
    fn test_default_manifest_builds() {
        let manifest = Manifest::from_json(DEFAULT_MANIFEST).unwrap();
        assert_eq!(manifest.agents.len(), 6);
        assert!(build_engine(&manifest, RuntimeConfig::default(), Duration::ZERO).is_ok());
    }

    #[tokio::test]
    async fn test_health() {
        let server = server();
        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["actions"], 6);
    }

    #[tokio::test]
    async fn test_registry_lists_actions() {
        let server = server();
        let body: Value = server.get("/api/v1/registry").await.json();
        let ids: Vec<&str> = body["actions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["id"].as_str().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec!["classify", "explain", "intake", "preprocess", "report", "safetyCalibrate"]
        );
        assert_eq!(body["initialState"]["consent"], true);
    }

    #[tokio::test]
    async fn test_plan_endpoint() {
        let server = server();
        let response = server
            .post("/api/v1/plan")
            .json(&json!({ "goal": { "hasResult": true } }))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["plan"]["totalCost"], 2.0);
        assert_eq!(body["plan"]["steps"][0]["actionId"], "intake");
        assert_eq!(body["plan"]["steps"][1]["actionId"], "classify");
        assert_eq!(body["fingerprint"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_plan_unknown_goal_fact() {
        let server = server();
        let response = server
            .post("/api/v1/plan")
            .json(&json!({ "goal": { "hasDiagnosis": true } }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        let body: Value = response.json();
        assert_eq!(body["error"], "planner_no_solution");
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let server = server();
        let response = server
            .post("/api/v1/runs")
            .json(&json!({ "goal": { "reportReady": true } }))
            .await;
        response.assert_status(StatusCode::CREATED);

        let body: Value = response.json();
        let run_id = body["runId"].as_str().unwrap().to_string();

        let run = wait_for_trace(&server, &run_id).await;
        assert_eq!(run["status"], "completed");
        assert_eq!(run["trace"]["runId"], run_id.as_str());
        assert_eq!(run["trace"]["finalWorldState"]["reportReady"], true);

        let list: Value = server.get("/api/v1/runs").await.json();
        assert_eq!(list.as_array().unwrap().len(), 1);

        let metrics: Value = server.get("/api/v1/metrics").await.json();
        assert_eq!(metrics["runs_completed"], 1);

        server
            .delete(&format!("/api/v1/runs/{}", run_id))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_replan_live_run() {
        let server = TestServer::new(create_router(app_state(Duration::from_millis(200)))).unwrap();
        let body: Value = server
            .post("/api/v1/runs")
            .json(&json!({ "goal": { "reportReady": true } }))
            .await
            .json();
        let run_id = body["runId"].as_str().unwrap().to_string();

        let response = server
            .post(&format!("/api/v1/runs/{}/replan", run_id))
            .json(&json!({ "set": { "consent": true } }))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        let steps = body["plan"]["steps"].as_array().unwrap();
        assert_eq!(steps.last().unwrap()["actionId"], "report");
        assert_eq!(body["plan"]["goal"]["reportReady"], true);
        assert_eq!(body["plan"]["start"]["consent"], true);

        let run = wait_for_trace(&server, &run_id).await;
        assert_eq!(run["status"], "completed");
        server
            .post(&format!("/api/v1/runs/{}/replan", run_id))
            .json(&json!({ "set": { "consent": true } }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_finished_runs_are_evicted_past_retention() {
        let state = app_state(Duration::from_millis(5)).with_retention(1);
        let server = TestServer::new(create_router(state)).unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let body: Value = server
                .post("/api/v1/runs")
                .json(&json!({ "goal": { "hasResult": true } }))
                .await
                .json();
            let run_id = body["runId"].as_str().unwrap().to_string();
            wait_for_trace(&server, &run_id).await;
            ids.push(run_id);
        }

        let list: Value = server.get("/api/v1/runs").await.json();
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["runId"], ids[1].as_str());
        server
            .get(&format!("/api/v1/runs/{}", ids[0]))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_stream_without_upgrade_leaves_no_subscription() {
        let state = app_state(Duration::from_millis(5));
        let server = TestServer::new(create_router(state.clone())).unwrap();

        let _ = server
            .get("/ws/events")
            .add_header(header::CONNECTION, HeaderValue::from_static("upgrade"))
            .add_header(header::UPGRADE, HeaderValue::from_static("websocket"))
            .add_header(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"))
            .add_header(
                header::SEC_WEBSOCKET_KEY,
                HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(state.engine.hub().subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let server = server();
        let id = uuid::Uuid::new_v4();
        server
            .get(&format!("/api/v1/runs/{}", id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .post(&format!("/api/v1/runs/{}/drift", id))
            .json(&json!({ "set": { "consent": false } }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
