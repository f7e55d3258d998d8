//! The optional HTTP control surface: a thin REST mapping onto cluster
//! verbs (§6), built on `axum` behind the `server` feature.

use crate::cluster::{self, ClusterResult};
use crate::context::{ClusterContext, MachineryConfig};
use crate::errors::Result;
use crate::image::CachePolicy;
use crate::model::Cluster;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Shared state handed to every route handler: a resolved context and the
/// cluster it manages, built once at server startup (§6 server command).
#[derive(Clone)]
pub struct ServerState {
    ctx: Arc<ClusterContext>,
    cluster: Arc<Cluster>,
}

impl ServerState {
    /// Load the descriptor at `path` and resolve tool adapters per `config`.
    pub fn new(path: &Path, config: MachineryConfig) -> Result<Self> {
        let cluster = Cluster::load(path)?;
        let ctx = ClusterContext::new(path, config)?;
        Ok(Self {
            ctx: Arc::new(ctx),
            cluster: Arc::new(cluster),
        })
    }

    fn selected(&self, patterns: &[String]) -> Vec<String> {
        cluster::select_machines(&self.cluster, patterns)
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Request body for `POST /cluster/up` and `POST /cluster/destroy`.
#[derive(Debug, Deserialize)]
pub struct PatternsRequest {
    /// Glob patterns selecting the target machines; empty means all.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Per-machine outcome as rendered in an HTTP response.
#[derive(Debug, Serialize)]
pub struct MachineStatus {
    /// Lifecycle state name, or `"failed"`.
    pub state: String,
    /// Error detail, present only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body shape for cluster operations (§6: `{status, per_machine}`).
#[derive(Debug, Serialize)]
pub struct ClusterResponse {
    /// `"ok"` or `"partial"`.
    pub status: String,
    /// Per-machine outcomes, keyed by logical name.
    pub per_machine: HashMap<String, MachineStatus>,
}

impl From<ClusterResult> for ClusterResponse {
    fn from(result: ClusterResult) -> Self {
        let status = if result.machines.iter().all(|m| m.success) {
            "ok"
        } else {
            "partial"
        };
        let per_machine = result
            .machines
            .into_iter()
            .map(|m| {
                let status = if m.success {
                    MachineStatus { state: "running".to_string(), error: None }
                } else {
                    MachineStatus { state: "failed".to_string(), error: m.error_detail }
                };
                (m.machine, status)
            })
            .collect();
        Self { status: status.to_string(), per_machine }
    }
}

async fn cluster_up(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<PatternsRequest>,
) -> Json<ClusterResponse> {
    let machines = state.selected(&request.patterns);
    let max_concurrency = cluster::default_concurrency(machines.len());
    let cache_policy = CachePolicy::from_flag(state.ctx.config.cache.as_deref());
    let result = cluster::up(state.ctx.clone(), state.cluster.clone(), machines, cache_policy, max_concurrency).await;
    Json(result.into())
}

async fn cluster_destroy(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<PatternsRequest>,
) -> Json<ClusterResponse> {
    let machines = state.selected(&request.patterns);
    let max_concurrency = cluster::default_concurrency(machines.len());
    let result = cluster::destroy(state.ctx.clone(), state.cluster.clone(), machines, max_concurrency).await;
    Json(result.into())
}

async fn cluster_ls(State(state): State<Arc<ServerState>>) -> Json<Vec<String>> {
    Json(state.selected(&[]))
}

async fn cluster_env(State(state): State<Arc<ServerState>>) -> Json<std::collections::BTreeMap<String, String>> {
    Json(cluster::env(&state.ctx).unwrap_or_default())
}

/// Build the router exposing the `server` command's REST surface.
#[must_use]
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/cluster/up", post(cluster_up))
        .route("/cluster/destroy", post(cluster_destroy))
        .route("/cluster/ls", get(cluster_ls))
        .route("/cluster/env", get(cluster_env))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MachineResult;

    #[test]
    fn cluster_response_status_reflects_partial_failure() {
        let result = ClusterResult {
            machines: vec![
                MachineResult { machine: "a".to_string(), success: true, error_category: None, error_detail: None },
                MachineResult { machine: "b".to_string(), success: false, error_category: Some("NetworkError"), error_detail: Some("timeout".to_string()) },
            ],
        };
        let response: ClusterResponse = result.into();
        assert_eq!(response.status, "partial");
        assert_eq!(response.per_machine["a"].state, "running");
        assert_eq!(response.per_machine["b"].state, "failed");
    }
}
