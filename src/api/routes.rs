//! API route definitions.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use tracing::info;

use super::state::AppState;
use crate::config::RunConfig;
use crate::error::Result;
use crate::stats::{ResultRecord, RunId};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats/all", get(all_stats))
        .route("/stats/select", get(select_stats))
        .route("/stream/start", post(start_stream))
        .route("/config/update", post(update_config))
        .route("/config", get(get_config))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "schedule": state.engine.state(),
            "in_flight": state.engine.in_flight(),
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Records keyed by run ID, in store order (newest start time first).
struct StatsByRun(Vec<(RunId, ResultRecord)>);

impl Serialize for StatsByRun {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.0.len()))?;
        for (id, record) in &self.0 {
            map.serialize_entry(id, record)?;
        }
        map.end()
    }
}

async fn all_stats(State(state): State<AppState>) -> Result<Json<StatsByRun>> {
    let all = state.engine.all_stats().await?;
    Ok(Json(StatsByRun(all)))
}

#[derive(Debug, Deserialize)]
struct SelectParams {
    base_manifest_id: RunId,
}

async fn select_stats(
    State(state): State<AppState>,
    Query(params): Query<SelectParams>,
) -> Result<Json<ResultRecord>> {
    let record = state.engine.stats(&params.base_manifest_id).await?;
    Ok(Json(record))
}

async fn start_stream(
    State(state): State<AppState>,
    Json(config): Json<RunConfig>,
) -> Result<Json<Value>> {
    let id = state.engine.dispatch_run(config).await?;
    info!(run_id = %id, "Started streams on request");
    Ok(Json(json!({
        "success": true,
        "base_manifest_id": id,
    })))
}

async fn update_config(
    State(state): State<AppState>,
    Json(mut config): Json<RunConfig>,
) -> Result<()> {
    config.do_not_clear_stats = false;
    state.engine.set_config(config)
}

async fn get_config(State(state): State<AppState>) -> Json<RunConfig> {
    Json(state.engine.config().as_ref().clone())
}
