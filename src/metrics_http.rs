//! Optional `/metrics` / `/status` HTTP endpoint (SPEC_FULL A
//! "Metrics/diagnostics"): ambient observability in `siem_consumer`'s
//! idiom (its own `get_metrics`/`get_status` handlers bound to port
//! 9091), gated behind the `metrics-http` feature so the default build
//! exposes no implicit HTTP surface beyond what spec.md names.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::metrics::Counters;
use crate::resolver::ResolverEngine;

#[derive(Clone)]
struct AppState {
    counters: Arc<Counters>,
    engine: Arc<dyn ResolverEngine>,
}

async fn get_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "queued": state.counters.queued(),
        "processed": state.counters.processed(),
        "errors": state.counters.errors(),
    }))
}

async fn get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active_config_id = state.engine.get_active_config_id().ok();
    Json(json!({
        "queued": state.counters.queued(),
        "processed": state.counters.processed(),
        "active_config_id": active_config_id,
    }))
}

/// Binds `/metrics` and `/status` on `bind_addr` and serves until the
/// task is dropped; spawned as a fire-and-forget background task from
/// `main`, matching the teacher's `tokio::spawn(async { axum::serve(...) })`.
pub async fn serve(bind_addr: &str, counters: Arc<Counters>, engine: Arc<dyn ResolverEngine>) -> anyhow::Result<()> {
    let state = AppState { counters, engine };
    let app = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/status", get(get_status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    log::info!(
        "{}",
        crate::logmsg::info(0, format!("metrics server listening on http://{bind_addr}/metrics and /status"))
    );
    axum::serve(listener, app).await?;
    Ok(())
}
