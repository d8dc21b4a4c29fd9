use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use crucible_bus::EventBus;
use crucible_domain::EvaluationId;
use crucible_queue::TaskQueue;
use crucible_store::DurableStore;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Readiness additionally proves the durable store is reachable.
pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.durable.list_non_terminal().await?;
    Ok(StatusCode::OK)
}

pub async fn get_pool(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.pool.snapshot().await;
    let slots: Vec<Value> = snapshot
        .into_iter()
        .map(|(slot, holder)| json!({ "slot": slot.0, "held_by": holder.map(|id| id.to_string()) }))
        .collect();
    Json(json!({ "slots": slots }))
}

pub async fn get_queue(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let depth = state.queue.depth().await?;
    Ok(Json(json!(depth)))
}

pub async fn get_evaluation(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let eval_id = EvaluationId::from_string(id.clone());
    let evaluation = state
        .durable
        .get_evaluation(&eval_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("evaluation '{id}' not found")))?;
    Ok(Json(json!(evaluation)))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub evaluation_id: String,
}

const TAIL_WINDOW: Duration = Duration::from_millis(500);

/// Best-effort live tail: subscribes and returns whatever arrives within a
/// short window. There is no durable backlog on the bus (see
/// `crucible_bus::EventBus`'s own doc comment), so this can never answer
/// "what already happened" — only "what's happening right now".
pub async fn get_events(State(state): State<AppState>, Query(q): Query<EventsQuery>) -> Result<Json<Value>, ApiError> {
    let eval_id = EvaluationId::from_string(q.evaluation_id);
    let mut stream = state.bus.subscribe(&eval_id).await?;

    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + TAIL_WINDOW;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(event)) => events.push(event),
            _ => break,
        }
    }

    Ok(Json(json!({ "events": events })))
}
