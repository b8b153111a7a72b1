//! HTTP surface: inbound webhook, approval decisions, approval inbox.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use valet_domain::InboundMessage;
use valet_store::{ApprovalDecision, ApprovalRecord, DecideOutcome, Store};

use crate::turn_loop::TurnRouter;

#[derive(Clone)]
pub struct AppState {
    pub turns: Arc<TurnRouter>,
    pub store: Arc<Store>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/inbound", post(inbound))
        .route("/approvals/{token}/confirm", post(confirm))
        .route("/approvals/{token}/reject", post(reject))
        .route("/approvals/pending", get(pending))
        .route("/approvals", get(history))
        .route("/outbox/{user_key}", get(outbox))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn inbound(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> Result<Json<Value>, StatusCode> {
    match state.turns.handle_inbound(&message).await {
        Ok(outbound) => Ok(Json(json!({"ok": true, "reply": outbound.text}))),
        Err(error) => {
            tracing::error!(%error, "inbound handling failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn confirm(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    decide(&state.store, &token, ApprovalDecision::Approve)
}

async fn reject(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    decide(&state.store, &token, ApprovalDecision::Reject)
}

/// Invalid, expired, and already-decided tokens are indistinguishable from
/// the outside: all answer 404.
fn decide(
    store: &Store,
    token: &str,
    decision: ApprovalDecision,
) -> Result<Json<Value>, StatusCode> {
    match store.decide_approval(token, decision) {
        Ok(DecideOutcome::Applied(record)) => {
            Ok(Json(json!({"ok": true, "approvalId": record.id})))
        }
        Ok(_) => Err(StatusCode::NOT_FOUND),
        Err(error) => {
            tracing::error!(%error, "approval decision failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
struct InboxQuery {
    person_id: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

async fn pending(
    State(state): State<AppState>,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Value>, StatusCode> {
    let records = state
        .store
        .list_pending_approvals(Some(&query.person_id))
        .map_err(internal)?;
    Ok(Json(json!({"approvals": render(&records)})))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Value>, StatusCode> {
    let records = state
        .store
        .list_approvals(&query.person_id, query.limit)
        .map_err(internal)?;
    Ok(Json(json!({"approvals": render(&records)})))
}

/// Drains queued web-channel messages (worker-driven completions) for one
/// embedding client.
async fn outbox(
    State(state): State<AppState>,
    Path(user_key): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let messages = state.store.drain_web_outbound(&user_key).map_err(internal)?;
    Ok(Json(json!({"messages": messages})))
}

fn render(records: &[ApprovalRecord]) -> Vec<Value> {
    records
        .iter()
        .map(|record| {
            json!({
                "id": record.id,
                "actionType": record.action_type,
                "status": record.status.as_str(),
                "toolName": record.tool_name,
                "originChannel": record.origin_channel,
                "createdAt": record.created_at,
            })
        })
        .collect()
}

fn internal(error: anyhow::Error) -> StatusCode {
    tracing::error!(%error, "approval listing failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
