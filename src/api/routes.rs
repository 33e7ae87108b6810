//! Route handlers. Thin: decode, call the classifier or store, wrap.

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::{ApiError, ApiState, ok};
use crate::error::ThreadClassificationError;
use crate::graph::VocabularyEntry;
use crate::mail::{EmailLabel, EmailThread};
use crate::pipeline::{BulkItem, BulkOptions, ClassificationResult};
use crate::rules::{RuleDraft, RuleUpdate};

// ── Health ──────────────────────────────────────────────────────────────

pub(super) async fn health() -> impl IntoResponse {
    ok(
        StatusCode::OK,
        serde_json::json!({
            "status": "ok",
            "service": "graph-classifier"
        }),
    )
}

// ── Classification ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ClassifyThreadRequest {
    thread: EmailThread,
}

pub(super) async fn classify_thread(
    State(state): State<ApiState>,
    Json(body): Json<ClassifyThreadRequest>,
) -> Result<Response, ApiError> {
    let result = state.classifier.classify_thread(&body.thread).await?;
    Ok(ok(StatusCode::OK, result))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ClassifyBulkRequest {
    threads: Vec<EmailThread>,
    #[serde(default)]
    concurrency: Option<usize>,
    #[serde(default)]
    thread_timeout_ms: Option<u64>,
    #[serde(default)]
    bulk_timeout_ms: Option<u64>,
}

/// One slot of a bulk response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkItemBody {
    thread_id: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ThreadClassificationError>,
}

impl From<BulkItem> for BulkItemBody {
    fn from(item: BulkItem) -> Self {
        match item {
            Ok(result) => Self {
                thread_id: result.thread_id.clone(),
                success: true,
                result: Some(result),
                error: None,
            },
            Err(error) => Self {
                thread_id: error.thread_id.clone(),
                success: false,
                result: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkBody {
    items: Vec<BulkItemBody>,
    cancelled: bool,
    timed_out: bool,
}

pub(super) async fn classify_bulk(
    State(state): State<ApiState>,
    Json(body): Json<ClassifyBulkRequest>,
) -> Result<Response, ApiError> {
    if body.concurrency == Some(0) {
        return Err(ApiError::bad_request("invalid_request", "concurrency must be at least 1"));
    }
    let options = BulkOptions {
        concurrency: body.concurrency,
        thread_timeout: body.thread_timeout_ms.map(Duration::from_millis),
        bulk_timeout: body.bulk_timeout_ms.map(Duration::from_millis),
    };

    // Dropping the request future aborts the workers, so nothing cancels this token.
    let outcome = state
        .classifier
        .classify_bulk(body.threads, options, CancellationToken::new())
        .await?;

    let body = BulkBody {
        cancelled: outcome.cancelled,
        timed_out: outcome.timed_out,
        items: outcome.items.into_iter().map(BulkItemBody::from).collect(),
    };
    Ok(ok(StatusCode::OK, body))
}

// ── Rules ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListRulesQuery {
    #[serde(default)]
    active_only: bool,
}

fn parse_rule_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::bad_request("invalid_request", "Invalid rule ID"))
}

pub(super) async fn list_rules(
    State(state): State<ApiState>,
    Query(query): Query<ListRulesQuery>,
) -> Response {
    ok(StatusCode::OK, state.store.list(query.active_only).await)
}

pub(super) async fn create_rule(
    State(state): State<ApiState>,
    Json(draft): Json<RuleDraft>,
) -> Result<Response, ApiError> {
    let rule = state.store.create(draft).await?;
    Ok(ok(StatusCode::CREATED, rule))
}

pub(super) async fn get_rule(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let id = parse_rule_id(&id)?;
    match state.store.get(id).await {
        Some(rule) => Ok(ok(StatusCode::OK, rule)),
        None => Err(ApiError::not_found(format!("Rule {id} not found"))),
    }
}

pub(super) async fn update_rule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<RuleUpdate>,
) -> Result<Response, ApiError> {
    let id = parse_rule_id(&id)?;
    let rule = state.store.update(id, update).await?;
    Ok(ok(StatusCode::OK, rule))
}

pub(super) async fn delete_rule(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let id = parse_rule_id(&id)?;
    state.store.delete(id).await?;
    info!(rule_id = %id, "Rule deleted via API");
    Ok(ok(StatusCode::OK, serde_json::json!({ "deleted": true })))
}

// ── Labels & vocabulary ─────────────────────────────────────────────────

pub(super) async fn list_labels(State(state): State<ApiState>) -> Response {
    ok(StatusCode::OK, state.store.labels().await)
}

pub(super) async fn upsert_label(
    State(state): State<ApiState>,
    Json(label): Json<EmailLabel>,
) -> Result<Response, ApiError> {
    let label = state.store.upsert_label(label).await?;
    Ok(ok(StatusCode::OK, label))
}

pub(super) async fn list_vocabulary(State(state): State<ApiState>) -> Response {
    ok(StatusCode::OK, state.store.vocabulary().await)
}

pub(super) async fn add_vocabulary(
    State(state): State<ApiState>,
    Json(entry): Json<VocabularyEntry>,
) -> Result<Response, ApiError> {
    let entry = state.store.add_vocabulary(entry).await?;
    Ok(ok(StatusCode::OK, entry))
}
