//! JSON-over-HTTP surface for the classifier and the rule store.
//!
//! Every response uses the same envelope:
//! `{ "success": bool, "data"?: .., "error"?: code, "message"?: .., "field"?: .. }`.

mod routes;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::error::{ClassifyError, EngineUnavailableError, RuleStoreError, ThreadErrorKind};
use crate::pipeline::Classifier;
use crate::rules::RuleStore;

/// State shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub classifier: Arc<Classifier>,
    pub store: Arc<RuleStore>,
}

/// Build the router with every classifier, rule and label route.
pub fn api_routes(classifier: Arc<Classifier>, store: Arc<RuleStore>) -> Router {
    let state = ApiState { classifier, store };

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/classify/thread", post(routes::classify_thread))
        .route("/api/classify/bulk", post(routes::classify_bulk))
        .route("/api/rules", get(routes::list_rules).post(routes::create_rule))
        .route(
            "/api/rules/{id}",
            get(routes::get_rule)
                .put(routes::update_rule)
                .delete(routes::delete_rule),
        )
        .route("/api/labels", get(routes::list_labels).post(routes::upsert_label))
        .route(
            "/api/vocabulary",
            get(routes::list_vocabulary).post(routes::add_vocabulary),
        )
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(Any)
        .allow_headers(Any)
}

// ── Envelope ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

/// Successful response carrying `data`.
pub(crate) fn ok<T: Serialize>(status: StatusCode, data: T) -> Response {
    let body = Envelope {
        success: true,
        data: Some(data),
        error: None,
        message: None,
        field: None,
    };
    (status, Json(body)).into_response()
}

/// A failed request, mapped onto a status code and error code.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    field: Option<String>,
}

impl ApiError {
    pub(crate) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
            field: None,
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
            field: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, code = self.code, message = %self.message, "Request failed");
        }
        let body: Envelope<()> = Envelope {
            success: false,
            data: None,
            error: Some(self.code),
            message: Some(self.message),
            field: self.field,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RuleStoreError> for ApiError {
    fn from(e: RuleStoreError) -> Self {
        let message = e.to_string();
        match e {
            RuleStoreError::Invalid(invalid) => Self {
                status: StatusCode::BAD_REQUEST,
                code: "invalid_rule",
                message,
                field: Some(invalid.field),
            },
            RuleStoreError::NotFound { .. } => Self::not_found(message),
            RuleStoreError::InvalidLabel { .. } => Self::bad_request("invalid_label", message),
            RuleStoreError::InvalidVocabulary { .. } => Self::bad_request("invalid_vocabulary", message),
            RuleStoreError::Database(_) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "storage_error",
                message,
                field: None,
            },
        }
    }
}

impl From<EngineUnavailableError> for ApiError {
    fn from(e: EngineUnavailableError) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "engine_unavailable",
            message: e.to_string(),
            field: None,
        }
    }
}

impl From<ClassifyError> for ApiError {
    fn from(e: ClassifyError) -> Self {
        match e {
            ClassifyError::Unavailable(e) => e.into(),
            ClassifyError::Thread(e) => {
                let status = match e.kind {
                    ThreadErrorKind::MalformedThread => StatusCode::BAD_REQUEST,
                    ThreadErrorKind::Timeout | ThreadErrorKind::NotDispatched | ThreadErrorKind::Internal => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                Self {
                    status,
                    code: e.kind.as_str(),
                    message: e.to_string(),
                    field: None,
                }
            }
        }
    }
}
