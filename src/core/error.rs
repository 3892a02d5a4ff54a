use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Success envelope: every JSON endpoint returns `{ "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiData<T> {
    pub data: T,
}

impl<T> ApiData<T> {
    pub fn new(data: T) -> Json<Self> {
        Json(Self { data })
    }
}

/// Failure envelope: `{ "error": "...", "code"?: "..." }`.
///
/// The unprovisioned-schema case carries the Postgres error code so setup
/// pages can string-match it and render migration instructions instead of a
/// generic failure banner.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error("advisor access required")]
    Forbidden,
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("required tables are not provisioned; run migrations")]
    SchemaNotProvisioned,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn missing_field(field: &str) -> Self {
        Self::Validation(format!("missing required field: {field}"))
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SchemaNotProvisioned => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            Self::SchemaNotProvisioned => Some("42P01"),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.code() {
            Some(code) => json!({ "error": self.to_string(), "code": code }),
            None => json!({ "error": self.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_undefined_table() {
            return Self::SchemaNotProvisioned;
        }
        match err {
            StoreError::UnsupportedOperator(_)
            | StoreError::InvalidFilter(_)
            | StoreError::EmptyChanges => Self::Validation(err.to_string()),
            other => {
                log::error!("store error: {other}");
                Self::Internal
            }
        }
    }
}

impl From<diesel::r2d2::PoolError> for ApiError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        log::error!("database pool error: {err}");
        Self::Internal
    }
}
