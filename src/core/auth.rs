use crate::core::error::ApiError;
use crate::core::state::AppState;
use crate::store::{self, Filter, Model, TtlPolicy};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Advisor,
    Customer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Authenticated caller resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct Caller {
    pub profile_id: Uuid,
    pub full_name: String,
    pub role: Role,
}

impl Caller {
    pub fn is_advisor(&self) -> bool {
        self.role == Role::Advisor
    }

    pub fn require_advisor(&self) -> Result<(), ApiError> {
        if self.is_advisor() {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;

        let mut conn = state.conn.get()?;
        let filter = Filter::from_doc(&serde_json::json!({
            "apiToken": token,
            "isActive": true,
        }))?;
        // Token lookups are hot and profiles change rarely; staleness is
        // bounded by the configured TTL.
        let doc = store::get_one_cached(
            &mut conn,
            Model::Profile,
            &filter,
            &["profiles".to_string()],
            TtlPolicy::Seconds(state.config.cache.default_ttl_secs),
            state.config.cache.enabled,
        )?
        .ok_or(ApiError::Unauthorized)?;
        let profile: Profile = serde_json::from_value(doc).map_err(|e| {
            log::error!("profile row failed to deserialize: {e}");
            ApiError::Internal
        })?;

        Ok(Caller {
            profile_id: profile.id,
            full_name: profile.full_name,
            role: profile.role,
        })
    }
}
