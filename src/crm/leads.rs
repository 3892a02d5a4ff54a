//! Lead pipeline.
//!
//! Leads move through a fixed status vocabulary. Transitions outside the
//! standard table are applied anyway but flagged: a warning is logged and the
//! audit interaction carries `outOfBand: true`, so pipeline reports can find
//! them without the API refusing an advisor who knows better.

use crate::core::auth::Caller;
use crate::core::error::{ApiData, ApiError};
use crate::core::state::AppState;
use crate::{effects, notify, store};
use crate::store::{Filter, Model, QueryOptions, TtlPolicy};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use diesel::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Quoting,
    QuoteSent,
    Negotiating,
    AwaitingPayment,
    Paid,
    Won,
    Lost,
    Inactive,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Quoting => "quoting",
            Self::QuoteSent => "quote_sent",
            Self::Negotiating => "negotiating",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Paid => "paid",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Inactive => "inactive",
        }
    }

    /// Standard pipeline transitions. Anything else is out of band.
    pub fn allows(&self, next: LeadStatus) -> bool {
        use LeadStatus::*;
        match self {
            New => matches!(next, Contacted | Quoting | Lost | Inactive),
            Contacted => matches!(next, Quoting | Negotiating | Lost | Inactive),
            Quoting => matches!(next, QuoteSent | Negotiating | Lost | Inactive),
            QuoteSent => matches!(next, Negotiating | AwaitingPayment | Won | Lost | Inactive),
            Negotiating => matches!(next, Quoting | AwaitingPayment | Won | Lost | Inactive),
            AwaitingPayment => matches!(next, Paid | Lost),
            Paid => matches!(next, Won),
            Won => false,
            Lost | Inactive => matches!(next, Contacted),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Website,
    Whatsapp,
    Instagram,
    Facebook,
    Referral,
    WalkIn,
    Phone,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestType {
    Flight,
    Hotel,
    Package,
    Tour,
    Insurance,
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadRequest {
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub source: Option<LeadSource>,
    pub interest_type: Option<InterestType>,
    pub interest_details: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteIntentRequest {
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub source: Option<LeadSource>,
    pub interest_type: Option<InterestType>,
    pub interest_details: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: LeadStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub advisor_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertLeadRequest {
    pub booking_type: Option<String>,
    pub booking_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadListQuery {
    pub status: Option<LeadStatus>,
    pub source: Option<LeadSource>,
    pub advisor_id: Option<Uuid>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

fn lead_status_of(doc: &Value) -> Option<LeadStatus> {
    serde_json::from_value(doc.get("status")?.clone()).ok()
}

/// Append-only audit record; runs off the request path and never fails the
/// triggering operation.
fn append_interaction(
    pool: crate::core::utils::DbPool,
    effect: &'static str,
    lead_id: Uuid,
    advisor_id: Option<Uuid>,
    kind: &'static str,
    content: String,
    metadata: Value,
) {
    effects::spawn_blocking(effect, move || {
        let mut conn = pool.get()?;
        store::create_one(
            &mut conn,
            Model::LeadInteraction,
            &json!({
                "id": Uuid::new_v4(),
                "leadId": lead_id,
                "advisorId": advisor_id,
                "kind": kind,
                "content": content,
                "metadata": metadata,
            }),
        )?;
        Ok(())
    });
}

/// Required fields for an advisor-created lead; the 400 names the first
/// missing one and nothing is inserted.
fn validate_create(req: &CreateLeadRequest) -> Result<(String, LeadSource, InterestType), ApiError> {
    let contact_name = req
        .contact_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::missing_field("contactName"))?
        .to_string();
    let source = req.source.ok_or_else(|| ApiError::missing_field("source"))?;
    let interest_type = req
        .interest_type
        .ok_or_else(|| ApiError::missing_field("interestType"))?;
    Ok((contact_name, source, interest_type))
}

pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateLeadRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let (contact_name, source, interest_type) = validate_create(&req)?;

    let mut conn = state.conn.get()?;
    let lead = store::create_one(
        &mut conn,
        Model::Lead,
        &json!({
            "id": Uuid::new_v4(),
            "contactName": contact_name,
            "contactEmail": req.contact_email,
            "contactPhone": req.contact_phone,
            "source": source,
            "status": LeadStatus::New,
            "interestType": interest_type,
            "interestDetails": req.interest_details,
            "metadata": req.metadata.unwrap_or_else(|| json!({})),
        }),
    )?;
    store::invalidate(&["leads".to_string()]);

    let lead_id = parse_id(&lead)?;
    append_interaction(
        state.conn.clone(),
        "lead_created_interaction",
        lead_id,
        Some(caller.profile_id),
        "system",
        format!("Lead captured from {}", source_label(source)),
        json!({}),
    );

    if let (Some(email_cfg), Some(to)) = (state.config.email.clone(), lead["contactEmail"].as_str())
    {
        let to = to.to_string();
        let name = lead["contactName"].as_str().unwrap_or_default().to_string();
        effects::spawn_blocking("lead_welcome_email", move || {
            notify::send_welcome_email(&email_cfg, &to, &name)
        });
    }

    Ok(ApiData::new(lead))
}

/// Public quote-intent capture: anonymous, relaxed validation. Chat channels
/// post here, so the source defaults to whatsapp.
pub async fn create_quote_intent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QuoteIntentRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let contact_name = req
        .contact_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("contactName"))?;

    let mut conn = state.conn.get()?;
    let lead = store::create_one(
        &mut conn,
        Model::Lead,
        &json!({
            "id": Uuid::new_v4(),
            "contactName": contact_name,
            "contactEmail": req.contact_email,
            "contactPhone": req.contact_phone,
            "source": req.source.unwrap_or(LeadSource::Whatsapp),
            "status": LeadStatus::New,
            "interestType": req.interest_type.unwrap_or(InterestType::Other),
            "interestDetails": req.interest_details,
            "metadata": json!({}),
        }),
    )?;
    store::invalidate(&["leads".to_string()]);

    let lead_id = parse_id(&lead)?;
    append_interaction(
        state.conn.clone(),
        "lead_created_interaction",
        lead_id,
        None,
        "system",
        "Quote intent received".to_string(),
        json!({}),
    );

    Ok(ApiData::new(lead))
}

pub async fn update_lead_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let filter = Filter::empty().and_eq("id", json!(id));
    let current = store::get_one(&mut conn, Model::Lead, &filter)?
        .ok_or(ApiError::NotFound("lead"))?;
    let from = lead_status_of(&current).ok_or(ApiError::Internal)?;

    let standard = from.allows(req.status);
    if !standard {
        log::warn!(
            "lead {id}: out-of-band status transition {} -> {} by {}",
            from.as_str(),
            req.status.as_str(),
            caller.full_name
        );
    }

    let updated = store::update_one(
        &mut conn,
        Model::Lead,
        &filter,
        &json!({
            "status": req.status,
            "lastContactedAt": now_ts(),
            "updatedAt": now_ts(),
        }),
    )?
    .ok_or(ApiError::NotFound("lead"))?;
    store::invalidate(&["leads".to_string()]);

    append_interaction(
        state.conn.clone(),
        "lead_status_interaction",
        id,
        Some(caller.profile_id),
        "status_change",
        req.note
            .unwrap_or_else(|| format!("Status {} -> {}", from.as_str(), req.status.as_str())),
        json!({ "from": from, "to": req.status, "outOfBand": !standard }),
    );

    Ok(ApiData::new(updated))
}

pub async fn assign_lead(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    caller.require_advisor()?;

    let mut conn = state.conn.get()?;
    let filter = Filter::empty().and_eq("id", json!(id));
    let previous = store::get_one(&mut conn, Model::Lead, &filter)?
        .ok_or(ApiError::NotFound("lead"))?;
    let previous_advisor = previous["advisorId"].as_str().map(str::to_string);

    let updated = conn.transaction::<_, store::StoreError, _>(|conn| {
        let assigned = store::update_one(
            conn,
            Model::Lead,
            &filter,
            &json!({
                "advisorId": req.advisor_id,
                "assignedAt": now_ts(),
                "updatedAt": now_ts(),
            }),
        )?;
        // Fresh leads are considered contacted once an advisor picks them up.
        // Guarded on the current status so a later stage is never demoted.
        let promote = Filter::empty()
            .and_eq("id", json!(id))
            .and_eq("status", json!(LeadStatus::New.as_str()));
        let promoted = store::update_one(
            conn,
            Model::Lead,
            &promote,
            &json!({ "status": LeadStatus::Contacted, "lastContactedAt": now_ts() }),
        )?;
        Ok(promoted.or(assigned))
    })?;
    let updated = updated.ok_or(ApiError::NotFound("lead"))?;
    store::invalidate(&["leads".to_string()]);

    append_interaction(
        state.conn.clone(),
        "lead_assignment_interaction",
        id,
        Some(caller.profile_id),
        "assignment",
        format!("Assigned to advisor {}", req.advisor_id),
        json!({ "previousAdvisorId": previous_advisor, "advisorId": req.advisor_id }),
    );

    Ok(ApiData::new(updated))
}

pub async fn convert_lead(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<ConvertLeadRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    caller.require_advisor()?;
    let booking_type = req
        .booking_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("bookingType"))?;
    let booking_id = req
        .booking_id
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("bookingId"))?;

    let mut conn = state.conn.get()?;
    let filter = Filter::empty().and_eq("id", json!(id));
    let updated = store::update_one(
        &mut conn,
        Model::Lead,
        &filter,
        &json!({
            "status": LeadStatus::Won,
            "bookingType": booking_type,
            "bookingId": booking_id,
            "convertedAt": now_ts(),
            "updatedAt": now_ts(),
        }),
    )?
    .ok_or(ApiError::NotFound("lead"))?;
    store::invalidate(&["leads".to_string()]);

    append_interaction(
        state.conn.clone(),
        "lead_conversion_interaction",
        id,
        Some(caller.profile_id),
        "conversion",
        format!("Converted to booking {booking_id}"),
        json!({ "bookingType": updated["bookingType"], "bookingId": updated["bookingId"] }),
    );

    Ok(ApiData::new(updated))
}

pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Query(query): Query<LeadListQuery>,
) -> Result<Json<ApiData<Vec<Value>>>, ApiError> {
    let mut filter = Filter::empty();
    if let Some(status) = query.status {
        filter = filter.and_eq("status", json!(status));
    }
    if let Some(source) = query.source {
        filter = filter.and_eq("source", json!(source));
    }
    if let Some(advisor_id) = query.advisor_id {
        filter = filter.and_eq("advisorId", json!(advisor_id));
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filter = filter.and_contains("contactName", search);
    }

    let options = QueryOptions {
        order_by: Some("createdAt".to_string()),
        descending: true,
        limit: Some(query.limit.unwrap_or(100).clamp(1, 500)),
        offset: query.offset,
    };
    let mut conn = state.conn.get()?;
    let leads = store::get_many_cached(
        &mut conn,
        Model::Lead,
        &filter,
        &options,
        &["leads".to_string()],
        TtlPolicy::Seconds(state.config.cache.default_ttl_secs),
        state.config.cache.enabled,
    )?;
    Ok(ApiData::new(leads))
}

pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let lead = store::get_one(&mut conn, Model::Lead, &Filter::empty().and_eq("id", json!(id)))?
        .ok_or(ApiError::NotFound("lead"))?;
    Ok(ApiData::new(lead))
}

pub async fn list_interactions(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiData<Vec<Value>>>, ApiError> {
    let mut conn = state.conn.get()?;
    let options = QueryOptions {
        order_by: Some("createdAt".to_string()),
        ..Default::default()
    };
    let interactions = store::get_many(
        &mut conn,
        Model::LeadInteraction,
        &Filter::empty().and_eq("leadId", json!(id)),
        &options,
    )?;
    Ok(ApiData::new(interactions))
}

fn source_label(source: LeadSource) -> &'static str {
    match source {
        LeadSource::Website => "website",
        LeadSource::Whatsapp => "whatsapp",
        LeadSource::Instagram => "instagram",
        LeadSource::Facebook => "facebook",
        LeadSource::Referral => "referral",
        LeadSource::WalkIn => "walk_in",
        LeadSource::Phone => "phone",
        LeadSource::Email => "email",
    }
}

pub(crate) fn parse_id(doc: &Value) -> Result<Uuid, ApiError> {
    doc.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(ApiError::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_transitions() {
        assert!(LeadStatus::New.allows(LeadStatus::Contacted));
        assert!(LeadStatus::Quoting.allows(LeadStatus::QuoteSent));
        assert!(LeadStatus::AwaitingPayment.allows(LeadStatus::Paid));
        assert!(LeadStatus::Paid.allows(LeadStatus::Won));
        assert!(LeadStatus::Lost.allows(LeadStatus::Contacted));
    }

    #[test]
    fn test_out_of_band_transitions() {
        assert!(!LeadStatus::New.allows(LeadStatus::Won));
        assert!(!LeadStatus::Won.allows(LeadStatus::New));
        assert!(!LeadStatus::Paid.allows(LeadStatus::Lost));
    }

    #[test]
    fn test_status_wire_casing() {
        assert_eq!(
            serde_json::to_value(LeadStatus::QuoteSent).unwrap(),
            json!("quote_sent")
        );
        assert_eq!(
            serde_json::from_value::<LeadStatus>(json!("awaiting_payment")).unwrap(),
            LeadStatus::AwaitingPayment
        );
    }

    fn full_request() -> CreateLeadRequest {
        CreateLeadRequest {
            contact_name: Some("Ana Souza".to_string()),
            contact_email: Some("ana@example.com".to_string()),
            contact_phone: None,
            source: Some(LeadSource::Website),
            interest_type: Some(InterestType::Package),
            interest_details: None,
            metadata: None,
        }
    }

    #[test]
    fn test_create_validation_accepts_full_request() {
        let (name, source, interest) = validate_create(&full_request()).unwrap();
        assert_eq!(name, "Ana Souza");
        assert_eq!(source, LeadSource::Website);
        assert_eq!(interest, InterestType::Package);
    }

    #[test]
    fn test_create_validation_names_each_missing_field() {
        let mut req = full_request();
        req.contact_name = None;
        assert!(validate_create(&req).unwrap_err().to_string().contains("contactName"));

        let mut req = full_request();
        req.contact_name = Some("   ".to_string());
        assert!(validate_create(&req).unwrap_err().to_string().contains("contactName"));

        let mut req = full_request();
        req.source = None;
        assert!(validate_create(&req).unwrap_err().to_string().contains("source"));

        let mut req = full_request();
        req.interest_type = None;
        assert!(validate_create(&req).unwrap_err().to_string().contains("interestType"));
    }

    #[test]
    fn test_status_as_str_matches_serde() {
        for status in [
            LeadStatus::New,
            LeadStatus::QuoteSent,
            LeadStatus::AwaitingPayment,
            LeadStatus::Inactive,
        ] {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                json!(status.as_str())
            );
        }
    }
}
