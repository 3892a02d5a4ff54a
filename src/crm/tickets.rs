//! Post-sale support tickets.
//!
//! Tickets follow the lead model for transitions: any status write is
//! applied, but transitions outside the standard table are logged and
//! mirrored in the ticket's system message. Message threads are append-only;
//! internal notes are advisor-only and never shown to the customer surface.

use crate::core::auth::{Caller, Role};
use crate::core::error::{ApiData, ApiError};
use crate::core::state::AppState;
use crate::core::utils::DbPool;
use crate::{effects, notify, store};
use crate::store::{Filter, Model, QueryOptions, StoreError, TtlPolicy};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use diesel::{Connection, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    WaitingCustomer,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::WaitingCustomer => "waiting_customer",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    /// Standard flow; anything else is applied but flagged.
    pub fn allows(&self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        match self {
            Open => matches!(next, InProgress | WaitingCustomer | Resolved | Closed),
            InProgress => matches!(next, WaitingCustomer | Resolved | Closed),
            WaitingCustomer => matches!(next, InProgress | Resolved | Closed),
            Resolved => matches!(next, Closed | InProgress),
            Closed => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    BookingChange,
    Cancellation,
    Refund,
    Payment,
    Documentation,
    Complaint,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Customer,
    Advisor,
    System,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub booking_type: Option<String>,
    pub booking_id: Option<String>,
    pub subject: Option<String>,
    pub category: Option<TicketCategory>,
    pub priority: Option<TicketPriority>,
    pub description: Option<String>,
    /// Advisors may open a ticket on a customer's behalf.
    pub profile_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageRequest {
    pub content: Option<String>,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketStatusRequest {
    pub status: TicketStatus,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    pub rating: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoTicketRequest {
    pub booking_type: Option<String>,
    pub booking_id: Option<String>,
    pub profile_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListQuery {
    pub status: Option<TicketStatus>,
    pub category: Option<TicketCategory>,
    pub profile_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

fn next_ticket_number(conn: &mut PgConnection) -> Result<String, StoreError> {
    let count = store::count(conn, Model::SupportTicket, &Filter::empty())?;
    Ok(format!("TKT-{:06}", count + 1))
}

fn ticket_status_of(doc: &Value) -> Option<TicketStatus> {
    serde_json::from_value(doc.get("status")?.clone()).ok()
}

fn insert_message(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    author_type: AuthorType,
    author_id: Option<Uuid>,
    content: &str,
    is_internal: bool,
) -> Result<Value, StoreError> {
    store::create_one(
        conn,
        Model::TicketMessage,
        &json!({
            "id": Uuid::new_v4(),
            "ticketId": ticket_id,
            "authorType": author_type,
            "authorId": author_id,
            "content": content,
            "isInternal": is_internal,
        }),
    )
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateTicketRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let booking_type = req
        .booking_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("bookingType"))?;
    let booking_id = req
        .booking_id
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("bookingId"))?;
    let subject = req
        .subject
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("subject"))?;
    let category = req
        .category
        .ok_or_else(|| ApiError::missing_field("category"))?;

    let owner = match caller.role {
        Role::Customer => caller.profile_id,
        Role::Advisor => req.profile_id.unwrap_or(caller.profile_id),
    };

    let mut conn = state.conn.get()?;
    let ticket = conn.transaction::<_, StoreError, _>(|conn| {
        let ticket_number = next_ticket_number(conn)?;
        let ticket = store::create_one(
            conn,
            Model::SupportTicket,
            &json!({
                "id": Uuid::new_v4(),
                "ticketNumber": ticket_number,
                "bookingType": &booking_type,
                "bookingId": &booking_id,
                "profileId": owner,
                "subject": &subject,
                "category": category,
                "priority": req.priority.unwrap_or(TicketPriority::Normal),
                "status": TicketStatus::Open,
            }),
        )?;
        if let Some(description) = req.description.as_deref().filter(|d| !d.trim().is_empty()) {
            let author_type = match caller.role {
                Role::Customer => AuthorType::Customer,
                Role::Advisor => AuthorType::Advisor,
            };
            let ticket_id = parse_uuid(&ticket["id"]);
            if let Some(ticket_id) = ticket_id {
                insert_message(
                    conn,
                    ticket_id,
                    author_type,
                    Some(caller.profile_id),
                    description,
                    false,
                )?;
            }
        }
        Ok(ticket)
    })?;
    store::invalidate(&["tickets".to_string()]);

    if let Some(email_cfg) = state.config.email.clone() {
        let pool = state.conn.clone();
        let ticket_number = ticket["ticketNumber"].as_str().unwrap_or_default().to_string();
        let subj = subject.clone();
        effects::spawn_blocking("ticket_opened_email", move || {
            let mut conn = pool.get()?;
            let profile = store::get_one(
                &mut conn,
                Model::Profile,
                &Filter::empty().and_eq("id", json!(owner)),
            )?;
            if let Some(to) = profile.as_ref().and_then(|p| p["email"].as_str()) {
                notify::send_ticket_opened_email(&email_cfg, to, &ticket_number, &subj)?;
            }
            Ok(())
        });
    }

    Ok(ApiData::new(ticket))
}

pub async fn add_message(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMessageRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let content = req
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("content"))?;

    let mut conn = state.conn.get()?;
    let filter = Filter::empty().and_eq("id", json!(id));
    let ticket = store::get_one(&mut conn, Model::SupportTicket, &filter)?
        .ok_or(ApiError::NotFound("ticket"))?;

    let is_owner = ticket["profileId"].as_str() == Some(caller.profile_id.to_string().as_str());
    let author_type = match caller.role {
        Role::Advisor => AuthorType::Advisor,
        Role::Customer if is_owner => AuthorType::Customer,
        Role::Customer => return Err(ApiError::Forbidden),
    };
    if req.is_internal && author_type != AuthorType::Advisor {
        return Err(ApiError::Forbidden);
    }

    let message = insert_message(
        &mut conn,
        id,
        author_type,
        Some(caller.profile_id),
        &content,
        req.is_internal,
    )?;

    // A customer reply unblocks a waiting ticket; guarded so concurrent
    // advisor updates win.
    if author_type == AuthorType::Customer {
        let waiting = Filter::empty()
            .and_eq("id", json!(id))
            .and_eq("status", json!(TicketStatus::WaitingCustomer));
        store::update_one(
            &mut conn,
            Model::SupportTicket,
            &waiting,
            &json!({ "status": TicketStatus::InProgress, "updatedAt": now_ts() }),
        )?;
    }
    store::invalidate(&["tickets".to_string()]);

    Ok(ApiData::new(message))
}

pub async fn update_ticket_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTicketStatusRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    caller.require_advisor()?;

    let mut conn = state.conn.get()?;
    let filter = Filter::empty().and_eq("id", json!(id));
    let current = store::get_one(&mut conn, Model::SupportTicket, &filter)?
        .ok_or(ApiError::NotFound("ticket"))?;
    let from = ticket_status_of(&current).ok_or(ApiError::Internal)?;

    let standard = from.allows(req.status);
    if !standard {
        log::warn!(
            "ticket {id}: out-of-band status transition {} -> {} by {}",
            from.as_str(),
            req.status.as_str(),
            caller.full_name
        );
    }

    let mut changes = json!({ "status": req.status, "updatedAt": now_ts() });
    if req.status.is_settled() {
        changes["resolvedAt"] = json!(now_ts());
        if let Some(notes) = req.resolution_notes.as_deref().filter(|n| !n.trim().is_empty()) {
            changes["resolutionNotes"] = json!(notes);
        }
    }
    let updated = store::update_one(&mut conn, Model::SupportTicket, &filter, &changes)?
        .ok_or(ApiError::NotFound("ticket"))?;
    store::invalidate(&["tickets".to_string()]);

    let mirror = if standard {
        format!("Status changed from {} to {}", from.as_str(), req.status.as_str())
    } else {
        format!(
            "Status changed from {} to {} (out of band)",
            from.as_str(),
            req.status.as_str()
        )
    };
    let pool = state.conn.clone();
    effects::spawn_blocking("ticket_status_message", move || {
        let mut conn = pool.get()?;
        insert_message(&mut conn, id, AuthorType::System, None, &mirror, false)?;
        Ok(())
    });

    Ok(ApiData::new(updated))
}

/// Satisfaction is a 1..=5 score; anything else is a 400 with no mutation.
fn validate_rating(rating: Option<i64>) -> Result<i64, ApiError> {
    let rating = rating.ok_or_else(|| ApiError::missing_field("rating"))?;
    if !(1..=5).contains(&rating) {
        return Err(ApiError::Validation(
            "rating must be between 1 and 5".to_string(),
        ));
    }
    Ok(rating)
}

// The only statuses a ticket can be rated in; carried in the UPDATE filter.
const RATABLE: &[TicketStatus] = &[TicketStatus::Resolved, TicketStatus::Closed];

pub async fn rate_satisfaction(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<RatingRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let rating = validate_rating(req.rating)?;

    let mut conn = state.conn.get()?;
    let filter = Filter::empty().and_eq("id", json!(id));
    let ticket = store::get_one(&mut conn, Model::SupportTicket, &filter)?
        .ok_or(ApiError::NotFound("ticket"))?;
    if ticket["profileId"].as_str() != Some(caller.profile_id.to_string().as_str()) {
        return Err(ApiError::Forbidden);
    }

    let settled = Filter::empty().and_eq("id", json!(id)).and_in(
        "status",
        RATABLE.iter().map(|s| json!(s)).collect(),
    );
    let updated = store::update_one(
        &mut conn,
        Model::SupportTicket,
        &settled,
        &json!({ "satisfactionRating": rating, "updatedAt": now_ts() }),
    )?
    .ok_or_else(|| {
        ApiError::Validation("only resolved or closed tickets can be rated".to_string())
    })?;
    store::invalidate(&["tickets".to_string()]);

    Ok(ApiData::new(updated))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(query): Query<TicketListQuery>,
) -> Result<Json<ApiData<Vec<Value>>>, ApiError> {
    let mut filter = Filter::empty();
    // Customers only ever see their own tickets.
    if caller.is_advisor() {
        if let Some(profile_id) = query.profile_id {
            filter = filter.and_eq("profileId", json!(profile_id));
        }
    } else {
        filter = filter.and_eq("profileId", json!(caller.profile_id));
    }
    if let Some(status) = query.status {
        filter = filter.and_eq("status", json!(status));
    }
    if let Some(category) = query.category {
        filter = filter.and_eq("category", json!(category));
    }

    let options = QueryOptions {
        order_by: Some("createdAt".to_string()),
        descending: true,
        limit: Some(query.limit.unwrap_or(100).clamp(1, 500)),
        offset: query.offset,
    };
    let mut conn = state.conn.get()?;
    let tickets = store::get_many_cached(
        &mut conn,
        Model::SupportTicket,
        &filter,
        &options,
        &["tickets".to_string()],
        TtlPolicy::Seconds(state.config.cache.default_ttl_secs),
        state.config.cache.enabled,
    )?;
    Ok(ApiData::new(tickets))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let mut ticket = store::get_one(
        &mut conn,
        Model::SupportTicket,
        &Filter::empty().and_eq("id", json!(id)),
    )?
    .ok_or(ApiError::NotFound("ticket"))?;

    if !caller.is_advisor()
        && ticket["profileId"].as_str() != Some(caller.profile_id.to_string().as_str())
    {
        return Err(ApiError::Forbidden);
    }

    let mut message_filter = Filter::empty().and_eq("ticketId", json!(id));
    if !caller.is_advisor() {
        message_filter = message_filter.and_eq("isInternal", json!(false));
    }
    let messages = store::get_many(
        &mut conn,
        Model::TicketMessage,
        &message_filter,
        &QueryOptions {
            order_by: Some("createdAt".to_string()),
            ..Default::default()
        },
    )?;
    ticket["messages"] = json!(messages);

    Ok(ApiData::new(ticket))
}

/// Open a cancellation ticket from a booking flow. Best-effort: failures are
/// logged and counted, the cancellation itself is never blocked.
pub fn auto_create_for_cancellation(
    pool: DbPool,
    booking_type: String,
    booking_id: String,
    profile_id: Option<Uuid>,
    reason: Option<String>,
) {
    effects::spawn_blocking("auto_cancellation_ticket", move || {
        let mut conn = pool.get()?;
        let ticket = conn.transaction::<_, StoreError, _>(|conn| {
            let ticket_number = next_ticket_number(conn)?;
            let ticket = store::create_one(
                conn,
                Model::SupportTicket,
                &json!({
                    "id": Uuid::new_v4(),
                    "ticketNumber": ticket_number,
                    "bookingType": &booking_type,
                    "bookingId": &booking_id,
                    "profileId": profile_id,
                    "subject": format!("Cancellation of {booking_type} {booking_id}"),
                    "category": TicketCategory::Cancellation,
                    "priority": TicketPriority::High,
                    "status": TicketStatus::Open,
                }),
            )?;
            if let Some(reason) = reason.as_deref().filter(|r| !r.trim().is_empty()) {
                if let Some(ticket_id) = parse_uuid(&ticket["id"]) {
                    insert_message(
                        conn,
                        ticket_id,
                        AuthorType::System,
                        None,
                        &format!("Cancellation reason: {reason}"),
                        false,
                    )?;
                }
            }
            Ok(ticket)
        })?;
        store::invalidate(&["tickets".to_string()]);
        log::info!(
            "auto-created cancellation ticket {}",
            ticket["ticketNumber"].as_str().unwrap_or_default()
        );
        Ok(())
    });
}

pub async fn auto_create_ticket(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<AutoTicketRequest>,
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

    auto_create_for_cancellation(
        state.conn.clone(),
        booking_type,
        booking_id,
        req.profile_id,
        req.reason,
    );
    Ok(ApiData::new(json!({ "accepted": true })))
}

fn parse_uuid(value: &Value) -> Option<Uuid> {
    value.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_ticket_flow() {
        assert!(TicketStatus::Open.allows(TicketStatus::InProgress));
        assert!(TicketStatus::InProgress.allows(TicketStatus::WaitingCustomer));
        assert!(TicketStatus::WaitingCustomer.allows(TicketStatus::InProgress));
        assert!(TicketStatus::Resolved.allows(TicketStatus::Closed));
    }

    #[test]
    fn test_out_of_band_ticket_transitions() {
        assert!(!TicketStatus::Closed.allows(TicketStatus::Open));
        assert!(!TicketStatus::Resolved.allows(TicketStatus::WaitingCustomer));
    }

    #[test]
    fn test_settled_states() {
        assert!(TicketStatus::Resolved.is_settled());
        assert!(TicketStatus::Closed.is_settled());
        assert!(!TicketStatus::WaitingCustomer.is_settled());
    }

    #[test]
    fn test_category_wire_casing() {
        assert_eq!(
            serde_json::to_value(TicketCategory::BookingChange).unwrap(),
            json!("booking_change")
        );
        assert_eq!(
            serde_json::to_value(AuthorType::System).unwrap(),
            json!("system")
        );
    }

    #[test]
    fn test_rating_bounds() {
        assert_eq!(validate_rating(Some(1)).unwrap(), 1);
        assert_eq!(validate_rating(Some(5)).unwrap(), 5);
        for bad in [0, 6, -1, 100] {
            let err = validate_rating(Some(bad)).unwrap_err();
            assert!(err.to_string().contains("between 1 and 5"));
        }
        let err = validate_rating(None).unwrap_err();
        assert!(err.to_string().contains("rating"));
    }

    #[test]
    fn test_rating_guard_matches_settled_states() {
        for status in [
            TicketStatus::Open,
            TicketStatus::InProgress,
            TicketStatus::WaitingCustomer,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(RATABLE.contains(&status), status.is_settled());
        }
    }

    #[test]
    fn test_ticket_number_format() {
        assert_eq!(format!("TKT-{:06}", 7), "TKT-000007");
        assert_eq!(format!("TKT-{:06}", 123456), "TKT-123456");
    }
}
