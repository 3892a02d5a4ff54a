//! Quotation lifecycle.
//!
//! Unlike leads, quotation transitions are hard-guarded: each action names
//! the statuses it is legal from, and the write is a single conditional
//! UPDATE whose filter carries the guard. No row updated means the guard
//! rejected the call (or the quotation does not exist), never a lost race.
//!
//! Cascades onto the attached lead run in the same transaction as the
//! quotation write; audit interactions and email go out after commit as
//! best-effort effects.

use crate::core::auth::Caller;
use crate::core::error::{ApiData, ApiError};
use crate::core::state::AppState;
use crate::crm::leads::{parse_id, LeadStatus};
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
pub enum QuotationStatus {
    Draft,
    Sent,
    Viewed,
    Accepted,
    Rejected,
    Converted,
    Expired,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Converted => "converted",
            Self::Expired => "expired",
        }
    }
}

// Guard sets: the statuses each action is legal from. Resending is allowed,
// so a sent quotation can be sent again through another channel.
pub const SENDABLE: &[&str] = &["draft", "sent"];
pub const VIEWABLE: &[&str] = &["sent"];
pub const ACCEPTABLE: &[&str] = &["sent", "viewed"];
pub const REJECTABLE: &[&str] = &["sent", "viewed", "accepted"];
pub const CONVERTIBLE: &[&str] = &["sent", "viewed", "accepted"];
/// Everything but `converted`: once a quotation backs a booking its lines
/// are frozen.
pub const EDITABLE: &[&str] = &["draft", "sent", "viewed", "accepted", "rejected", "expired"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuotationRequest {
    pub lead_id: Option<Uuid>,
    #[serde(default)]
    pub customer: Option<Value>,
    pub items: Option<Vec<QuotationItem>>,
    #[serde(default)]
    pub taxes: f64,
    #[serde(default)]
    pub fees: f64,
    #[serde(default)]
    pub discount_amount: f64,
    pub currency: Option<String>,
    pub valid_until: Option<String>,
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub via: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub booking_type: Option<String>,
    pub booking_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemsRequest {
    pub items: Option<Vec<QuotationItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationListQuery {
    pub status: Option<QuotationStatus>,
    pub lead_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Stamps each line's total as quantity * unit_price.
pub fn compute_line_totals(items: &mut [QuotationItem]) {
    for item in items.iter_mut() {
        item.total = item.quantity * item.unit_price;
    }
}

/// Totals invariant: subtotal is the sum of line totals, and
/// total = subtotal + taxes + fees - discount.
pub fn compute_totals(items: &[QuotationItem], taxes: f64, fees: f64, discount: f64) -> (f64, f64) {
    let subtotal: f64 = items.iter().map(|i| i.total).sum();
    (subtotal, subtotal + taxes + fees - discount)
}

fn validate_items(items: Option<Vec<QuotationItem>>) -> Result<Vec<QuotationItem>, ApiError> {
    let items = items.unwrap_or_default();
    if items.is_empty() {
        return Err(ApiError::Validation(
            "a quotation needs at least one item".to_string(),
        ));
    }
    for item in &items {
        if item.description.trim().is_empty() {
            return Err(ApiError::missing_field("items[].description"));
        }
        if item.quantity <= 0.0 {
            return Err(ApiError::Validation(
                "item quantity must be positive".to_string(),
            ));
        }
        if item.unit_price < 0.0 {
            return Err(ApiError::Validation(
                "item unit price cannot be negative".to_string(),
            ));
        }
    }
    Ok(items)
}

fn next_quote_number(conn: &mut PgConnection) -> Result<String, StoreError> {
    let count = store::count(conn, Model::Quotation, &Filter::empty())?;
    Ok(format!("QT-{:06}", count + 1))
}

fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

fn status_values(allowed: &[&str]) -> Vec<Value> {
    allowed.iter().map(|s| json!(s)).collect()
}

/// Guarded transition on one quotation. `None` means the guard did not match.
fn transition(
    conn: &mut PgConnection,
    id: Uuid,
    allowed: &[&str],
    changes: &Value,
) -> Result<Option<Value>, StoreError> {
    let filter = Filter::empty()
        .and_eq("id", json!(id))
        .and_in("status", status_values(allowed));
    store::update_one(conn, Model::Quotation, &filter, changes)
}

/// Turn a failed guard into the right API error: 404 when the quotation does
/// not exist, 400 naming the current status otherwise.
fn guard_rejection(
    conn: &mut PgConnection,
    id: Uuid,
    action: &str,
) -> Result<ApiError, StoreError> {
    let current = store::get_one(
        conn,
        Model::Quotation,
        &Filter::empty().and_eq("id", json!(id)),
    )?;
    Ok(match current {
        Some(doc) => ApiError::Validation(format!(
            "quotation cannot be {action} from status '{}'",
            doc["status"].as_str().unwrap_or("unknown")
        )),
        None => ApiError::NotFound("quotation"),
    })
}

fn cascade_lead(
    conn: &mut PgConnection,
    quotation: &Value,
    changes: Value,
) -> Result<(), StoreError> {
    if let Some(lead_id) = quotation["leadId"].as_str() {
        let filter = Filter::empty().and_eq("id", json!(lead_id));
        store::update_one(conn, Model::Lead, &filter, &changes)?;
    }
    Ok(())
}

pub async fn create_quotation(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<CreateQuotationRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut items = validate_items(req.items)?;
    compute_line_totals(&mut items);
    let (subtotal, total) = compute_totals(&items, req.taxes, req.fees, req.discount_amount);

    let mut conn = state.conn.get()?;
    let quotation = conn.transaction::<_, StoreError, _>(|conn| {
        let quote_number = next_quote_number(conn)?;
        let quotation = store::create_one(
            conn,
            Model::Quotation,
            &json!({
                "id": Uuid::new_v4(),
                "quoteNumber": quote_number,
                "leadId": req.lead_id,
                "customer": req.customer.unwrap_or_else(|| json!({})),
                "items": items,
                "subtotal": subtotal,
                "taxes": req.taxes,
                "fees": req.fees,
                "discountAmount": req.discount_amount,
                "total": total,
                "currency": req.currency.unwrap_or_else(|| "USD".to_string()),
                "status": QuotationStatus::Draft,
                "validUntil": req.valid_until,
                "notes": req.notes,
                "internalNotes": req.internal_notes,
                "createdBy": caller.profile_id,
            }),
        )?;
        if let Some(lead_id) = req.lead_id {
            // Only fresh leads move to quoting; later stages keep their status.
            let promote = Filter::empty()
                .and_eq("id", json!(lead_id))
                .and_in("status", status_values(&["new", "contacted"]));
            store::update_one(
                conn,
                Model::Lead,
                &promote,
                &json!({ "status": LeadStatus::Quoting, "updatedAt": now_ts() }),
            )?;
        }
        Ok(quotation)
    })?;
    store::invalidate(&["quotations".to_string(), "leads".to_string()]);

    Ok(ApiData::new(quotation))
}

pub async fn send_quotation(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<SendRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let via = req.via.unwrap_or_else(|| "email".to_string());
    let mut conn = state.conn.get()?;

    let updated = conn.transaction::<_, StoreError, _>(|conn| {
        let updated = transition(
            conn,
            id,
            SENDABLE,
            &json!({
                "status": QuotationStatus::Sent,
                "sentAt": now_ts(),
                "sentVia": &via,
                "updatedAt": now_ts(),
            }),
        )?;
        if let Some(quotation) = &updated {
            cascade_lead(
                conn,
                quotation,
                json!({
                    "status": LeadStatus::QuoteSent,
                    "lastContactedAt": now_ts(),
                    "updatedAt": now_ts(),
                }),
            )?;
        }
        Ok(updated)
    })?;
    let quotation = match updated {
        Some(q) => q,
        None => return Err(guard_rejection(&mut conn, id, "sent")?),
    };
    store::invalidate(&["quotations".to_string(), "leads".to_string()]);

    after_send(&state, &caller, &quotation, &via);

    Ok(ApiData::new(quotation))
}

/// Post-commit effects of a send: audit interaction on the lead and the
/// outbound email. Neither can fail the request at this point.
fn after_send(state: &Arc<AppState>, caller: &Caller, quotation: &Value, via: &str) {
    let quote_number = quotation["quoteNumber"].as_str().unwrap_or_default().to_string();

    if let (Some(lead_id), Ok(qid)) = (
        quotation["leadId"].as_str().and_then(|s| Uuid::parse_str(s).ok()),
        parse_id(quotation),
    ) {
        let pool = state.conn.clone();
        let advisor_id = caller.profile_id;
        let content = format!("Quotation {quote_number} sent via {via}");
        let via = via.to_string();
        effects::spawn_blocking("quote_sent_interaction", move || {
            let mut conn = pool.get()?;
            store::create_one(
                &mut conn,
                Model::LeadInteraction,
                &json!({
                    "id": Uuid::new_v4(),
                    "leadId": lead_id,
                    "advisorId": advisor_id,
                    "kind": "quote_sent",
                    "content": content,
                    "metadata": json!({ "quotationId": qid, "sentVia": via }),
                }),
            )?;
            Ok(())
        });
    }

    if via == "email" {
        if let (Some(email_cfg), Some(to)) = (
            state.config.email.clone(),
            quotation["customer"]["email"].as_str(),
        ) {
            let to = to.to_string();
            let name = quotation["customer"]["name"]
                .as_str()
                .unwrap_or("traveler")
                .to_string();
            let total = format!(
                "{} {:.2}",
                quotation["currency"].as_str().unwrap_or("USD"),
                quotation["total"].as_f64().unwrap_or_default()
            );
            let pdf_url = quotation["pdfUrl"].as_str().map(str::to_string);
            effects::spawn_blocking("quotation_email", move || {
                notify::send_quotation_email(
                    &email_cfg,
                    &to,
                    &name,
                    &quote_number,
                    &total,
                    pdf_url.as_deref(),
                )
            });
        }
    }
}

pub async fn mark_viewed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let updated = transition(
        &mut conn,
        id,
        VIEWABLE,
        &json!({
            "status": QuotationStatus::Viewed,
            "viewedAt": now_ts(),
            "updatedAt": now_ts(),
        }),
    )?;
    let quotation = match updated {
        Some(q) => q,
        None => return Err(guard_rejection(&mut conn, id, "marked viewed")?),
    };
    store::invalidate(&["quotations".to_string()]);
    Ok(ApiData::new(quotation))
}

pub async fn accept_quotation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let updated = conn.transaction::<_, StoreError, _>(|conn| {
        let updated = transition(
            conn,
            id,
            ACCEPTABLE,
            &json!({
                "status": QuotationStatus::Accepted,
                "acceptedAt": now_ts(),
                "updatedAt": now_ts(),
            }),
        )?;
        if let Some(quotation) = &updated {
            cascade_lead(
                conn,
                quotation,
                json!({ "status": LeadStatus::AwaitingPayment, "updatedAt": now_ts() }),
            )?;
        }
        Ok(updated)
    })?;
    let quotation = match updated {
        Some(q) => q,
        None => return Err(guard_rejection(&mut conn, id, "accepted")?),
    };
    store::invalidate(&["quotations".to_string(), "leads".to_string()]);
    Ok(ApiData::new(quotation))
}

pub async fn reject_quotation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let mut changes = json!({
        "status": QuotationStatus::Rejected,
        "rejectedAt": now_ts(),
        "updatedAt": now_ts(),
    });
    if let Some(reason) = req.reason.filter(|r| !r.trim().is_empty()) {
        changes["internalNotes"] = json!(format!("Rejected: {reason}"));
    }
    let updated = transition(&mut conn, id, REJECTABLE, &changes)?;
    let quotation = match updated {
        Some(q) => q,
        None => return Err(guard_rejection(&mut conn, id, "rejected")?),
    };
    store::invalidate(&["quotations".to_string()]);
    Ok(ApiData::new(quotation))
}

pub async fn convert_to_booking(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<ConvertRequest>,
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
    let updated = conn.transaction::<_, StoreError, _>(|conn| {
        let updated = transition(
            conn,
            id,
            CONVERTIBLE,
            &json!({
                "status": QuotationStatus::Converted,
                "convertedAt": now_ts(),
                "bookingType": &booking_type,
                "bookingId": &booking_id,
                "updatedAt": now_ts(),
            }),
        )?;
        if let Some(quotation) = &updated {
            cascade_lead(
                conn,
                quotation,
                json!({
                    "status": LeadStatus::Paid,
                    "bookingType": &booking_type,
                    "bookingId": &booking_id,
                    "updatedAt": now_ts(),
                }),
            )?;
        }
        Ok(updated)
    })?;
    let quotation = match updated {
        Some(q) => q,
        None => return Err(guard_rejection(&mut conn, id, "converted")?),
    };
    store::invalidate(&["quotations".to_string(), "leads".to_string()]);
    Ok(ApiData::new(quotation))
}

pub async fn update_items(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateItemsRequest>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut items = validate_items(req.items)?;
    compute_line_totals(&mut items);

    let mut conn = state.conn.get()?;
    // Pre-read only supplies taxes/fees/discount; the converted check lives
    // in the UPDATE filter so a concurrent conversion cannot slip between a
    // read and the write.
    let current = store::get_one(
        &mut conn,
        Model::Quotation,
        &Filter::empty().and_eq("id", json!(id)),
    )?
    .ok_or(ApiError::NotFound("quotation"))?;
    let (subtotal, total) = compute_totals(
        &items,
        current["taxes"].as_f64().unwrap_or_default(),
        current["fees"].as_f64().unwrap_or_default(),
        current["discountAmount"].as_f64().unwrap_or_default(),
    );
    let updated = transition(
        &mut conn,
        id,
        EDITABLE,
        &json!({
            "items": items,
            "subtotal": subtotal,
            "total": total,
            "updatedAt": now_ts(),
        }),
    )?;
    let quotation = match updated {
        Some(q) => q,
        None => {
            return Err(ApiError::Validation(
                "a converted quotation can no longer be edited".to_string(),
            ))
        }
    };
    store::invalidate(&["quotations".to_string()]);
    Ok(ApiData::new(quotation))
}

pub async fn list_quotations(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Query(query): Query<QuotationListQuery>,
) -> Result<Json<ApiData<Vec<Value>>>, ApiError> {
    let mut filter = Filter::empty();
    if let Some(status) = query.status {
        filter = filter.and_eq("status", json!(status));
    }
    if let Some(lead_id) = query.lead_id {
        filter = filter.and_eq("leadId", json!(lead_id));
    }
    let options = QueryOptions {
        order_by: Some("createdAt".to_string()),
        descending: true,
        limit: Some(query.limit.unwrap_or(100).clamp(1, 500)),
        offset: query.offset,
    };
    let mut conn = state.conn.get()?;
    let quotations = store::get_many_cached(
        &mut conn,
        Model::Quotation,
        &filter,
        &options,
        &["quotations".to_string()],
        TtlPolicy::Seconds(state.config.cache.default_ttl_secs),
        state.config.cache.enabled,
    )?;
    Ok(ApiData::new(quotations))
}

pub async fn get_quotation(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let quotation = store::get_one(
        &mut conn,
        Model::Quotation,
        &Filter::empty().and_eq("id", json!(id)),
    )?
    .ok_or(ApiError::NotFound("quotation"))?;
    Ok(ApiData::new(quotation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(description: &str, quantity: f64, unit_price: f64) -> QuotationItem {
        QuotationItem {
            description: description.to_string(),
            quantity,
            unit_price,
            total: 0.0,
        }
    }

    #[test]
    fn test_totals_worked_example() {
        // 2 x 150 flight, taxes 10, fees 5 -> subtotal 300, total 315
        let mut items = vec![item("Flight GRU-LIS", 2.0, 150.0)];
        compute_line_totals(&mut items);
        assert_eq!(items[0].total, 300.0);
        let (subtotal, total) = compute_totals(&items, 10.0, 5.0, 0.0);
        assert_eq!(subtotal, 300.0);
        assert_eq!(total, 315.0);
    }

    #[test]
    fn test_discount_subtracts() {
        let mut items = vec![item("Hotel", 3.0, 100.0), item("Tour", 1.0, 80.0)];
        compute_line_totals(&mut items);
        let (subtotal, total) = compute_totals(&items, 20.0, 0.0, 50.0);
        assert_eq!(subtotal, 380.0);
        assert_eq!(total, 350.0);
    }

    #[test]
    fn test_empty_items_rejected() {
        assert!(validate_items(None).is_err());
        assert!(validate_items(Some(vec![])).is_err());
    }

    #[test]
    fn test_invalid_line_rejected() {
        assert!(validate_items(Some(vec![item("", 1.0, 10.0)])).is_err());
        assert!(validate_items(Some(vec![item("Flight", 0.0, 10.0)])).is_err());
        assert!(validate_items(Some(vec![item("Flight", 1.0, -1.0)])).is_err());
    }

    #[test]
    fn test_guard_sets() {
        assert!(SENDABLE.contains(&"draft"));
        assert!(SENDABLE.contains(&"sent"));
        assert!(!SENDABLE.contains(&"converted"));
        assert_eq!(VIEWABLE, &["sent"]);
        assert!(ACCEPTABLE.contains(&"viewed") && !ACCEPTABLE.contains(&"accepted"));
        assert!(REJECTABLE.contains(&"accepted") && !REJECTABLE.contains(&"draft"));
        assert!(CONVERTIBLE.contains(&"accepted") && !CONVERTIBLE.contains(&"converted"));
    }

    #[test]
    fn test_items_update_guard_excludes_converted() {
        for status in [
            QuotationStatus::Draft,
            QuotationStatus::Sent,
            QuotationStatus::Viewed,
            QuotationStatus::Accepted,
            QuotationStatus::Rejected,
            QuotationStatus::Expired,
        ] {
            assert!(EDITABLE.contains(&status.as_str()));
        }
        assert!(!EDITABLE.contains(&QuotationStatus::Converted.as_str()));

        // The guard travels in the UPDATE's filter, so a conversion that
        // commits first makes the write match nothing.
        let filter = Filter::empty()
            .and_eq("id", json!("00000000-0000-0000-0000-000000000001"))
            .and_in("status", status_values(EDITABLE));
        let sql = filter.to_sql().unwrap();
        assert!(sql.contains("status IN ("));
        assert!(!sql.contains("'converted'"));
    }

    #[test]
    fn test_item_wire_casing() {
        let value = serde_json::to_value(item("Flight", 2.0, 150.0)).unwrap();
        assert!(value.get("unitPrice").is_some());
        assert!(value.get("unit_price").is_none());
    }
}
