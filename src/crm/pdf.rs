//! Quotation PDF rendering and storage.
//!
//! Fixed one-page layout rendered straight from the quotation document with
//! `lopdf` (no HTML intermediary). The bytes are uploaded to object storage
//! under a deterministic key derived from the quote number, so regenerating
//! a quotation overwrites its previous file.

use crate::core::auth::Caller;
use crate::core::error::ApiError;
use crate::core::state::AppState;
use crate::store::{self, Filter, Model};
use crate::effects;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const MARGIN: f32 = 54.0;

pub fn storage_key(quote_number: &str) -> String {
    format!("quotations/{quote_number}.pdf")
}

pub fn public_url(server: &str, bucket: &str, key: &str) -> String {
    format!("{}/{bucket}/{key}", server.trim_end_matches('/'))
}

struct PageWriter {
    ops: Vec<Operation>,
    y: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            ops: Vec::new(),
            y: PAGE_HEIGHT as f32 - MARGIN,
        }
    }

    fn line(&mut self, x: f32, size: f32, bold: bool, text: &str) {
        let font = if bold { "F2" } else { "F1" };
        self.ops.push(Operation::new("BT", vec![]));
        self.ops
            .push(Operation::new("Tf", vec![font.into(), size.into()]));
        self.ops
            .push(Operation::new("Td", vec![x.into(), self.y.into()]));
        self.ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(sanitize(text))],
        ));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn advance(&mut self, by: f32) {
        self.y -= by;
    }

    fn rule(&mut self) {
        self.ops.push(Operation::new(
            "m",
            vec![MARGIN.into(), self.y.into()],
        ));
        self.ops.push(Operation::new(
            "l",
            vec![(PAGE_WIDTH as f32 - MARGIN).into(), self.y.into()],
        ));
        self.ops.push(Operation::new("S", vec![]));
        self.advance(14.0);
    }
}

// Helvetica is not unicode-aware; anything outside printable ASCII is
// replaced rather than producing a broken glyph.
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

fn money(currency: &str, amount: f64) -> String {
    format!("{currency} {amount:.2}")
}

/// Render the fixed single-page layout from the quotation's current fields.
pub fn render_quotation_pdf(quotation: &Value) -> Result<Vec<u8>, ApiError> {
    let currency = quotation["currency"].as_str().unwrap_or("USD");
    let mut page = PageWriter::new();

    page.line(MARGIN, 20.0, true, "TRAVEL QUOTATION");
    page.advance(18.0);
    page.line(
        MARGIN,
        11.0,
        false,
        &format!(
            "Quotation {}",
            quotation["quoteNumber"].as_str().unwrap_or("-")
        ),
    );
    page.advance(14.0);
    page.line(
        MARGIN,
        10.0,
        false,
        &format!("Date: {}", quotation["createdAt"].as_str().unwrap_or("-")),
    );
    if let Some(valid_until) = quotation["validUntil"].as_str() {
        page.advance(12.0);
        page.line(MARGIN, 10.0, false, &format!("Valid until: {valid_until}"));
    }
    page.advance(20.0);
    page.rule();

    let customer = &quotation["customer"];
    page.line(MARGIN, 12.0, true, "Prepared for");
    page.advance(14.0);
    page.line(
        MARGIN,
        10.0,
        false,
        customer["name"].as_str().unwrap_or("Walk-in customer"),
    );
    if let Some(email) = customer["email"].as_str() {
        page.advance(12.0);
        page.line(MARGIN, 10.0, false, email);
    }
    if let Some(phone) = customer["phone"].as_str() {
        page.advance(12.0);
        page.line(MARGIN, 10.0, false, phone);
    }
    page.advance(22.0);

    // Itemized table: description / qty / unit / total columns.
    let col_qty = 330.0;
    let col_unit = 400.0;
    let col_total = 490.0;
    page.line(MARGIN, 11.0, true, "Description");
    page.line(col_qty, 11.0, true, "Qty");
    page.line(col_unit, 11.0, true, "Unit");
    page.line(col_total, 11.0, true, "Total");
    page.advance(8.0);
    page.rule();

    if let Some(items) = quotation["items"].as_array() {
        for item in items {
            page.line(
                MARGIN,
                10.0,
                false,
                item["description"].as_str().unwrap_or("-"),
            );
            page.line(
                col_qty,
                10.0,
                false,
                &format!("{}", item["quantity"].as_f64().unwrap_or_default()),
            );
            page.line(
                col_unit,
                10.0,
                false,
                &money(currency, item["unitPrice"].as_f64().unwrap_or_default()),
            );
            page.line(
                col_total,
                10.0,
                false,
                &money(currency, item["total"].as_f64().unwrap_or_default()),
            );
            page.advance(14.0);
        }
    }
    page.advance(6.0);
    page.rule();

    let totals = [
        ("Subtotal", quotation["subtotal"].as_f64().unwrap_or_default(), false),
        ("Taxes", quotation["taxes"].as_f64().unwrap_or_default(), false),
        ("Fees", quotation["fees"].as_f64().unwrap_or_default(), false),
        (
            "Discount",
            -quotation["discountAmount"].as_f64().unwrap_or_default(),
            false,
        ),
        ("TOTAL", quotation["total"].as_f64().unwrap_or_default(), true),
    ];
    for (label, amount, bold) in totals {
        page.line(col_unit, if bold { 12.0 } else { 10.0 }, bold, label);
        page.line(col_total, if bold { 12.0 } else { 10.0 }, bold, &money(currency, amount));
        page.advance(14.0);
    }

    if let Some(notes) = quotation["notes"].as_str().filter(|n| !n.is_empty()) {
        page.advance(10.0);
        page.line(MARGIN, 11.0, true, "Notes");
        page.advance(13.0);
        page.line(MARGIN, 10.0, false, notes);
    }

    page.y = MARGIN;
    page.line(
        MARGIN,
        9.0,
        false,
        "Prices subject to availability at time of booking.",
    );

    build_document(page.ops)
}

fn build_document(operations: Vec<Operation>) -> Result<Vec<u8>, ApiError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });
    let resources = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => regular, "F2" => bold },
    });
    let content = Content { operations };
    let encoded = content.encode().map_err(|e| {
        log::error!("pdf content encoding failed: {e}");
        ApiError::Internal
    })?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|e| {
        log::error!("pdf serialization failed: {e}");
        ApiError::Internal
    })?;
    Ok(bytes)
}

async fn upload(
    state: &Arc<AppState>,
    key: &str,
    bytes: Vec<u8>,
) -> Result<String, anyhow::Error> {
    let drive = state
        .config
        .drive
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("object storage is not configured"))?;
    let client = state
        .drive
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("object storage client is not available"))?;
    client
        .put_object()
        .bucket(&drive.bucket)
        .key(key)
        .content_type("application/pdf")
        .body(bytes.into())
        .send()
        .await?;
    Ok(public_url(&drive.server, &drive.bucket, key))
}

fn load_quotation(state: &Arc<AppState>, id: Uuid) -> Result<Value, ApiError> {
    let mut conn = state.conn.get()?;
    store::get_one(
        &mut conn,
        Model::Quotation,
        &Filter::empty().and_eq("id", json!(id)),
    )?
    .ok_or(ApiError::NotFound("quotation"))
}

fn persist_pdf_url(state: &Arc<AppState>, id: Uuid, url: &str) -> Result<(), ApiError> {
    let mut conn = state.conn.get()?;
    store::update_one(
        &mut conn,
        Model::Quotation,
        &Filter::empty().and_eq("id", json!(id)),
        &json!({ "pdfUrl": url }),
    )?;
    store::invalidate(&["quotations".to_string()]);
    Ok(())
}

/// Inline PDF download. When the upload to object storage fails, the bytes
/// are still served so the advisor is never blocked by the storage backend.
pub async fn get_quotation_pdf(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let quotation = load_quotation(&state, id)?;
    let quote_number = quotation["quoteNumber"].as_str().unwrap_or("quotation").to_string();
    let bytes = render_quotation_pdf(&quotation)?;

    if state.drive.is_some() {
        let key = storage_key(&quote_number);
        match upload(&state, &key, bytes.clone()).await {
            Ok(url) => persist_pdf_url(&state, id, &url)?,
            Err(e) => {
                log::warn!("pdf upload for {quote_number} failed: {e}");
                effects::record_failure("pdf_upload");
            }
        }
    }

    let response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{quote_number}.pdf\""),
            ),
        ],
        bytes,
    );
    Ok(response.into_response())
}

/// Generate and persist: upload is mandatory here, and the stored URL is
/// returned instead of the bytes.
pub async fn generate_quotation_pdf(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    caller.require_advisor()?;
    let quotation = load_quotation(&state, id)?;
    let quote_number = quotation["quoteNumber"].as_str().unwrap_or("quotation").to_string();
    let bytes = render_quotation_pdf(&quotation)?;

    let key = storage_key(&quote_number);
    let url = upload(&state, &key, bytes).await.map_err(|e| {
        log::error!("pdf upload for {quote_number} failed: {e}");
        effects::record_failure("pdf_upload");
        ApiError::Validation("object storage is not available".to_string())
    })?;
    persist_pdf_url(&state, id, &url)?;

    Ok(Json(json!({
        "success": true,
        "pdfUrl": url,
        "filePath": key,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quotation() -> Value {
        json!({
            "quoteNumber": "QT-000042",
            "customer": { "name": "Ana Souza", "email": "ana@example.com" },
            "items": [
                { "description": "Flight GRU-LIS", "quantity": 2.0, "unitPrice": 150.0, "total": 300.0 }
            ],
            "subtotal": 300.0,
            "taxes": 10.0,
            "fees": 5.0,
            "discountAmount": 0.0,
            "total": 315.0,
            "currency": "USD",
            "createdAt": "2026-08-20T12:00:00Z",
            "notes": "Carry-on only fare."
        })
    }

    #[test]
    fn test_render_produces_pdf_bytes() {
        let bytes = render_quotation_pdf(&sample_quotation()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(bytes.len() > 500);
    }

    #[test]
    fn test_storage_key_is_deterministic() {
        assert_eq!(storage_key("QT-000042"), "quotations/QT-000042.pdf");
        assert_eq!(storage_key("QT-000042"), storage_key("QT-000042"));
    }

    #[test]
    fn test_public_url_joins_cleanly() {
        assert_eq!(
            public_url("https://drive.example.com/", "trips", "quotations/QT-000001.pdf"),
            "https://drive.example.com/trips/quotations/QT-000001.pdf"
        );
    }

    #[test]
    fn test_sanitize_replaces_non_ascii() {
        assert_eq!(sanitize("Sao Paulo ✈ Lisboa"), "Sao Paulo ? Lisboa");
        assert_eq!(sanitize("plain text"), "plain text");
    }
}
