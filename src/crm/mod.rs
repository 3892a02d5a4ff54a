//! CRM surface: leads, quotations, support tickets.

pub mod leads;
pub mod pdf;
pub mod quotations;
pub mod tickets;

use crate::core::state::AppState;
use axum::routing::{get, patch, post, put};
use axum::Router;
use std::sync::Arc;

pub fn configure_crm_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Leads
        .route("/api/crm/leads", post(leads::create_lead).get(leads::list_leads))
        .route("/api/crm/leads/:id", get(leads::get_lead))
        .route("/api/crm/leads/:id/status", patch(leads::update_lead_status))
        .route("/api/crm/leads/:id/assign", post(leads::assign_lead))
        .route("/api/crm/leads/:id/convert", post(leads::convert_lead))
        .route("/api/crm/leads/:id/interactions", get(leads::list_interactions))
        .route("/api/public/quote-intent", post(leads::create_quote_intent))
        // Quotations
        .route(
            "/api/crm/quotations",
            post(quotations::create_quotation).get(quotations::list_quotations),
        )
        .route("/api/crm/quotations/:id", get(quotations::get_quotation))
        .route("/api/crm/quotations/:id/items", put(quotations::update_items))
        .route("/api/crm/quotations/:id/send", post(quotations::send_quotation))
        .route("/api/crm/quotations/:id/view", post(quotations::mark_viewed))
        .route("/api/crm/quotations/:id/accept", post(quotations::accept_quotation))
        .route("/api/crm/quotations/:id/reject", post(quotations::reject_quotation))
        .route("/api/crm/quotations/:id/convert", post(quotations::convert_to_booking))
        .route(
            "/api/crm/quotations/:id/pdf",
            get(pdf::get_quotation_pdf).post(pdf::generate_quotation_pdf),
        )
        // Tickets
        .route(
            "/api/crm/tickets",
            post(tickets::create_ticket).get(tickets::list_tickets),
        )
        .route("/api/crm/tickets/:id", get(tickets::get_ticket))
        .route("/api/crm/tickets/:id/messages", post(tickets::add_message))
        .route("/api/crm/tickets/:id/status", patch(tickets::update_ticket_status))
        .route("/api/crm/tickets/:id/rating", post(tickets::rate_satisfaction))
        .route("/api/crm/tickets/auto", post(tickets::auto_create_ticket))
}
