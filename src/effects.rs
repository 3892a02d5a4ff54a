//! Best-effort side effects.
//!
//! Lifecycle actions hand non-essential work (emails, auto-created tickets,
//! interaction logging after a commit) to this module so a failure never
//! rolls back or fails the triggering request. Failures are logged at WARN
//! and counted per effect name; the counters are exposed on an admin route
//! so silent drops stay visible.

use crate::core::auth::Caller;
use crate::core::error::{ApiData, ApiError};
use crate::core::state::AppState;
use axum::routing::get;
use axum::{Json, Router};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::RwLock;

static FAILURES: Lazy<RwLock<HashMap<&'static str, AtomicU64>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

pub fn record_failure(effect: &'static str) {
    if let Ok(map) = FAILURES.read() {
        if let Some(counter) = map.get(effect) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }
    if let Ok(mut map) = FAILURES.write() {
        map.entry(effect)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of failure counters, keyed by effect name.
pub fn failure_report() -> HashMap<String, u64> {
    match FAILURES.read() {
        Ok(map) => map
            .iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed)))
            .collect(),
        Err(_) => HashMap::new(),
    }
}

/// Run a side effect (database writes, SMTP) off the request path. The
/// triggering request does not wait for it; errors are logged and counted.
pub fn spawn_blocking<F>(effect: &'static str, job: F)
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        if let Err(e) = job() {
            log::warn!("effect '{effect}' failed: {e}");
            record_failure(effect);
        }
    });
}

pub fn configure_admin_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/admin/effects", get(effects_report))
}

async fn effects_report(
    caller: Caller,
) -> Result<Json<ApiData<HashMap<String, u64>>>, ApiError> {
    caller.require_advisor()?;
    Ok(ApiData::new(failure_report()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counter_increments() {
        record_failure("test_effect_a");
        record_failure("test_effect_a");
        let report = failure_report();
        assert!(report.get("test_effect_a").copied().unwrap_or(0) >= 2);
    }

    #[test]
    fn test_report_omits_unseen_effects() {
        let report = failure_report();
        assert!(!report.contains_key("never_recorded_effect"));
    }
}
