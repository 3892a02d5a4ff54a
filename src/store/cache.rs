//! Process-wide tagged read cache.
//!
//! Read operations may be cached under a key derived from
//! `(operation, model, filter, options)` with a set of invalidation tags.
//! Writes never go through the cache; callers invalidate the relevant tags
//! after a successful write. Entries expire by TTL or by tag invalidation,
//! whichever comes first.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Caller-requested caching behavior for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Do not touch the cache.
    Bypass,
    /// Cache for the given number of seconds.
    Seconds(u64),
    /// Cache until a tag invalidation evicts the entry.
    NoExpiry,
}

struct Entry {
    value: Value,
    tags: Vec<String>,
    expires_at: Option<Instant>,
}

static CACHE: Lazy<RwLock<HashMap<String, Entry>>> = Lazy::new(|| RwLock::new(HashMap::new()));

pub fn get(key: &str) -> Option<Value> {
    let expired = {
        let cache = CACHE.read().ok()?;
        let entry = cache.get(key)?;
        match entry.expires_at {
            Some(at) if at <= Instant::now() => true,
            _ => return Some(entry.value.clone()),
        }
    };
    if expired {
        if let Ok(mut cache) = CACHE.write() {
            cache.remove(key);
        }
    }
    None
}

pub fn put(key: String, value: Value, tags: &[String], ttl: TtlPolicy) {
    let expires_at = match ttl {
        TtlPolicy::Bypass => return,
        TtlPolicy::Seconds(0) => return,
        TtlPolicy::Seconds(secs) => Some(Instant::now() + Duration::from_secs(secs)),
        TtlPolicy::NoExpiry => None,
    };
    if let Ok(mut cache) = CACHE.write() {
        cache.insert(
            key,
            Entry {
                value,
                tags: tags.to_vec(),
                expires_at,
            },
        );
    }
}

pub fn invalidate_tags(tags: &[String]) {
    if tags.is_empty() {
        return;
    }
    if let Ok(mut cache) = CACHE.write() {
        cache.retain(|_, entry| !entry.tags.iter().any(|t| tags.contains(t)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // The cache is a process-wide static shared across parallel tests, so
    // each test uses its own keys and tags.

    #[test]
    fn test_put_get_and_tag_invalidation() {
        put(
            "t1:list".to_string(),
            json!([1, 2]),
            &["t1:leads".to_string()],
            TtlPolicy::NoExpiry,
        );
        put(
            "t1:other".to_string(),
            json!("x"),
            &["t1:quotations".to_string()],
            TtlPolicy::NoExpiry,
        );
        assert_eq!(get("t1:list"), Some(json!([1, 2])));

        invalidate_tags(&["t1:leads".to_string()]);
        assert_eq!(get("t1:list"), None);
        assert_eq!(get("t1:other"), Some(json!("x")));
    }

    #[test]
    fn test_bypass_and_zero_ttl_store_nothing() {
        put("t2:b".to_string(), json!(1), &[], TtlPolicy::Bypass);
        put("t2:z".to_string(), json!(1), &[], TtlPolicy::Seconds(0));
        assert_eq!(get("t2:b"), None);
        assert_eq!(get("t2:z"), None);
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        put("t3:e".to_string(), json!(1), &[], TtlPolicy::Seconds(1));
        if let Ok(mut cache) = CACHE.write() {
            if let Some(entry) = cache.get_mut("t3:e") {
                entry.expires_at = Some(Instant::now());
            }
        }
        assert_eq!(get("t3:e"), None);
    }
}
