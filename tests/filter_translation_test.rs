use serde_json::json;
use tripserver::store::{casing, Filter, Model, StoreError};

#[test]
fn test_document_filter_compiles_to_sql() {
    let filter = Filter::from_doc(&json!({
        "status": "new",
        "advisorId": null,
        "createdAt": { "$gte": "2026-01-01T00:00:00Z" },
    }))
    .unwrap();
    let sql = filter.to_sql().unwrap();
    assert!(sql.starts_with("WHERE "));
    assert!(sql.contains("status = 'new'"));
    assert!(sql.contains("advisor_id IS NULL"));
    assert!(sql.contains("created_at >= '2026-01-01T00:00:00Z'"));
}

#[test]
fn test_bare_array_means_in() {
    let filter = Filter::from_doc(&json!({ "status": ["sent", "viewed"] })).unwrap();
    let sql = filter.to_sql().unwrap();
    assert!(sql.contains("status IN ('sent', 'viewed')"));
}

#[test]
fn test_regex_is_partial_match_not_regex() {
    let filter = Filter::from_doc(&json!({ "contactName": { "$regex": "ana" } })).unwrap();
    let sql = filter.to_sql().unwrap();
    assert!(sql.contains("ILIKE"));
    assert!(sql.contains("%ana%"));
}

#[test]
fn test_or_fails_loudly() {
    let err = Filter::from_doc(&json!({
        "$or": [{ "status": "new" }, { "status": "contacted" }],
    }))
    .unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedOperator(_)));
    assert!(err.to_string().contains("$or"));
}

#[test]
fn test_unknown_operator_fails_loudly() {
    let err = Filter::from_doc(&json!({ "total": { "$mod": 2 } })).unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedOperator(_)));
}

#[test]
fn test_string_literals_are_escaped() {
    let filter = Filter::from_doc(&json!({ "contactName": "O'Brien" })).unwrap();
    let sql = filter.to_sql().unwrap();
    assert!(sql.contains("'O''Brien'"));
}

#[test]
fn test_unknown_model_is_hard_error() {
    let err = Model::from_name("Booking").unwrap_err();
    assert!(err.to_string().contains("not a valid model"));
}

#[test]
fn test_model_names_round_trip() {
    for name in ["Lead", "Quotation", "SupportTicket", "InventoryItem"] {
        let model = Model::from_name(name).unwrap();
        assert_eq!(model.name(), name);
    }
}

#[test]
fn test_casing_round_trips_top_level_keys() {
    let doc = json!({
        "contactName": "Ana",
        "interestType": "package",
        "metadata": { "utmSource": "instagram" },
    });
    let snake = casing::keys_to_snake(&doc);
    assert!(snake.get("contact_name").is_some());
    // Nested jsonb payloads keep their keys untouched.
    assert!(snake["metadata"].get("utmSource").is_some());
    let back = casing::keys_to_camel(&snake);
    assert_eq!(back, doc);
}

#[test]
fn test_ne_null_means_is_not_null() {
    let filter = Filter::from_doc(&json!({ "advisorId": { "$ne": null } })).unwrap();
    let sql = filter.to_sql().unwrap();
    assert!(sql.contains("advisor_id IS NOT NULL"));
}
