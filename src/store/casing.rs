//! Mechanical camelCase/snake_case key translation.
//!
//! Inbound documents and filters use the API's camelCase keys; rows travel to
//! Postgres in snake_case and come back translated again. Only top-level keys
//! are translated: nested JSON payloads (metadata, quotation items) are stored
//! and returned verbatim.

use serde_json::{Map, Value};

pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

pub fn keys_to_snake(doc: &Value) -> Value {
    translate(doc, to_snake_case)
}

pub fn keys_to_camel(doc: &Value) -> Value {
    translate(doc, to_camel_case)
}

fn translate(doc: &Value, f: fn(&str) -> String) -> Value {
    match doc {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(f(k), v.clone());
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("contactName"), "contact_name");
        assert_eq!(to_snake_case("pdfUrl"), "pdf_url");
        assert_eq!(to_snake_case("id"), "id");
        assert_eq!(to_snake_case("lastContactedAt"), "last_contacted_at");
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(to_camel_case("contact_name"), "contactName");
        assert_eq!(to_camel_case("pdf_url"), "pdfUrl");
        assert_eq!(to_camel_case("id"), "id");
    }

    #[test]
    fn test_round_trip_is_identity() {
        for key in [
            "id",
            "contactName",
            "contactEmail",
            "interestType",
            "discountAmount",
            "assignedAdvisorId",
            "satisfactionRating",
            "isInternal",
            "bookingId",
            "validUntil",
        ] {
            assert_eq!(to_camel_case(&to_snake_case(key)), key);
        }
    }

    #[test]
    fn test_only_top_level_keys_translated() {
        let doc = json!({
            "interestDetails": "beach",
            "metadata": { "utmSource": "ad" }
        });
        let snake = keys_to_snake(&doc);
        assert_eq!(snake["interest_details"], "beach");
        assert_eq!(snake["metadata"]["utmSource"], "ad");
    }
}
