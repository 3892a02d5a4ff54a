//! Document-style filter translation.
//!
//! A MongoDB-like filter object is parsed into an explicit predicate AST and
//! compiled to a SQL `WHERE` clause. The supported operator set is small and
//! closed: `$eq, $ne, $gt, $gte, $lt, $lte, $in, $nin, $regex`. `$regex` is
//! compiled to a case-insensitive partial match (`ILIKE '%...%'`), not a real
//! regex engine. Logical operators such as `$or` are intentionally
//! unsupported and fail loudly instead of being dropped.

use crate::store::casing::to_snake_case;
use crate::store::StoreError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    /// Case-insensitive partial match; the `$regex` operator maps here.
    Contains,
}

impl CompareOp {
    fn from_operator(op: &str) -> Result<Self, StoreError> {
        match op {
            "$eq" => Ok(Self::Eq),
            "$ne" => Ok(Self::Ne),
            "$gt" => Ok(Self::Gt),
            "$gte" => Ok(Self::Gte),
            "$lt" => Ok(Self::Lt),
            "$lte" => Ok(Self::Lte),
            "$in" => Ok(Self::In),
            "$nin" => Ok(Self::NotIn),
            "$regex" => Ok(Self::Contains),
            other => Err(StoreError::UnsupportedOperator(other.to_string())),
        }
    }

    const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Contains => "ILIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparePredicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare(ComparePredicate),
    IsNull { column: String },
}

/// Conjunction of predicates over one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn and_eq(mut self, column: &str, value: Value) -> Self {
        self.predicates.push(Predicate::Compare(ComparePredicate {
            column: to_snake_case(column),
            op: CompareOp::Eq,
            value,
        }));
        self
    }

    pub fn and_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.predicates.push(Predicate::Compare(ComparePredicate {
            column: to_snake_case(column),
            op: CompareOp::In,
            value: Value::Array(values),
        }));
        self
    }

    pub fn and_contains(mut self, column: &str, needle: &str) -> Self {
        self.predicates.push(Predicate::Compare(ComparePredicate {
            column: to_snake_case(column),
            op: CompareOp::Contains,
            value: Value::String(needle.to_string()),
        }));
        self
    }

    /// Parse a MongoDB-style filter document.
    ///
    /// - plain values become column equality
    /// - `null` becomes `IS NULL`
    /// - bare arrays imply membership (`IN`)
    /// - nested objects are interpreted as the closed operator set
    /// - top-level `$...` keys (`$or` among them) are unsupported and error
    pub fn from_doc(doc: &Value) -> Result<Self, StoreError> {
        let map = doc
            .as_object()
            .ok_or_else(|| StoreError::InvalidFilter("filter must be an object".to_string()))?;

        let mut predicates = Vec::with_capacity(map.len());
        for (key, value) in map {
            if key.starts_with('$') {
                return Err(StoreError::UnsupportedOperator(key.clone()));
            }
            let column = to_snake_case(key);
            match value {
                Value::Null => predicates.push(Predicate::IsNull { column }),
                Value::Array(values) => predicates.push(Predicate::Compare(ComparePredicate {
                    column,
                    op: CompareOp::In,
                    value: Value::Array(values.clone()),
                })),
                Value::Object(ops) => {
                    if ops.is_empty() {
                        return Err(StoreError::InvalidFilter(format!(
                            "empty operator object on '{key}'"
                        )));
                    }
                    for (op_key, op_value) in ops {
                        let op = CompareOp::from_operator(op_key)?;
                        if matches!(op, CompareOp::In | CompareOp::NotIn)
                            && !op_value.is_array()
                        {
                            return Err(StoreError::InvalidFilter(format!(
                                "{op_key} on '{key}' requires an array value"
                            )));
                        }
                        predicates.push(Predicate::Compare(ComparePredicate {
                            column: column.clone(),
                            op,
                            value: op_value.clone(),
                        }));
                    }
                }
                scalar => predicates.push(Predicate::Compare(ComparePredicate {
                    column,
                    op: CompareOp::Eq,
                    value: scalar.clone(),
                })),
            }
        }
        Ok(Self { predicates })
    }

    /// Render a `WHERE ...` clause, or an empty string for an empty filter.
    pub fn to_sql(&self) -> Result<String, StoreError> {
        if self.predicates.is_empty() {
            return Ok(String::new());
        }
        let mut clauses = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            clauses.push(render_predicate(predicate)?);
        }
        Ok(format!("WHERE {}", clauses.join(" AND ")))
    }
}

fn render_predicate(predicate: &Predicate) -> Result<String, StoreError> {
    match predicate {
        Predicate::IsNull { column } => {
            check_identifier(column)?;
            Ok(format!("{column} IS NULL"))
        }
        Predicate::Compare(cmp) => {
            check_identifier(&cmp.column)?;
            match cmp.op {
                CompareOp::In | CompareOp::NotIn => {
                    let values = cmp.value.as_array().ok_or_else(|| {
                        StoreError::InvalidFilter(format!(
                            "membership predicate on '{}' requires an array",
                            cmp.column
                        ))
                    })?;
                    if values.is_empty() {
                        // IN () is invalid SQL; an empty set matches nothing.
                        return Ok(match cmp.op {
                            CompareOp::In => "FALSE".to_string(),
                            _ => "TRUE".to_string(),
                        });
                    }
                    let rendered: Result<Vec<String>, StoreError> =
                        values.iter().map(quote_literal).collect();
                    Ok(format!(
                        "{} {} ({})",
                        cmp.column,
                        cmp.op.sql(),
                        rendered?.join(", ")
                    ))
                }
                CompareOp::Contains => {
                    let needle = cmp.value.as_str().ok_or_else(|| {
                        StoreError::InvalidFilter(format!(
                            "$regex on '{}' requires a string value",
                            cmp.column
                        ))
                    })?;
                    let pattern = format!("%{}%", escape_like(needle));
                    Ok(format!(
                        "{}::text ILIKE {}",
                        cmp.column,
                        quote_literal(&Value::String(pattern))?
                    ))
                }
                CompareOp::Ne if cmp.value.is_null() => {
                    Ok(format!("{} IS NOT NULL", cmp.column))
                }
                op => Ok(format!(
                    "{} {} {}",
                    cmp.column,
                    op.sql(),
                    quote_literal(&cmp.value)?
                )),
            }
        }
    }
}

/// Columns and tables must be plain snake_case identifiers.
pub fn check_identifier(ident: &str) -> Result<(), StoreError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(ident.to_string()))
    }
}

/// Render a JSON value as a SQL literal. Strings are quoted with embedded
/// quotes doubled; arrays and objects are rendered as quoted JSON text and
/// rely on Postgres coercion to the target jsonb column.
pub fn quote_literal(value: &Value) -> Result<String, StoreError> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_text(s),
        Value::Array(_) | Value::Object(_) => {
            let json = serde_json::to_string(value)
                .map_err(|e| StoreError::InvalidFilter(e.to_string()))?;
            quote_text(&json)
        }
    })
}

fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equality_and_casing() {
        let f = Filter::from_doc(&json!({ "leadId": "abc", "status": "new" })).unwrap();
        let sql = f.to_sql().unwrap();
        assert!(sql.starts_with("WHERE "));
        assert!(sql.contains("lead_id = 'abc'"));
        assert!(sql.contains("status = 'new'"));
    }

    #[test]
    fn test_null_maps_to_is_null() {
        let f = Filter::from_doc(&json!({ "advisorId": null })).unwrap();
        assert_eq!(f.to_sql().unwrap(), "WHERE advisor_id IS NULL");
    }

    #[test]
    fn test_bare_array_implies_membership() {
        let f = Filter::from_doc(&json!({ "status": ["new", "contacted"] })).unwrap();
        assert_eq!(
            f.to_sql().unwrap(),
            "WHERE status IN ('new', 'contacted')"
        );
    }

    #[test]
    fn test_operator_objects() {
        let f = Filter::from_doc(&json!({
            "total": { "$gte": 100, "$lt": 500 },
            "status": { "$ne": "rejected" },
            "source": { "$nin": ["walk_in"] }
        }))
        .unwrap();
        let sql = f.to_sql().unwrap();
        assert!(sql.contains("total >= 100"));
        assert!(sql.contains("total < 500"));
        assert!(sql.contains("status <> 'rejected'"));
        assert!(sql.contains("source NOT IN ('walk_in')"));
    }

    #[test]
    fn test_regex_is_partial_match_not_regex() {
        let f = Filter::from_doc(&json!({ "contactName": { "$regex": "ana" } })).unwrap();
        assert_eq!(
            f.to_sql().unwrap(),
            "WHERE contact_name::text ILIKE '%ana%'"
        );
    }

    #[test]
    fn test_regex_escapes_like_metacharacters() {
        let f = Filter::from_doc(&json!({ "name": { "$regex": "50%_off" } })).unwrap();
        let sql = f.to_sql().unwrap();
        assert!(sql.contains("%50\\%\\_off%"));
    }

    #[test]
    fn test_or_is_unsupported_and_loud() {
        let err = Filter::from_doc(&json!({
            "$or": [{ "status": "new" }, { "status": "contacted" }]
        }))
        .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperator(ref op) if op == "$or"));
    }

    #[test]
    fn test_unknown_nested_operator_rejected() {
        let err = Filter::from_doc(&json!({ "total": { "$mod": 2 } })).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperator(ref op) if op == "$mod"));
    }

    #[test]
    fn test_empty_operator_object_rejected() {
        let err = Filter::from_doc(&json!({ "status": {} })).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFilter(_)));
        assert!(err.to_string().contains("status"));
    }

    #[test]
    fn test_empty_membership_sets() {
        let f = Filter::from_doc(&json!({ "status": [] })).unwrap();
        assert_eq!(f.to_sql().unwrap(), "WHERE FALSE");
        let f = Filter::from_doc(&json!({ "status": { "$nin": [] } })).unwrap();
        assert_eq!(f.to_sql().unwrap(), "WHERE TRUE");
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(
            quote_literal(&json!("O'Brien")).unwrap(),
            "'O''Brien'"
        );
        assert_eq!(quote_literal(&json!(31.5)).unwrap(), "31.5");
        assert_eq!(quote_literal(&json!(true)).unwrap(), "TRUE");
        assert_eq!(quote_literal(&Value::Null).unwrap(), "NULL");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(check_identifier("contact_name").is_ok());
        assert!(check_identifier("address_line1").is_ok());
        assert!(check_identifier("1bad").is_err());
        assert!(check_identifier("name; DROP TABLE leads").is_err());
        assert!(check_identifier("").is_err());
    }

    #[test]
    fn test_ne_null_renders_is_not_null() {
        let f = Filter::from_doc(&json!({ "advisorId": { "$ne": null } })).unwrap();
        assert_eq!(f.to_sql().unwrap(), "WHERE advisor_id IS NOT NULL");
    }

    #[test]
    fn test_empty_filter_renders_nothing() {
        assert_eq!(Filter::empty().to_sql().unwrap(), "");
    }
}
