//! Generic persistence shim.
//!
//! Presents a document-style surface (`get_one`, `get_many`, `create_one`,
//! `update_one`, `delete_one`, `count`) over exactly one relational table per
//! call. Every lifecycle action in the application goes through this layer:
//! inbound documents and filters are camelCase, rows are snake_case, and the
//! translation is applied symmetrically at this boundary.
//!
//! `update_one` is filter-guarded and returns the updated document, or `None`
//! when no row matched the filter. Status-guarded transitions ride on this:
//! a `status: { $in: [...] }` predicate makes the transition a single
//! conditional statement instead of a read-then-write race.

pub mod cache;
pub mod casing;
pub mod filter;
pub mod model;

pub use cache::TtlPolicy;
pub use filter::{CompareOp, ComparePredicate, Filter, Predicate};
pub use model::Model;

use crate::store::filter::{check_identifier, quote_literal};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Json};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("'{0}' is not a valid model")]
    UnknownModel(String),
    #[error("unsupported filter operator '{0}'")]
    UnsupportedOperator(String),
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("empty change set")]
    EmptyChanges,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl StoreError {
    /// Undefined-table errors are surfaced distinctly so the API layer can
    /// tell callers to run migrations instead of reporting a generic failure.
    pub fn is_undefined_table(&self) -> bool {
        match self {
            Self::Database(diesel::result::Error::DatabaseError(_, info)) => {
                let msg = info.message();
                msg.contains("does not exist") && msg.contains("relation")
            }
            _ => false,
        }
    }
}

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Json)]
    doc: Value,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl QueryOptions {
    fn to_sql(&self) -> Result<String, StoreError> {
        let mut sql = String::new();
        if let Some(order_by) = &self.order_by {
            let column = casing::to_snake_case(order_by);
            check_identifier(&column)?;
            sql.push_str(&format!(
                " ORDER BY {column} {}",
                if self.descending { "DESC" } else { "ASC" }
            ));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset.max(0)));
        }
        Ok(sql)
    }
}

pub fn get_one(
    conn: &mut PgConnection,
    model: Model,
    filter: &Filter,
) -> Result<Option<Value>, StoreError> {
    let sql = format!(
        "SELECT row_to_json(t) AS doc FROM {} t {} LIMIT 1",
        model.table(),
        filter.to_sql()?
    );
    let mut rows = load_docs(conn, model, &sql)?;
    Ok(rows.pop())
}

pub fn get_many(
    conn: &mut PgConnection,
    model: Model,
    filter: &Filter,
    options: &QueryOptions,
) -> Result<Vec<Value>, StoreError> {
    let sql = format!(
        "SELECT row_to_json(t) AS doc FROM {} t {}{}",
        model.table(),
        filter.to_sql()?,
        options.to_sql()?
    );
    load_docs(conn, model, &sql)
}

pub fn create_one(
    conn: &mut PgConnection,
    model: Model,
    doc: &Value,
) -> Result<Value, StoreError> {
    let snake = casing::keys_to_snake(doc);
    let map = snake
        .as_object()
        .ok_or_else(|| StoreError::InvalidFilter("document must be an object".to_string()))?;
    if map.is_empty() {
        return Err(StoreError::EmptyChanges);
    }

    let mut columns = Vec::with_capacity(map.len());
    let mut values = Vec::with_capacity(map.len());
    for (column, value) in map {
        check_identifier(column)?;
        columns.push(column.as_str());
        values.push(quote_literal(value)?);
    }

    let sql = format!(
        "INSERT INTO {table} ({columns}) VALUES ({values}) RETURNING row_to_json({table}.*) AS doc",
        table = model.table(),
        columns = columns.join(", "),
        values = values.join(", "),
    );
    let mut rows = load_docs(conn, model, &sql)?;
    rows.pop()
        .ok_or_else(|| StoreError::InvalidFilter("insert returned no row".to_string()))
}

/// Filter-guarded update. Returns the updated document, or `None` when no row
/// matched; callers treat `None` as "guard rejected" (or not-found).
pub fn update_one(
    conn: &mut PgConnection,
    model: Model,
    filter: &Filter,
    changes: &Value,
) -> Result<Option<Value>, StoreError> {
    let snake = casing::keys_to_snake(changes);
    let map = snake
        .as_object()
        .ok_or_else(|| StoreError::InvalidFilter("change set must be an object".to_string()))?;
    if map.is_empty() {
        return Err(StoreError::EmptyChanges);
    }

    let mut assignments = Vec::with_capacity(map.len());
    for (column, value) in map {
        check_identifier(column)?;
        assignments.push(format!("{column} = {}", quote_literal(value)?));
    }

    let sql = format!(
        "UPDATE {table} SET {assignments} {where_clause} RETURNING row_to_json({table}.*) AS doc",
        table = model.table(),
        assignments = assignments.join(", "),
        where_clause = filter.to_sql()?,
    );
    let mut rows = load_docs(conn, model, &sql)?;
    Ok(rows.pop())
}

pub fn delete_one(
    conn: &mut PgConnection,
    model: Model,
    filter: &Filter,
) -> Result<usize, StoreError> {
    let sql = format!("DELETE FROM {} {}", model.table(), filter.to_sql()?);
    diesel::sql_query(&sql).execute(conn).map_err(|e| {
        log::error!("store: delete {} failed: {e}", model.name());
        StoreError::Database(e)
    })
}

pub fn count(conn: &mut PgConnection, model: Model, filter: &Filter) -> Result<i64, StoreError> {
    let sql = format!(
        "SELECT COUNT(*) AS count FROM {} {}",
        model.table(),
        filter.to_sql()?
    );
    let row: CountRow = diesel::sql_query(&sql).get_result(conn).map_err(|e| {
        log::error!("store: count {} failed: {e}", model.name());
        StoreError::Database(e)
    })?;
    Ok(row.count)
}

fn load_docs(
    conn: &mut PgConnection,
    model: Model,
    sql: &str,
) -> Result<Vec<Value>, StoreError> {
    let rows: Vec<JsonRow> = diesel::sql_query(sql).load(conn).map_err(|e| {
        log::error!("store: query on {} failed: {e}", model.name());
        StoreError::Database(e)
    })?;
    Ok(rows
        .into_iter()
        .map(|row| casing::keys_to_camel(&row.doc))
        .collect())
}

fn cache_key(op: &str, model: Model, filter: &Filter, options: &QueryOptions) -> String {
    format!(
        "{op}:{}:{:?}:{:?}",
        model.name(),
        filter,
        (&options.order_by, options.descending, options.limit, options.offset)
    )
}

fn cache_active(enabled: bool, ttl: TtlPolicy) -> bool {
    enabled && !cfg!(test) && ttl != TtlPolicy::Bypass
}

/// Cached read: consulted only when caching is enabled in config and the
/// caller requests a positive TTL or explicit no-expiry. Never used in tests.
pub fn get_many_cached(
    conn: &mut PgConnection,
    model: Model,
    filter: &Filter,
    options: &QueryOptions,
    tags: &[String],
    ttl: TtlPolicy,
    enabled: bool,
) -> Result<Vec<Value>, StoreError> {
    if !cache_active(enabled, ttl) {
        return get_many(conn, model, filter, options);
    }
    let key = cache_key("get_many", model, filter, options);
    if let Some(Value::Array(hit)) = cache::get(&key) {
        return Ok(hit);
    }
    let docs = get_many(conn, model, filter, options)?;
    cache::put(key, Value::Array(docs.clone()), tags, ttl);
    Ok(docs)
}

pub fn get_one_cached(
    conn: &mut PgConnection,
    model: Model,
    filter: &Filter,
    tags: &[String],
    ttl: TtlPolicy,
    enabled: bool,
) -> Result<Option<Value>, StoreError> {
    if !cache_active(enabled, ttl) {
        return get_one(conn, model, filter);
    }
    let key = cache_key("get_one", model, filter, &QueryOptions::default());
    if let Some(hit) = cache::get(&key) {
        return Ok(Some(hit));
    }
    match get_one(conn, model, filter)? {
        Some(doc) => {
            cache::put(key, doc.clone(), tags, ttl);
            Ok(Some(doc))
        }
        None => Ok(None),
    }
}

/// Writes bypass the cache entirely; callers invalidate the tags they know
/// their write affects.
pub fn invalidate(tags: &[String]) {
    cache::invalidate_tags(tags);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_options_sql() {
        let opts = QueryOptions {
            order_by: Some("createdAt".to_string()),
            descending: true,
            limit: Some(50),
            offset: Some(10),
        };
        assert_eq!(
            opts.to_sql().unwrap(),
            " ORDER BY created_at DESC LIMIT 50 OFFSET 10"
        );
    }

    #[test]
    fn test_query_options_reject_bad_order_column() {
        let opts = QueryOptions {
            order_by: Some("created_at; DROP TABLE leads".to_string()),
            ..Default::default()
        };
        assert!(opts.to_sql().is_err());
    }

    #[test]
    fn test_cache_key_distinguishes_filters() {
        let a = cache_key(
            "get_many",
            Model::Lead,
            &Filter::empty().and_eq("status", json!("new")),
            &QueryOptions::default(),
        );
        let b = cache_key(
            "get_many",
            Model::Lead,
            &Filter::empty().and_eq("status", json!("won")),
            &QueryOptions::default(),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_cache_never_active_in_tests() {
        assert!(!cache_active(true, TtlPolicy::NoExpiry));
    }
}
