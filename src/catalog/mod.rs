//! Reference catalog: inventory items, providers, destinations.
//!
//! Plain CRUD through the persistence shim. The three entities share the
//! same handler shape and only differ in their model and required fields,
//! so the handlers delegate to a common set of helpers.

use crate::core::auth::Caller;
use crate::core::error::{ApiData, ApiError};
use crate::core::state::AppState;
use crate::store::{self, Filter, Model, QueryOptions, TtlPolicy};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const CACHE_TAG: &str = "catalog";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogListQuery {
    pub is_active: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn required_fields(model: Model) -> &'static [&'static str] {
    match model {
        Model::InventoryItem => &["name", "itemType"],
        Model::Provider => &["name", "serviceType"],
        Model::Destination => &["name", "country"],
        _ => &[],
    }
}

fn entity_name(model: Model) -> &'static str {
    match model {
        Model::InventoryItem => "inventory item",
        Model::Provider => "provider",
        Model::Destination => "destination",
        _ => "entity",
    }
}

async fn list_entities(
    state: Arc<AppState>,
    model: Model,
    query: CatalogListQuery,
) -> Result<Json<ApiData<Vec<Value>>>, ApiError> {
    let mut filter = Filter::empty();
    if let Some(is_active) = query.is_active {
        filter = filter.and_eq("isActive", json!(is_active));
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filter = filter.and_contains("name", search);
    }
    let options = QueryOptions {
        order_by: Some("name".to_string()),
        descending: false,
        limit: Some(query.limit.unwrap_or(200).clamp(1, 1000)),
        offset: query.offset,
    };
    let mut conn = state.conn.get()?;
    let rows = store::get_many_cached(
        &mut conn,
        model,
        &filter,
        &options,
        &[CACHE_TAG.to_string()],
        TtlPolicy::Seconds(state.config.cache.default_ttl_secs),
        state.config.cache.enabled,
    )?;
    Ok(ApiData::new(rows))
}

async fn get_entity(
    state: Arc<AppState>,
    model: Model,
    id: Uuid,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let row = store::get_one(&mut conn, model, &Filter::empty().and_eq("id", json!(id)))?
        .ok_or_else(|| ApiError::NotFound(entity_name(model)))?;
    Ok(ApiData::new(row))
}

async fn create_entity(
    state: Arc<AppState>,
    model: Model,
    mut body: Value,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let map = body
        .as_object_mut()
        .ok_or_else(|| ApiError::Validation("request body must be an object".to_string()))?;
    for field in required_fields(model) {
        let present = map
            .get(*field)
            .and_then(Value::as_str)
            .is_some_and(|v| !v.trim().is_empty());
        if !present {
            return Err(ApiError::missing_field(field));
        }
    }
    map.insert("id".to_string(), json!(Uuid::new_v4()));

    let mut conn = state.conn.get()?;
    let row = store::create_one(&mut conn, model, &body)?;
    store::invalidate(&[CACHE_TAG.to_string()]);
    Ok(ApiData::new(row))
}

async fn update_entity(
    state: Arc<AppState>,
    model: Model,
    id: Uuid,
    mut body: Value,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let map = body
        .as_object_mut()
        .ok_or_else(|| ApiError::Validation("request body must be an object".to_string()))?;
    map.remove("id");
    if map.is_empty() {
        return Err(ApiError::Validation("nothing to update".to_string()));
    }
    map.insert("updatedAt".to_string(), json!(Utc::now().to_rfc3339()));

    let mut conn = state.conn.get()?;
    let row = store::update_one(
        &mut conn,
        model,
        &Filter::empty().and_eq("id", json!(id)),
        &body,
    )?
    .ok_or_else(|| ApiError::NotFound(entity_name(model)))?;
    store::invalidate(&[CACHE_TAG.to_string()]);
    Ok(ApiData::new(row))
}

async fn delete_entity(
    state: Arc<AppState>,
    model: Model,
    id: Uuid,
) -> Result<Json<ApiData<Value>>, ApiError> {
    let mut conn = state.conn.get()?;
    let deleted = store::delete_one(&mut conn, model, &Filter::empty().and_eq("id", json!(id)))?;
    if deleted == 0 {
        return Err(ApiError::NotFound(entity_name(model)));
    }
    store::invalidate(&[CACHE_TAG.to_string()]);
    Ok(ApiData::new(json!({ "deleted": deleted })))
}

macro_rules! catalog_handlers {
    ($mod_name:ident, $model:expr) => {
        mod $mod_name {
            use super::*;

            pub async fn list(
                State(state): State<Arc<AppState>>,
                _caller: Caller,
                Query(query): Query<CatalogListQuery>,
            ) -> Result<Json<ApiData<Vec<Value>>>, ApiError> {
                list_entities(state, $model, query).await
            }

            pub async fn get_one(
                State(state): State<Arc<AppState>>,
                _caller: Caller,
                Path(id): Path<Uuid>,
            ) -> Result<Json<ApiData<Value>>, ApiError> {
                get_entity(state, $model, id).await
            }

            pub async fn create(
                State(state): State<Arc<AppState>>,
                caller: Caller,
                Json(body): Json<Value>,
            ) -> Result<Json<ApiData<Value>>, ApiError> {
                caller.require_advisor()?;
                create_entity(state, $model, body).await
            }

            pub async fn update(
                State(state): State<Arc<AppState>>,
                caller: Caller,
                Path(id): Path<Uuid>,
                Json(body): Json<Value>,
            ) -> Result<Json<ApiData<Value>>, ApiError> {
                caller.require_advisor()?;
                update_entity(state, $model, id, body).await
            }

            pub async fn delete(
                State(state): State<Arc<AppState>>,
                caller: Caller,
                Path(id): Path<Uuid>,
            ) -> Result<Json<ApiData<Value>>, ApiError> {
                caller.require_advisor()?;
                delete_entity(state, $model, id).await
            }
        }
    };
}

catalog_handlers!(inventory, Model::InventoryItem);
catalog_handlers!(providers, Model::Provider);
catalog_handlers!(destinations, Model::Destination);

pub fn configure_catalog_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/catalog/inventory",
            get(inventory::list).post(inventory::create),
        )
        .route(
            "/api/catalog/inventory/:id",
            get(inventory::get_one)
                .put(inventory::update)
                .delete(inventory::delete),
        )
        .route(
            "/api/catalog/providers",
            get(providers::list).post(providers::create),
        )
        .route(
            "/api/catalog/providers/:id",
            get(providers::get_one)
                .put(providers::update)
                .delete(providers::delete),
        )
        .route(
            "/api/catalog/destinations",
            get(destinations::list).post(destinations::create),
        )
        .route(
            "/api/catalog/destinations/:id",
            get(destinations::get_one)
                .put(destinations::update)
                .delete(destinations::delete),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_fields_per_entity() {
        assert_eq!(required_fields(Model::InventoryItem), &["name", "itemType"]);
        assert_eq!(required_fields(Model::Provider), &["name", "serviceType"]);
        assert_eq!(required_fields(Model::Destination), &["name", "country"]);
    }

    #[test]
    fn test_entity_names() {
        assert_eq!(entity_name(Model::Destination), "destination");
        assert_eq!(entity_name(Model::Lead), "entity");
    }
}
