// Admin query HTTP API: a small axum router exposing the event store over
// loopback-only HTTP, gated by the `X-Admin-Token` header for any endpoint
// that reads events or mutates the devices table. Grounded on the host
// project's own axum admin surface in api/mod.rs, generalized from its
// fixed route table to the list/get/aggregate/group-by/time-series/delete
// shape this store needs.

use crate::catalog::Catalog;
use crate::flow::ReloadLock;
use crate::store::{EventFilters, EventStore};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<EventStore>,
    pub catalog: Arc<Catalog>,
    pub reload_lock: Arc<ReloadLock>,
    pub admin_token: String,
}

fn check_token(headers: &HeaderMap, expected: &str) -> Result<(), StatusCode> {
    let got = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if got == expected {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub program: Option<String>,
    pub project: Option<String>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl From<&ListQuery> for EventFilters {
    fn from(q: &ListQuery) -> Self {
        EventFilters {
            provider: q.provider.clone(),
            model: q.model.clone(),
            program: q.program.clone(),
            project: q.project.clone(),
            ..Default::default()
        }
    }
}

async fn list_events(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    let filters = EventFilters::from(&q);
    match state
        .store
        .query_events(filters, q.skip.unwrap_or(0), q.limit.unwrap_or(50))
        .await
    {
        Ok((events, total)) => Json(json!({"events": events, "total": total})).into_response(),
        Err(e) => {
            tracing::error!("list_events failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_event(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    match state.store.get_event(&id).await {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("get_event failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn aggregate_usage(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    match state.store.aggregate_usage(EventFilters::from(&q)).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            tracing::error!("aggregate_usage failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn usage_by_model(State(state): State<AdminState>, headers: HeaderMap, Query(q): Query<ListQuery>) -> impl IntoResponse {
    grouped_response(&state, &headers, state.store.usage_by_model(EventFilters::from(&q)).await).await
}

async fn usage_by_program(State(state): State<AdminState>, headers: HeaderMap, Query(q): Query<ListQuery>) -> impl IntoResponse {
    grouped_response(&state, &headers, state.store.usage_by_program(EventFilters::from(&q)).await).await
}

async fn usage_by_project(State(state): State<AdminState>, headers: HeaderMap, Query(q): Query<ListQuery>) -> impl IntoResponse {
    grouped_response(&state, &headers, state.store.usage_by_project(EventFilters::from(&q)).await).await
}

async fn usage_by_device(State(state): State<AdminState>, headers: HeaderMap, Query(q): Query<ListQuery>) -> impl IntoResponse {
    grouped_response(&state, &headers, state.store.usage_by_device(EventFilters::from(&q)).await).await
}

async fn grouped_response(
    state: &AdminState,
    headers: &HeaderMap,
    result: Result<Vec<crate::store::GroupedUsage>, crate::store::StoreError>,
) -> Response {
    if let Err(code) = check_token(headers, &state.admin_token) {
        return code.into_response();
    }
    match result {
        Ok(grouped) => Json(grouped).into_response(),
        Err(e) => {
            tracing::error!("usage grouping failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OverTimeQuery {
    #[serde(flatten)]
    pub base: ListQuery,
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

fn default_granularity() -> String {
    "day".to_string()
}

async fn usage_over_time(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(q): Query<OverTimeQuery>,
) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    match state
        .store
        .usage_over_time(EventFilters::from(&q.base), &q.granularity)
        .await
    {
        Ok(buckets) => Json(buckets).into_response(),
        Err(e) => {
            tracing::error!("usage_over_time failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn delete_all_events(State(state): State<AdminState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    match state.store.delete_all_events().await {
        Ok(deleted) => Json(json!({"deleted": deleted})).into_response(),
        Err(e) => {
            tracing::error!("delete_all_events failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn list_devices(State(state): State<AdminState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    match state.store.get_devices().await {
        Ok(devices) => Json(devices).into_response(),
        Err(e) => {
            tracing::error!("list_devices failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn delete_device(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    match state.store.delete_device(&device_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("delete_device failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameDevice {
    pub name: String,
}

async fn rename_device(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    Json(body): Json<RenameDevice>,
) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    match state.store.register_device(&device_id, &body.name, None).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!("rename_device failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Reloads the provider catalog from the base descriptor plus the user
/// override file. Serialized through `reload_lock` so two concurrent reload
/// requests don't race each other's file reads.
async fn reload_catalog(State(state): State<AdminState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(code) = check_token(&headers, &state.admin_token) {
        return code.into_response();
    }
    let _guard = state.reload_lock.lock().await;
    match state.catalog.reload() {
        Ok(()) => Json(json!({"status": "reloaded"})).into_response(),
        Err(e) => {
            tracing::error!("catalog reload failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    if state.store.health_check().await {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "unavailable"})))
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/events", get(list_events).delete(delete_all_events))
        .route("/api/events/:id", get(get_event))
        .route("/api/usage/summary", get(aggregate_usage))
        .route("/api/usage/by-model", get(usage_by_model))
        .route("/api/usage/by-program", get(usage_by_program))
        .route("/api/usage/by-project", get(usage_by_project))
        .route("/api/usage/by-device", get(usage_by_device))
        .route("/api/usage/over-time", get(usage_over_time))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:id", put(rename_device).delete(delete_device))
        .route("/api/catalog/reload", post(reload_catalog))
        .with_state(state)
}
