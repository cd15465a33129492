//! HTTP handlers for the panel's item library.

use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};

use super::Items;
use crate::api::{QueryParams, bad_request, created, internal_error, not_found, success, unauthorized};
use crate::handler::AppState;
use crate::model::{Principal, UpdateItem};
use crate::router::{AuthContext, SaveHighlight};
use crate::validation::{sanitize_tags, validate_tags};

async fn principal(state: &AppState) -> Result<Principal, Response> {
    state
        .auth
        .current()
        .await
        .ok_or_else(|| unauthorized("Sign in first."))
}

pub async fn list_items(State(state): State<AppState>, Query(params): Query<QueryParams>) -> Response {
    let owner = match principal(&state).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    let lib = Items::new(state.db.connection());
    let result = match params.q.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => lib.search(&owner, q, params.limit()).await,
        _ => lib.list(&owner, params.limit(), params.offset()).await,
    };

    match result {
        Ok(items) => success(items),
        Err(e) => {
            tracing::error!("Failed to list items: {}", e);
            internal_error("Failed to list items")
        }
    }
}

/// Saves the previewed highlight, consuming it.
pub async fn create_item(State(state): State<AppState>, Json(payload): Json<SaveHighlight>) -> Response {
    match state.router.save_highlight(payload).await {
        Ok(item) => created(item),
        Err(e) => e.into_response(),
    }
}

pub async fn get_item(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let owner = match principal(&state).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match Items::new(state.db.connection()).get(&owner, &id).await {
        Ok(Some(item)) => success(item),
        Ok(None) => not_found("Item not found"),
        Err(e) => {
            tracing::error!("Failed to get item {}: {}", id, e);
            internal_error("Failed to get item")
        }
    }
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateItem>,
) -> Response {
    let owner = match principal(&state).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    let payload = UpdateItem {
        tags: payload.tags.map(|tags| sanitize_tags(&tags)),
        note: payload.note.map(|note| note.trim().to_string()),
    };
    if let Some(Err(e)) = payload.tags.as_deref().map(validate_tags) {
        return bad_request(&e.to_string());
    }

    match Items::new(state.db.connection()).update(&owner, &id, payload).await {
        Ok(Some(item)) => success(item),
        Ok(None) => not_found("Item not found"),
        Err(e) => {
            tracing::error!("Failed to update item {}: {}", id, e);
            internal_error("Failed to update item")
        }
    }
}

pub async fn delete_item(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let owner = match principal(&state).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match Items::new(state.db.connection()).delete(&owner, &id).await {
        Ok(true) => success(serde_json::json!({ "deleted": true })),
        Ok(false) => not_found("Item not found"),
        Err(e) => {
            tracing::error!("Failed to delete item {}: {}", id, e);
            internal_error("Failed to delete item")
        }
    }
}
