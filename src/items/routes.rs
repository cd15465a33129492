use axum::{
    Router,
    routing::{delete, get, post, put},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::list_items))
        .route("/", post(handler::create_item))
        .route("/:id", get(handler::get_item))
        .route("/:id", put(handler::update_item))
        .route("/:id", delete(handler::delete_item))
}
