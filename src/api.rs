use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::summarize::SummarizeError;
use crate::unpack_error;

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub q: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

const DEFAULT_LIMIT: i32 = 50;

impl QueryParams {
    pub fn limit(&self) -> i32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, DEFAULT_LIMIT)
    }

    pub fn offset(&self) -> i32 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { data })).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse { data })).into_response()
}

fn error(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

pub fn not_found(msg: &str) -> Response {
    error(StatusCode::NOT_FOUND, msg)
}

pub fn bad_request(msg: &str) -> Response {
    error(StatusCode::BAD_REQUEST, msg)
}

pub fn unauthorized(msg: &str) -> Response {
    error(StatusCode::UNAUTHORIZED, msg)
}

pub fn forbidden(msg: &str) -> Response {
    error(StatusCode::FORBIDDEN, msg)
}

pub fn bad_gateway(msg: &str) -> Response {
    error(StatusCode::BAD_GATEWAY, msg)
}

pub fn internal_error(msg: &str) -> Response {
    error(StatusCode::INTERNAL_SERVER_ERROR, msg)
}

impl IntoResponse for CaptureError {
    fn into_response(self) -> Response {
        tracing::debug!("capture rejected: {}", unpack_error(&self));
        match &self {
            CaptureError::Unauthenticated => unauthorized("Please sign in to save."),
            CaptureError::Invalid(e) => bad_request(&e.to_string()),
            CaptureError::NothingToSave => not_found("No selection found on this page."),
            CaptureError::Store(_) => internal_error("Save failed."),
        }
    }
}

impl IntoResponse for SummarizeError {
    fn into_response(self) -> Response {
        match &self {
            SummarizeError::Empty => bad_request("Paste some text to summarize"),
            SummarizeError::MissingApiKey => bad_request("Add your API key in Settings"),
            _ => bad_gateway("Summarization failed"),
        }
    }
}
