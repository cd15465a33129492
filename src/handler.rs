use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::api::{bad_request, created, forbidden, internal_error, success};
use crate::bus::{Bus, Event, PAGE_EVENTS, PANEL_EVENTS};
use crate::cache::HighlightCache;
use crate::config::Config;
use crate::db::Database;
use crate::items;
use crate::model::Principal;
use crate::rate_limit::RateLimiter;
use crate::router::{LogNotifier, MessageRouter, SessionAuth};
use crate::summarize::SummaryService;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub bus: Bus,
    pub router: Arc<MessageRouter>,
    pub auth: Arc<SessionAuth>,
    pub summaries: Arc<SummaryService>,
    pub allowed_origins: Arc<Vec<HeaderValue>>,
}

impl AppState {
    pub fn new(db: Arc<Database>, cfg: &Config) -> Self {
        let bus = Bus::new(cfg.bus.capacity);
        let principal = cfg
            .app
            .get_user()
            .map(|uid| Principal::new(uid).in_project(cfg.app.get_project()));
        let auth = Arc::new(SessionAuth::new(principal));
        let limiter = Arc::new(RateLimiter::new(
            cfg.rate_limit.max_requests,
            cfg.rate_limit.window(),
        ));
        let router = MessageRouter::new(
            bus.clone(),
            HighlightCache::new(db.clone()),
            auth.clone(),
            db.clone(),
            Arc::new(LogNotifier),
            limiter,
        )
        .with_max_text_chars(cfg.capture.max_text_chars);

        let allowed_origins = cfg
            .app
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("ignoring allowed origin {:?}: {}", origin, e);
                    None
                }
            })
            .collect();

        Self {
            db,
            bus,
            router: Arc::new(router),
            auth,
            summaries: Arc::new(SummaryService::from_config(&cfg.summarize)),
            allowed_origins: Arc::new(allowed_origins),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(state.allowed_origins.iter().cloned()))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(healthcheck))
        .route("/events", post(publish_event))
        .route("/events/stream", get(stream_events))
        .route("/highlight", get(get_highlight).delete(clear_highlight))
        .route("/capture", post(capture))
        .route("/session", post(sign_in).delete(sign_out))
        .route("/summarize", post(summarize))
        .nest("/items", items::routes())
        .layer(middleware::from_fn_with_state(state.clone(), check_origin))
        .layer(cors)
        .with_state(state)
}

/// Browsers always send `Origin` on cross-site requests; only configured ones
/// get through. Local clients that send none are let in.
async fn check_origin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let refused = request
        .headers()
        .get(header::ORIGIN)
        .filter(|origin| !state.allowed_origins.contains(*origin))
        .cloned();
    if let Some(origin) = refused {
        tracing::warn!(origin = ?origin, path = %request.uri().path(), "refused request from foreign origin");
        return forbidden("origin not allowed");
    }
    next.run(request).await
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    success("ok")
}

/// Entry point for page observers. Only page events are accepted.
pub async fn publish_event(State(state): State<AppState>, Json(event): Json<Event>) -> Response {
    if !PAGE_EVENTS.contains(&event.kind()) {
        return bad_request("only selectionPreview and selectionCleared may be sent by pages");
    }
    state.bus.publish(event);
    StatusCode::ACCEPTED.into_response()
}

/// Router broadcasts for open panels. A panel that is not connected misses them.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = state
        .bus
        .subscribe(PANEL_EVENTS)
        .into_stream()
        .filter_map(|event| async move {
            match SseEvent::default().event(event.kind().as_str()).json_data(&event) {
                Ok(sse) => Some(Ok::<_, Infallible>(sse)),
                Err(e) => {
                    tracing::warn!("failed to encode {} event: {}", event.kind().as_str(), e);
                    None
                }
            }
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn get_highlight(State(state): State<AppState>) -> Response {
    match state.router.cache().get().await {
        Ok(record) => success(record),
        Err(e) => {
            tracing::error!("Failed to read latest highlight: {}", e);
            internal_error("Failed to read latest highlight")
        }
    }
}

pub async fn clear_highlight(State(state): State<AppState>) -> Response {
    state.router.handle(Event::SelectionCleared).await;
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    #[serde(default)]
    pub selection_text: String,
    #[serde(default)]
    pub page_url: String,
    #[serde(default)]
    pub page_title: String,
}

/// Context-menu save from the browser.
pub async fn capture(State(state): State<AppState>, Json(payload): Json<CaptureRequest>) -> Response {
    match state
        .router
        .handle_direct_save(&payload.selection_text, &payload.page_url, &payload.page_title)
        .await
    {
        Ok(item) => created(item),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub uid: String,
    #[serde(default)]
    pub project: Option<String>,
}

/// Signing in again with another `project` switches projects.
pub async fn sign_in(State(state): State<AppState>, Json(payload): Json<SignInRequest>) -> Response {
    let uid = payload.uid.trim();
    if uid.is_empty() {
        return bad_request("uid is required");
    }
    let principal = Principal::new(uid).in_project(payload.project.as_deref().unwrap_or(""));
    state.auth.sign_in(principal.clone()).await;
    success(principal)
}

pub async fn sign_out(State(state): State<AppState>) -> Response {
    state.auth.sign_out().await;
    state.router.on_signed_out().await;
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    #[serde(default)]
    pub text: String,
}

pub async fn summarize(State(state): State<AppState>, Json(payload): Json<SummarizeRequest>) -> Response {
    match state.summaries.summarize(&payload.text).await {
        Ok(summary) => success(serde_json::json!({ "summary": summary })),
        Err(e) => e.into_response(),
    }
}
