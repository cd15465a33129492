//! Background message router.
//!
//! The router is the only writer of the latest-highlight cache on the preview
//! pipeline and the only place research items get created. Preview failures
//! are absorbed here; save failures go back to the user.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Event, Subscription};
use crate::cache::HighlightCache;
use crate::error::CaptureError;
use crate::model::{HighlightRecord, ItemSeed, Principal, ResearchItem};
use crate::rate_limit::RateLimiter;
use crate::validation::{MAX_TEXT_CHARS, sanitize_tags, sanitize_text, validate_item};

pub const SIGN_IN_REQUIRED: &str = "Please sign in to save.";
pub const SELECTION_SAVED: &str = "Selection saved.";
pub const SAVE_FAILED: &str = "Save failed.";

#[async_trait]
pub trait AuthContext: Send + Sync {
    async fn current(&self) -> Option<Principal>;
}

/// Holds whoever signed in to this service.
#[derive(Default)]
pub struct SessionAuth {
    principal: RwLock<Option<Principal>>,
}

impl SessionAuth {
    pub fn new(principal: Option<Principal>) -> Self {
        Self {
            principal: RwLock::new(principal),
        }
    }

    pub async fn sign_in(&self, principal: Principal) {
        tracing::info!(uid = %principal.uid, "signed in");
        *self.principal.write().await = Some(principal);
    }

    pub async fn sign_out(&self) -> Option<Principal> {
        let previous = self.principal.write().await.take();
        if let Some(p) = &previous {
            tracing::info!(uid = %p.uid, "signed out");
        }
        previous
    }
}

#[async_trait]
impl AuthContext for SessionAuth {
    async fn current(&self) -> Option<Principal> {
        self.principal.read().await.clone()
    }
}

/// Fire-and-forget user-visible notice.
pub trait Notifier: Send + Sync {
    fn show(&self, message: &str);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, message: &str) {
        tracing::info!(target: "marginalia::notify", "{}", message);
    }
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn create(&self, owner: &Principal, seed: ItemSeed) -> anyhow::Result<ResearchItem>;
}

/// A save issued from the panel. Missing text falls back to the cached highlight.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveHighlight {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub note: String,
}

pub struct MessageRouter {
    bus: Bus,
    cache: HighlightCache,
    auth: Arc<dyn AuthContext>,
    items: Arc<dyn ItemStore>,
    notifier: Arc<dyn Notifier>,
    limiter: Arc<RateLimiter>,
    max_text_chars: usize,
}

impl MessageRouter {
    pub fn new(
        bus: Bus,
        cache: HighlightCache,
        auth: Arc<dyn AuthContext>,
        items: Arc<dyn ItemStore>,
        notifier: Arc<dyn Notifier>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            bus,
            cache,
            auth,
            items,
            notifier,
            limiter,
            max_text_chars: MAX_TEXT_CHARS,
        }
    }

    pub fn with_max_text_chars(mut self, max_text_chars: usize) -> Self {
        self.max_text_chars = max_text_chars;
        self
    }

    pub fn cache(&self) -> &HighlightCache {
        &self.cache
    }

    /// Consumes page events until cancelled or the bus closes.
    pub async fn run(self: Arc<Self>, mut events: Subscription, cancel: CancellationToken) {
        tracing::info!("message router started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
        tracing::info!("message router shutting down");
    }

    pub async fn handle(&self, event: Event) {
        match event {
            Event::SelectionPreview { text, url, title } => {
                let record = HighlightRecord::capture(&text, &url, &title);
                if let Err(e) = self.cache.set(&record).await {
                    tracing::warn!("failed to persist latest highlight: {}", e);
                }
                self.bus.publish(Event::LatestHighlight { payload: record });
            }
            Event::SelectionCleared => {
                self.clear_highlight().await;
            }
            other => {
                tracing::debug!(kind = other.kind().as_str(), "router ignoring event");
            }
        }
    }

    /// Context-menu save. Bypasses the preview pipeline entirely.
    pub async fn handle_direct_save(
        &self,
        selection_text: &str,
        page_url: &str,
        page_title: &str,
    ) -> Result<ResearchItem, CaptureError> {
        let Some(owner) = self.auth.current().await else {
            self.notifier.show(SIGN_IN_REQUIRED);
            return Err(CaptureError::Unauthenticated);
        };

        let text = sanitize_text(selection_text, self.max_text_chars);
        let seed = ItemSeed::from_selection(&text, page_url, page_title);
        if let Err(e) = validate_item(&seed, self.max_text_chars) {
            self.notifier.show(&format!("Cannot save: {}", e));
            return Err(e.into());
        }

        match self.create(&owner, seed).await {
            Ok(item) => {
                self.bus.publish(Event::ItemSaved);
                self.notifier.show(SELECTION_SAVED);
                Ok(item)
            }
            Err(e) => {
                self.notifier.show(SAVE_FAILED);
                Err(e)
            }
        }
    }

    /// Panel save. Source fields come from the cached highlight, which the
    /// save then consumes.
    pub async fn save_highlight(&self, request: SaveHighlight) -> Result<ResearchItem, CaptureError> {
        let owner = self
            .auth
            .current()
            .await
            .ok_or(CaptureError::Unauthenticated)?;

        let cached = match self.cache.get().await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("failed to read latest highlight: {}", e);
                None
            }
        };

        let text = request
            .text
            .filter(|t| !t.trim().is_empty())
            .or_else(|| cached.as_ref().map(|c| c.text.clone()))
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(CaptureError::NothingToSave);
        }

        let mut seed = ItemSeed::from_selection(
            &sanitize_text(&text, self.max_text_chars),
            cached.as_ref().map(|c| c.source_url.as_str()).unwrap_or(""),
            cached.as_ref().map(|c| c.source_title.as_str()).unwrap_or(""),
        );
        seed.tags = sanitize_tags(&request.tags);
        seed.note = request.note.trim().to_string();
        validate_item(&seed, self.max_text_chars)?;

        let item = self.create(&owner, seed).await?;
        self.clear_highlight().await;
        self.bus.publish(Event::ItemSaved);
        Ok(item)
    }

    /// Drops the cached highlight after the principal goes away.
    pub async fn on_signed_out(&self) {
        self.clear_highlight().await;
    }

    async fn create(&self, owner: &Principal, seed: ItemSeed) -> Result<ResearchItem, CaptureError> {
        self.limiter.throttle().await;
        match self.items.create(owner, seed).await {
            Ok(item) => {
                tracing::info!(id = %item.id, uid = %owner.uid, "research item saved");
                Ok(item)
            }
            Err(e) => {
                tracing::error!(uid = %owner.uid, "failed to save research item: {:#}", e);
                Err(CaptureError::store(e))
            }
        }
    }

    async fn clear_highlight(&self) {
        if let Err(e) = self.cache.clear().await {
            tracing::warn!("failed to remove latest highlight: {}", e);
        }
        self.bus.publish(Event::LatestHighlightCleared);
    }
}
