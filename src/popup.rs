//! Panel-side selection client.
//!
//! When a panel opens it has three candidates for what to preview: a live
//! answer from the page observer, a one-shot extraction from the page, or
//! nothing. Whichever wins also overwrites the latest-highlight cache so the
//! cache and the preview agree. Broadcasts that arrive while the panel is open
//! only render: the router has already persisted whatever they carry, and a
//! queued broadcast may describe a record that is gone by the time it is read.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::{Event, Subscription};
use crate::cache::HighlightCache;
use crate::model::{HighlightRecord, SelectionSnapshot};
use crate::source::SelectionSource;

pub const DEFAULT_LIVE_QUERY_TIMEOUT: Duration = Duration::from_millis(750);

/// Rendering side of the panel.
pub trait PreviewView: Send + Sync {
    fn show_preview(&self, record: &HighlightRecord);
    fn clear_preview(&self);
    fn reload_items(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOrigin {
    Live,
    Extracted,
    Cleared,
}

pub struct PopupSelectionClient {
    live: Arc<dyn SelectionSource>,
    extraction: Arc<dyn SelectionSource>,
    cache: HighlightCache,
    view: Arc<dyn PreviewView>,
    query_timeout: Duration,
}

impl PopupSelectionClient {
    pub fn new(
        live: Arc<dyn SelectionSource>,
        extraction: Arc<dyn SelectionSource>,
        cache: HighlightCache,
        view: Arc<dyn PreviewView>,
    ) -> Self {
        Self {
            live,
            extraction,
            cache,
            view,
            query_timeout: DEFAULT_LIVE_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Reconciles the preview when the panel becomes active.
    pub async fn activate(&self) -> PreviewOrigin {
        if let Some(snapshot) = self.ask(self.live.as_ref(), "live query").await {
            self.adopt(snapshot.into()).await;
            return PreviewOrigin::Live;
        }

        if let Some(snapshot) = self.ask(self.extraction.as_ref(), "page extraction").await {
            self.adopt(snapshot.into()).await;
            return PreviewOrigin::Extracted;
        }

        // Nothing selected anywhere: a stale preview is worse than none.
        if let Err(e) = self.cache.clear().await {
            tracing::warn!("failed to remove latest highlight: {}", e);
        }
        self.view.clear_preview();
        PreviewOrigin::Cleared
    }

    /// Applies one broadcast from the router.
    pub async fn apply(&self, event: Event) {
        match event {
            Event::LatestHighlight { payload } => self.view.show_preview(&payload),
            Event::LatestHighlightCleared => self.view.clear_preview(),
            Event::ItemSaved => self.view.reload_items(),
            other => {
                tracing::debug!(kind = other.kind().as_str(), "panel ignoring event");
            }
        }
    }

    /// Follows router broadcasts for the lifetime of the panel.
    pub async fn run(&self, mut broadcasts: Subscription, cancel: CancellationToken) {
        loop {
            tokio::select! {
                event = broadcasts.recv() => match event {
                    Some(event) => self.apply(event).await,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
    }

    /// A late answer is dropped along with the timed-out future.
    async fn ask(&self, source: &dyn SelectionSource, what: &str) -> Option<SelectionSnapshot> {
        match tokio::time::timeout(self.query_timeout, source.query()).await {
            Ok(Some(snapshot)) if !snapshot.is_empty() => Some(snapshot),
            Ok(Some(_)) => {
                tracing::debug!("{} returned an empty selection", what);
                None
            }
            Ok(None) => {
                tracing::debug!("{} got no answer", what);
                None
            }
            Err(_) => {
                tracing::debug!(timeout_ms = self.query_timeout.as_millis() as u64, "{} timed out", what);
                None
            }
        }
    }

    async fn adopt(&self, record: HighlightRecord) {
        if let Err(e) = self.cache.set(&record).await {
            tracing::warn!("failed to persist latest highlight: {}", e);
        }
        self.view.show_preview(&record);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::bus::{Bus, PAGE_EVENTS, PANEL_EVENTS};
    use crate::cache::MemoryStateStore;
    use crate::observer::{ObserverSettings, SelectionObserver};
    use crate::rate_limit::RateLimiter;
    use crate::router::testing::{MemoryItemStore, RecordingNotifier};
    use crate::router::{MessageRouter, SessionAuth};
    use crate::source::testing::FakePage;
    use crate::source::{NullSelectionSource, PageExtraction};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Render {
        Preview(String),
        Cleared,
        Reload,
    }

    #[derive(Default)]
    struct RecordingView {
        renders: Mutex<Vec<Render>>,
    }

    impl RecordingView {
        fn renders(&self) -> Vec<Render> {
            self.renders.lock().unwrap().clone()
        }

        fn shown(&self) -> Option<String> {
            self.renders().into_iter().rev().find_map(|r| match r {
                Render::Preview(text) => Some(text),
                Render::Cleared => Some(String::new()),
                Render::Reload => None,
            })
        }
    }

    impl PreviewView for RecordingView {
        fn show_preview(&self, record: &HighlightRecord) {
            self.renders.lock().unwrap().push(Render::Preview(record.text.clone()));
        }

        fn clear_preview(&self) {
            self.renders.lock().unwrap().push(Render::Cleared);
        }

        fn reload_items(&self) {
            self.renders.lock().unwrap().push(Render::Reload);
        }
    }

    /// An observer that never answers.
    struct HangingSource;

    #[async_trait]
    impl SelectionSource for HangingSource {
        async fn query(&self) -> Option<SelectionSnapshot> {
            std::future::pending().await
        }
    }

    fn cache() -> HighlightCache {
        HighlightCache::new(Arc::new(MemoryStateStore::new()))
    }

    fn client(
        live: Arc<dyn SelectionSource>,
        extraction: Arc<dyn SelectionSource>,
        cache: HighlightCache,
        view: Arc<RecordingView>,
    ) -> PopupSelectionClient {
        PopupSelectionClient::new(live, extraction, cache, view)
    }

    #[tokio::test(start_paused = true)]
    async fn live_answer_wins_and_is_cached() {
        let bus = Bus::new(16);
        let page = FakePage::new("https://a.com/p", "P");
        page.select("  live selection ");
        let observer = SelectionObserver::spawn(page.clone(), bus, ObserverSettings::default());
        let cache = cache();
        let view = Arc::new(RecordingView::default());

        let popup = client(
            Arc::new(observer),
            Arc::new(NullSelectionSource),
            cache.clone(),
            view.clone(),
        );

        assert_eq!(popup.activate().await, PreviewOrigin::Live);
        assert_eq!(view.renders(), vec![Render::Preview("live selection".to_string())]);
        let cached = cache.get().await.unwrap().unwrap();
        assert_eq!(cached.text, "live selection");
        assert_eq!(cached.source_url, "https://a.com/p");
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_extraction_when_observer_is_silent() {
        let page = FakePage::new("https://a.com/p", "P");
        page.select("extracted text");
        let cache = cache();
        let view = Arc::new(RecordingView::default());

        let popup = client(
            Arc::new(HangingSource),
            Arc::new(PageExtraction::new(page)),
            cache.clone(),
            view.clone(),
        );

        assert_eq!(popup.activate().await, PreviewOrigin::Extracted);
        assert_eq!(view.shown().as_deref(), Some("extracted text"));
        assert_eq!(cache.get().await.unwrap().unwrap().text, "extracted text");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_live_answer_falls_through() {
        let bus = Bus::new(16);
        let page = FakePage::new("https://a.com/p", "P");
        let observer = SelectionObserver::spawn(page.clone(), bus, ObserverSettings::default());
        let other = FakePage::new("https://b.com", "B");
        other.select("from extraction");
        let view = Arc::new(RecordingView::default());

        let popup = client(
            Arc::new(observer),
            Arc::new(PageExtraction::new(other)),
            cache(),
            view.clone(),
        );

        assert_eq!(popup.activate().await, PreviewOrigin::Extracted);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_anywhere_clears_preview_and_cache() {
        let page = FakePage::new("https://a.com/p", "P");
        page.select("");
        let cache = cache();
        cache
            .set(&HighlightRecord::capture("stale highlight", "https://old.com", "Old"))
            .await
            .unwrap();
        let view = Arc::new(RecordingView::default());

        let popup = client(
            Arc::new(HangingSource),
            Arc::new(PageExtraction::new(page)),
            cache.clone(),
            view.clone(),
        );

        assert_eq!(popup.activate().await, PreviewOrigin::Cleared);
        assert_eq!(view.renders(), vec![Render::Cleared]);
        assert_eq!(cache.get().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn live_query_wait_is_bounded() {
        let view = Arc::new(RecordingView::default());
        let popup = client(
            Arc::new(HangingSource),
            Arc::new(HangingSource),
            cache(),
            view.clone(),
        )
        .with_query_timeout(Duration::from_millis(100));

        let start = tokio::time::Instant::now();
        assert_eq!(popup.activate().await, PreviewOrigin::Cleared);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(200));
        assert!(waited < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn broadcasts_drive_the_preview() {
        let view = Arc::new(RecordingView::default());
        let cache = cache();
        let popup = client(
            Arc::new(NullSelectionSource),
            Arc::new(NullSelectionSource),
            cache.clone(),
            view.clone(),
        );

        let record = HighlightRecord::capture("broadcast text", "https://a.com", "A");
        popup
            .apply(Event::LatestHighlight {
                payload: record,
            })
            .await;
        popup.apply(Event::ItemSaved).await;
        popup.apply(Event::LatestHighlightCleared).await;
        popup.apply(Event::SelectionCleared).await;

        assert_eq!(
            view.renders(),
            vec![
                Render::Preview("broadcast text".to_string()),
                Render::Reload,
                Render::Cleared,
            ]
        );
        assert_eq!(cache.get().await.unwrap(), None);
    }

    /// The router gets through a preview and its clear before the panel task
    /// reads either broadcast.
    #[tokio::test]
    async fn queued_preview_does_not_resurrect_cleared_highlight() {
        let bus = Bus::new(32);
        let store = Arc::new(MemoryStateStore::new());
        let router = MessageRouter::new(
            bus.clone(),
            HighlightCache::new(store.clone()),
            Arc::new(SessionAuth::new(None)),
            Arc::new(MemoryItemStore::default()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(RateLimiter::new(50, Duration::from_secs(60))),
        );
        let view = Arc::new(RecordingView::default());
        let popup = client(
            Arc::new(NullSelectionSource),
            Arc::new(NullSelectionSource),
            HighlightCache::new(store.clone()),
            view.clone(),
        );
        let broadcasts = bus.subscribe(PANEL_EVENTS);

        router
            .handle(Event::SelectionPreview {
                text: "stale words".to_string(),
                url: "https://a.com/p".to_string(),
                title: "P".to_string(),
            })
            .await;
        router.handle(Event::SelectionCleared).await;
        drop(router);
        drop(bus);

        popup.run(broadcasts, CancellationToken::new()).await;

        assert_eq!(
            view.renders(),
            vec![Render::Preview("stale words".to_string()), Render::Cleared]
        );
        assert_eq!(HighlightCache::new(store).get().await.unwrap(), None);
    }

    /// Page, router and panel wired over one bus, each in its own task.
    #[tokio::test(start_paused = true)]
    async fn selection_made_after_open_reaches_panel() {
        let bus = Bus::new(32);
        let store = Arc::new(MemoryStateStore::new());
        let cancel = CancellationToken::new();

        let router = Arc::new(MessageRouter::new(
            bus.clone(),
            HighlightCache::new(store.clone()),
            Arc::new(SessionAuth::new(None)),
            Arc::new(MemoryItemStore::default()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(RateLimiter::new(50, Duration::from_secs(60))),
        ));
        tokio::spawn(router.run(bus.subscribe(PAGE_EVENTS), cancel.clone()));

        let page = FakePage::new("https://a.com/p", "P");
        let observer = SelectionObserver::spawn(page.clone(), bus.clone(), ObserverSettings::default());
        let view = Arc::new(RecordingView::default());
        let popup = Arc::new(client(
            Arc::new(observer.clone()),
            Arc::new(PageExtraction::new(page.clone())),
            HighlightCache::new(store.clone()),
            view.clone(),
        ));

        assert_eq!(popup.activate().await, PreviewOrigin::Cleared);

        let panel = popup.clone();
        let broadcasts = bus.subscribe(PANEL_EVENTS);
        let panel_cancel = cancel.clone();
        let panel_task = tokio::spawn(async move { panel.run(broadcasts, panel_cancel).await });

        page.select("Hello world test");
        observer.on_selection_change();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(view.shown().as_deref(), Some("Hello world test"));

        page.select("");
        observer.on_selection_change();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(view.shown().as_deref(), Some(""));
        assert_eq!(HighlightCache::new(store).get().await.unwrap(), None);

        cancel.cancel();
        panel_task.await.unwrap();
    }
}
