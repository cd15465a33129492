//! Extension-wide message bus.
//!
//! Every context publishes onto one broadcast channel and subscribes to the
//! kinds it cares about. Delivery is best effort: a subscriber that does not
//! exist when an event is published never sees it, and nothing is replayed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::model::HighlightRecord;

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    SelectionPreview {
        text: String,
        #[serde(default)]
        url: String,
        #[serde(default)]
        title: String,
    },
    SelectionCleared,
    LatestHighlight {
        payload: HighlightRecord,
    },
    LatestHighlightCleared,
    ItemSaved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SelectionPreview,
    SelectionCleared,
    LatestHighlight,
    LatestHighlightCleared,
    ItemSaved,
}

/// Kinds sent by page observers to the router.
pub const PAGE_EVENTS: &[EventKind] = &[EventKind::SelectionPreview, EventKind::SelectionCleared];

/// Kinds the router rebroadcasts to open panels.
pub const PANEL_EVENTS: &[EventKind] = &[
    EventKind::LatestHighlight,
    EventKind::LatestHighlightCleared,
    EventKind::ItemSaved,
];

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::SelectionPreview { .. } => EventKind::SelectionPreview,
            Event::SelectionCleared => EventKind::SelectionCleared,
            Event::LatestHighlight { .. } => EventKind::LatestHighlight,
            Event::LatestHighlightCleared => EventKind::LatestHighlightCleared,
            Event::ItemSaved => EventKind::ItemSaved,
        }
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SelectionPreview => "selectionPreview",
            EventKind::SelectionCleared => "selectionCleared",
            EventKind::LatestHighlight => "latestHighlight",
            EventKind::LatestHighlightCleared => "latestHighlightCleared",
            EventKind::ItemSaved => "itemSaved",
        }
    }
}

#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes to whoever is listening right now and returns how many
    /// receivers got it. Zero listeners is not an error.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(n) => {
                tracing::debug!(kind = kind.as_str(), receivers = n, "event published");
                n
            }
            Err(_) => {
                tracing::debug!(kind = kind.as_str(), "event published with no listeners");
                0
            }
        }
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: kinds.to_vec(),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    kinds: Vec<EventKind>,
}

impl Subscription {
    /// Waits for the next event of a subscribed kind. Returns `None` once every
    /// publisher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.kinds.contains(&event.kind()) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "bus subscriber lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl futures_util::Stream<Item = Event> {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}
