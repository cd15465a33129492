//! Page-side selection observer.
//!
//! Raw selection-change notifications arrive many times per second while the
//! user drags. The observer coalesces them behind a trailing debounce and only
//! reports transitions: a new qualifying selection, or the selection going
//! away. Each page gets its own observer task; the returned [`ObserverHandle`]
//! is the only way to reach it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::bus::{Bus, Event};
use crate::model::SelectionSnapshot;
use crate::source::{PageContext, SelectionSource};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);
pub const MIN_SELECTION_CHARS: usize = 4;

const SIGNAL_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct ObserverSettings {
    pub debounce: Duration,
    pub min_chars: usize,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            min_chars: MIN_SELECTION_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Preview(SelectionSnapshot),
    Cleared,
}

impl From<Transition> for Event {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Preview(snapshot) => Event::SelectionPreview {
                text: snapshot.text,
                url: snapshot.url,
                title: snapshot.title,
            },
            Transition::Cleared => Event::SelectionCleared,
        }
    }
}

/// Selection state machine, free of timers and I/O.
#[derive(Debug)]
pub struct SelectionTracker {
    min_chars: usize,
    last_reported: String,
}

impl SelectionTracker {
    pub fn new(min_chars: usize) -> Self {
        Self {
            min_chars,
            last_reported: String::new(),
        }
    }

    pub fn last_reported(&self) -> &str {
        &self.last_reported
    }

    pub fn evaluate(&mut self, snapshot: SelectionSnapshot) -> Option<Transition> {
        if snapshot.text.chars().count() >= self.min_chars {
            if snapshot.text == self.last_reported {
                return None;
            }
            self.last_reported = snapshot.text.clone();
            return Some(Transition::Preview(snapshot));
        }

        // Shrinking below the threshold counts as clearing.
        if self.last_reported.is_empty() {
            None
        } else {
            self.last_reported.clear();
            Some(Transition::Cleared)
        }
    }

    pub fn blur(&mut self, snapshot: &SelectionSnapshot) -> Option<Transition> {
        if snapshot.is_empty() {
            self.last_reported.clear();
            Some(Transition::Cleared)
        } else {
            None
        }
    }
}

/// Trailing debounce timer. Resetting pushes the deadline out; nothing stacks.
#[derive(Debug)]
pub struct Debounce {
    period: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.period);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum PageSignal {
    SelectionChanged,
    WindowBlur,
    Query(oneshot::Sender<SelectionSnapshot>),
}

pub struct SelectionObserver {
    page: Arc<dyn PageContext>,
    bus: Bus,
    tracker: SelectionTracker,
    debounce: Debounce,
    inbox: mpsc::Receiver<PageSignal>,
}

impl SelectionObserver {
    /// Starts an observer for one page. It stops when every handle is dropped.
    pub fn spawn(page: Arc<dyn PageContext>, bus: Bus, settings: ObserverSettings) -> ObserverHandle {
        let (tx, inbox) = mpsc::channel(SIGNAL_BUFFER);
        let observer = SelectionObserver {
            page,
            bus,
            tracker: SelectionTracker::new(settings.min_chars),
            debounce: Debounce::new(settings.debounce),
            inbox,
        };
        tokio::spawn(observer.run());
        ObserverHandle { tx }
    }

    async fn run(mut self) {
        loop {
            let deadline = self.debounce.deadline();
            tokio::select! {
                biased;
                signal = self.inbox.recv() => match signal {
                    Some(signal) => self.on_signal(signal),
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    self.debounce.cancel();
                    let snapshot = self.page.selection();
                    if let Some(transition) = self.tracker.evaluate(snapshot) {
                        self.report(transition);
                    }
                }
            }
        }
        tracing::debug!("selection observer stopped");
    }

    fn on_signal(&mut self, signal: PageSignal) {
        match signal {
            PageSignal::SelectionChanged => self.debounce.reset(),
            PageSignal::WindowBlur => {
                let snapshot = self.page.selection();
                if let Some(transition) = self.tracker.blur(&snapshot) {
                    self.debounce.cancel();
                    self.report(transition);
                }
            }
            PageSignal::Query(reply) => {
                // The asker may have given up already.
                let _ = reply.send(self.page.selection());
            }
        }
    }

    fn report(&self, transition: Transition) {
        self.bus.publish(transition.into());
    }
}

/// Cheap, cloneable way for the host page and panels to reach an observer.
#[derive(Clone)]
pub struct ObserverHandle {
    tx: mpsc::Sender<PageSignal>,
}

impl ObserverHandle {
    /// Never blocks. If the inbox is full a change is already queued, and that
    /// one will arm the debounce just as well.
    pub fn on_selection_change(&self) {
        let _ = self.tx.try_send(PageSignal::SelectionChanged);
    }

    /// Waits for room in the inbox rather than dropping the blur, which is
    /// the only signal that clears without a debounce.
    pub async fn on_window_blur(&self) {
        if self.tx.send(PageSignal::WindowBlur).await.is_err() {
            tracing::warn!("selection observer is gone, window blur ignored");
        }
    }
}

#[async_trait]
impl SelectionSource for ObserverHandle {
    /// Live read that bypasses the debounce and the minimum length.
    async fn query(&self) -> Option<SelectionSnapshot> {
        let (reply, response) = oneshot::channel();
        self.tx.send(PageSignal::Query(reply)).await.ok()?;
        response.await.ok()
    }
}
