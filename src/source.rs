use std::sync::Arc;

use async_trait::async_trait;

use crate::model::SelectionSnapshot;

/// The host page: whatever can answer "what is selected right now".
pub trait PageContext: Send + Sync {
    fn selection(&self) -> SelectionSnapshot;
}

/// Something a panel can ask for the active page's selection. `None` means
/// nothing answered (no observer injected, privileged page, closed tab).
#[async_trait]
pub trait SelectionSource: Send + Sync {
    async fn query(&self) -> Option<SelectionSnapshot>;
}

/// Stands in when no page is reachable at all.
pub struct NullSelectionSource;

#[async_trait]
impl SelectionSource for NullSelectionSource {
    async fn query(&self) -> Option<SelectionSnapshot> {
        None
    }
}

/// One-shot read of the page selection without going through an observer.
pub struct PageExtraction {
    page: Arc<dyn PageContext>,
}

impl PageExtraction {
    pub fn new(page: Arc<dyn PageContext>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl SelectionSource for PageExtraction {
    async fn query(&self) -> Option<SelectionSnapshot> {
        Some(self.page.selection())
    }
}
