use serde::Serialize;

use crate::store::StoreError;
use crate::types::{DocumentId, PortfolioItem};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "items", rename_all = "lowercase")]
pub enum ListState {
    Loading,
    Loaded(Vec<PortfolioItem>),
    Empty,
}

/// Item list as last fetched. Fetch failures keep the previous list and
/// leave an error the caller can take once; a later successful fetch
/// clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct ListView {
    state: ListState,
    error: Option<StoreError>,
}

impl Default for ListView {
    fn default() -> Self {
        Self::new()
    }
}

impl ListView {
    pub fn new() -> Self {
        Self {
            state: ListState::Loading,
            error: None,
        }
    }

    pub fn state(&self) -> &ListState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, ListState::Loading)
    }

    pub fn items(&self) -> &[PortfolioItem] {
        match &self.state {
            ListState::Loaded(items) => items,
            ListState::Loading | ListState::Empty => &[],
        }
    }

    pub fn find(&self, id: &DocumentId) -> Option<&PortfolioItem> {
        self.items().iter().find(|item| &item.id == id)
    }

    pub fn apply_fetch(&mut self, result: Result<Vec<PortfolioItem>, StoreError>) {
        match result {
            Ok(items) => {
                self.state = if items.is_empty() {
                    ListState::Empty
                } else {
                    ListState::Loaded(items)
                };
                self.error = None;
            }
            Err(e) => self.error = Some(e),
        }
    }

    pub fn take_error(&mut self) -> Option<StoreError> {
        self.error.take()
    }
}
