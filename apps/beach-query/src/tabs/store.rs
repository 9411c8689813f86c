use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::QueryInHistory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode stored state: {0}")]
    Decode(#[from] toml::de::Error),
    #[error("failed to encode state: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("no state directory available")]
    NoStateDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTab {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Tab layout as written to storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTabs {
    #[serde(default)]
    pub active_tab_id: String,
    #[serde(default)]
    pub tabs_order: Vec<String>,
    #[serde(default)]
    pub tabs_by_id: BTreeMap<String, PersistedTab>,
}

pub type DirtyFlags = BTreeMap<String, bool>;

/// Persistence hook for the tab manager.
///
/// Loads return `Ok(None)` when nothing has been stored yet.
pub trait TabStore: Send + Sync {
    fn load_layout(&self) -> Result<Option<PersistedTabs>, StoreError>;
    fn save_layout(&self, layout: &PersistedTabs) -> Result<(), StoreError>;
    fn load_dirty(&self) -> Result<Option<DirtyFlags>, StoreError>;
    fn save_dirty(&self, dirty: &DirtyFlags) -> Result<(), StoreError>;
    fn load_history(&self) -> Result<Option<Vec<QueryInHistory>>, StoreError>;
    fn save_history(&self, entries: &[QueryInHistory]) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    layout: Option<PersistedTabs>,
    dirty: Option<DirtyFlags>,
    history: Option<Vec<QueryInHistory>>,
    layout_saves: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryTabStore {
    state: Mutex<MemoryState>,
}

impl InMemoryTabStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layout(layout: PersistedTabs, dirty: DirtyFlags) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock();
            state.layout = Some(layout);
            state.dirty = Some(dirty);
        }
        store
    }

    pub fn layout(&self) -> Option<PersistedTabs> {
        self.state.lock().layout.clone()
    }

    pub fn dirty(&self) -> Option<DirtyFlags> {
        self.state.lock().dirty.clone()
    }

    pub fn history(&self) -> Option<Vec<QueryInHistory>> {
        self.state.lock().history.clone()
    }

    pub fn layout_saves(&self) -> usize {
        self.state.lock().layout_saves
    }
}

impl TabStore for InMemoryTabStore {
    fn load_layout(&self) -> Result<Option<PersistedTabs>, StoreError> {
        Ok(self.state.lock().layout.clone())
    }

    fn save_layout(&self, layout: &PersistedTabs) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.layout = Some(layout.clone());
        state.layout_saves += 1;
        Ok(())
    }

    fn load_dirty(&self) -> Result<Option<DirtyFlags>, StoreError> {
        Ok(self.state.lock().dirty.clone())
    }

    fn save_dirty(&self, dirty: &DirtyFlags) -> Result<(), StoreError> {
        self.state.lock().dirty = Some(dirty.clone());
        Ok(())
    }

    fn load_history(&self) -> Result<Option<Vec<QueryInHistory>>, StoreError> {
        Ok(self.state.lock().history.clone())
    }

    fn save_history(&self, entries: &[QueryInHistory]) -> Result<(), StoreError> {
        self.state.lock().history = Some(entries.to_vec());
        Ok(())
    }
}
