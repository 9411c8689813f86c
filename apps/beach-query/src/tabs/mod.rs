//! Editor tabs, each owning one query session.
//!
//! [`TabManager`] is the only writer of tab and session state. Query drivers
//! report back over a channel and [`TabManager::apply_event`] folds each event
//! in, dropping those addressed to closed tabs or superseded queries.

mod file_store;
mod store;

pub use file_store::FileTabStore;
pub use store::{DirtyFlags, InMemoryTabStore, PersistedTab, PersistedTabs, StoreError, TabStore};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::history::{QueryHistory, QueryInHistory};
use crate::protocol::{QueryAction, QueryParams, QueryRequest};
use crate::session::{
    drive_query, unix_millis, QueryResult, QuerySession, ResultStatus, SessionEvent,
    SessionEventKind, Transition,
};
use crate::transport::QueryTransport;

pub const DEFAULT_TAB_TITLE: &str = "New Query";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TabId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TabId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum TabError {
    #[error("unknown tab {0}")]
    UnknownTab(TabId),
    #[error("queries can only be dispatched inside a tokio runtime")]
    NoRuntime,
}

#[derive(Debug)]
pub struct QueryTab {
    id: TabId,
    title: String,
    input: String,
    is_dirty: bool,
    session: QuerySession,
    last_executed_query_text: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl QueryTab {
    fn new(id: TabId, title: String, input: String, now: i64) -> Self {
        Self {
            id,
            title,
            input,
            is_dirty: false,
            session: QuerySession::new(),
            last_executed_query_text: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn restored(persisted: PersistedTab, is_dirty: bool) -> Self {
        Self {
            id: TabId(persisted.id),
            title: persisted.title,
            input: persisted.input,
            is_dirty,
            session: QuerySession::new(),
            last_executed_query_text: None,
            created_at: persisted.created_at,
            updated_at: persisted.updated_at,
        }
    }

    pub fn id(&self) -> &TabId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn session(&self) -> &QuerySession {
        &self.session
    }

    pub fn result(&self) -> Option<&QueryResult> {
        self.session.result()
    }

    pub fn last_executed_query_text(&self) -> Option<&str> {
        self.last_executed_query_text.as_deref()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn to_persisted(&self) -> PersistedTab {
        PersistedTab {
            id: self.id.0.clone(),
            title: self.title.clone(),
            input: self.input.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    ClosedTab,
    StaleQuery,
}

/// Result of folding one driver event into the tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied {
        tab_id: TabId,
        query_id: String,
        transition: Transition,
    },
    Dropped(DropReason),
}

impl EventOutcome {
    /// Where the caller should send the user to authenticate, if anywhere.
    pub fn auth_redirect(&self) -> Option<Option<&str>> {
        match self {
            EventOutcome::Applied {
                transition: Transition::AuthRedirect { location },
                ..
            } => Some(location.as_deref()),
            _ => None,
        }
    }
}

pub struct TabManager {
    tabs: HashMap<TabId, QueryTab>,
    order: Vec<TabId>,
    active: TabId,
    new_tab_counter: usize,
    history: QueryHistory,
    store: Arc<dyn TabStore>,
    transport: Arc<dyn QueryTransport>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl fmt::Debug for TabManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabManager")
            .field("order", &self.order)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl TabManager {
    /// Restores tabs and history from `store`; falls back to one empty tab.
    pub fn new(store: Arc<dyn TabStore>, transport: Arc<dyn QueryTransport>) -> Self {
        let layout = store.load_layout().unwrap_or_else(|err| {
            warn!(target: "beach_query::tabs", error = %err, "could not load tab layout");
            None
        });
        let dirty = store.load_dirty().unwrap_or_else(|err| {
            warn!(target: "beach_query::tabs", error = %err, "could not load dirty flags");
            None
        });
        let history = store.load_history().unwrap_or_else(|err| {
            warn!(target: "beach_query::tabs", error = %err, "could not load query history");
            None
        });

        let (tabs, order, active) = restore_layout(layout, dirty.unwrap_or_default(), now_millis());
        debug!(
            target: "beach_query::tabs",
            tabs = order.len(),
            active = %active,
            "tabs restored"
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            tabs,
            order,
            active,
            new_tab_counter: 0,
            history: QueryHistory::new(history.unwrap_or_default()),
            store,
            transport,
            events_tx,
            events_rx,
        }
    }

    pub fn order(&self) -> &[TabId] {
        &self.order
    }

    pub fn tabs(&self) -> impl Iterator<Item = &QueryTab> + '_ {
        self.order.iter().filter_map(|id| self.tabs.get(id))
    }

    pub fn tab(&self, tab_id: &TabId) -> Option<&QueryTab> {
        self.tabs.get(tab_id)
    }

    pub fn active_tab_id(&self) -> &TabId {
        &self.active
    }

    pub fn active_tab(&self) -> Option<&QueryTab> {
        self.tabs.get(&self.active)
    }

    /// Looks a tab up by id, then by title.
    pub fn find_tab(&self, key: &str) -> Option<&QueryTab> {
        self.tabs
            .get(&TabId::from(key))
            .or_else(|| self.tabs().find(|tab| tab.title == key))
    }

    pub fn history(&self) -> &QueryHistory {
        &self.history
    }

    pub fn add_tab(&mut self, title: Option<String>, input: Option<String>, make_active: bool) -> TabId {
        let title = title.unwrap_or_default();
        let tab = QueryTab::new(TabId::generate(), title, input.unwrap_or_default(), now_millis());
        let id = tab.id.clone();
        self.order.push(id.clone());
        self.tabs.insert(id.clone(), tab);
        if make_active {
            self.active = id.clone();
        }
        debug!(target: "beach_query::tabs", tab_id = %id, "tab added");
        self.persist_layout();
        id
    }

    /// Opens an empty tab titled from the running counter and activates it.
    pub fn new_tab(&mut self) -> TabId {
        let title = match self.new_tab_counter {
            0 => DEFAULT_TAB_TITLE.to_string(),
            n => format!("{DEFAULT_TAB_TITLE} {n}"),
        };
        self.new_tab_counter += 1;
        self.add_tab(Some(title), None, true)
    }

    /// Removes a tab, cancelling its query. The last tab is reset instead.
    pub fn close_tab(&mut self, tab_id: &TabId) -> Result<(), TabError> {
        let index = self.position(tab_id)?;

        if self.order.len() == 1 {
            let tab = self.tab_mut(tab_id)?;
            tab.session.reset();
            tab.input.clear();
            tab.is_dirty = false;
            tab.last_executed_query_text = None;
            tab.updated_at = now_millis();
            debug!(target: "beach_query::tabs", tab_id = %tab_id, "last tab reset");
            self.persist_layout();
            self.persist_dirty();
            return Ok(());
        }

        if let Some(mut tab) = self.tabs.remove(tab_id) {
            tab.session.cancel();
        }
        self.order.remove(index);
        if self.active == *tab_id {
            let next = index.min(self.order.len() - 1);
            self.active = self.order[next].clone();
        }
        debug!(target: "beach_query::tabs", tab_id = %tab_id, active = %self.active, "tab closed");
        self.persist_layout();
        self.persist_dirty();
        Ok(())
    }

    pub fn close_other_tabs(&mut self, keep: &TabId) -> Result<(), TabError> {
        self.position(keep)?;
        let others: Vec<TabId> = self.order.iter().filter(|id| *id != keep).cloned().collect();
        for id in others {
            self.close_tab(&id)?;
        }
        Ok(())
    }

    pub fn close_all_tabs(&mut self) {
        for id in self.order.clone() {
            if let Err(err) = self.close_tab(&id) {
                warn!(target: "beach_query::tabs", error = %err, "close failed");
            }
        }
    }

    pub fn rename_tab(&mut self, tab_id: &TabId, title: impl Into<String>) -> Result<(), TabError> {
        let tab = self.tab_mut(tab_id)?;
        tab.title = title.into();
        tab.updated_at = now_millis();
        self.persist_layout();
        Ok(())
    }

    pub fn set_active_tab(&mut self, tab_id: &TabId) -> Result<(), TabError> {
        self.position(tab_id)?;
        if self.active != *tab_id {
            self.active = tab_id.clone();
            self.persist_layout();
        }
        Ok(())
    }

    /// Activates the neighbouring tab, wrapping at either end.
    pub fn activate_adjacent_tab(&mut self, forward: bool) {
        let len = self.order.len();
        if len < 2 {
            return;
        }
        let next = match self.order.iter().position(|id| *id == self.active) {
            None => 0,
            Some(current) if forward => (current + 1) % len,
            Some(current) => (current + len - 1) % len,
        };
        self.active = self.order[next].clone();
        self.persist_layout();
    }

    /// Copies a tab's input into a new active tab placed right after it.
    ///
    /// The source tab's running query is cancelled first.
    pub fn duplicate_tab(&mut self, tab_id: &TabId) -> Result<TabId, TabError> {
        let index = self.position(tab_id)?;
        let source = self.tab_mut(tab_id)?;
        source.session.cancel();
        let base_title = if source.title.is_empty() {
            DEFAULT_TAB_TITLE
        } else {
            source.title.as_str()
        };
        let title = format!("{base_title} (copy)");
        let tab = QueryTab::new(TabId::generate(), title, source.input.clone(), now_millis());

        let id = tab.id.clone();
        self.order.insert(index + 1, id.clone());
        self.tabs.insert(id.clone(), tab);
        self.active = id.clone();
        debug!(target: "beach_query::tabs", source = %tab_id, tab_id = %id, "tab duplicated");
        self.persist_layout();
        Ok(id)
    }

    pub fn change_input(&mut self, tab_id: &TabId, input: impl Into<String>) -> Result<(), TabError> {
        let tab = self.tab_mut(tab_id)?;
        tab.input = input.into();
        tab.updated_at = now_millis();
        self.persist_layout();
        Ok(())
    }

    pub fn set_dirty(&mut self, tab_id: &TabId, is_dirty: bool) -> Result<(), TabError> {
        let tab = self.tab_mut(tab_id)?;
        if tab.is_dirty != is_dirty {
            tab.is_dirty = is_dirty;
            self.persist_dirty();
        }
        Ok(())
    }

    /// Replaces the active tab's input with the previous history entry.
    pub fn recall_previous_query(&mut self) -> Option<String> {
        let text = self.history.previous()?.query_text.clone();
        self.recall(text)
    }

    pub fn recall_next_query(&mut self) -> Option<String> {
        let text = self.history.next()?.query_text.clone();
        self.recall(text)
    }

    fn recall(&mut self, text: String) -> Option<String> {
        let active = self.active.clone();
        self.change_input(&active, text.clone()).ok()?;
        Some(text)
    }

    /// Starts `params` in `tab_id`, superseding any query already running there.
    pub fn dispatch_query(&mut self, tab_id: &TabId, params: QueryParams) -> Result<String, TabError> {
        let runtime = Handle::try_current().map_err(|_| TabError::NoRuntime)?;
        let query_id = Uuid::new_v4().to_string();
        let request = QueryRequest::streaming(&params, query_id.clone());

        let tab = self.tabs.get_mut(tab_id).ok_or_else(|| TabError::UnknownTab(tab_id.clone()))?;
        let cancel = tab.session.dispatch(query_id.clone(), params.action);
        tab.last_executed_query_text = Some(params.query.clone());

        info!(
            target: "beach_query::tabs",
            tab_id = %tab_id,
            query_id = %query_id,
            action = %request.action,
            database = %request.database,
            "dispatching query"
        );
        runtime.spawn(drive_query(
            Arc::clone(&self.transport),
            request,
            cancel,
            tab_id.clone(),
            self.events_tx.clone(),
        ));

        if params.action == QueryAction::Execute && self.history.save(&params.query, &query_id) {
            self.persist_history();
        }
        Ok(query_id)
    }

    /// Returns whether a running query was stopped.
    pub fn cancel_query(&mut self, tab_id: &TabId) -> Result<bool, TabError> {
        Ok(self.tab_mut(tab_id)?.session.cancel())
    }

    pub fn apply_event(&mut self, event: SessionEvent) -> EventOutcome {
        let SessionEvent {
            tab_id,
            query_id,
            kind,
        } = event;
        let Some(tab) = self.tabs.get_mut(&tab_id) else {
            trace!(target: "beach_query::tabs", tab_id = %tab_id, query_id = %query_id, "event for closed tab");
            return EventOutcome::Dropped(DropReason::ClosedTab);
        };
        if tab.session.query_id() != Some(query_id.as_str()) {
            trace!(target: "beach_query::tabs", tab_id = %tab_id, query_id = %query_id, "event for superseded query");
            return EventOutcome::Dropped(DropReason::StaleQuery);
        }

        let transition = match kind {
            SessionEventKind::Chunk(chunk) => tab.session.apply_chunk(chunk),
            SessionEventKind::StreamData(batch) => tab.session.apply_stream_data(batch, Instant::now()),
            SessionEventKind::Failed(err) => tab.session.fail(&err),
        };

        if transition == Transition::Finished {
            let finished = tab.session.result().and_then(|result| {
                let completed = result.status() == ResultStatus::Completed
                    && result.action == QueryAction::Execute;
                if !completed {
                    return None;
                }
                Some((result.duration_us()?, result.end_time_ms()?))
            });
            if let Some((duration_us, end_time)) = finished {
                if self.history.update_stats(&query_id, duration_us, end_time) {
                    self.persist_history();
                }
            }
        }

        EventOutcome::Applied {
            tab_id,
            query_id,
            transition,
        }
    }

    /// Waits for the next driver event and applies it.
    pub async fn next_event(&mut self) -> Option<EventOutcome> {
        let event = self.events_rx.recv().await?;
        Some(self.apply_event(event))
    }

    /// Applies every event that is already queued.
    pub fn drain_events(&mut self) -> Vec<EventOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            outcomes.push(self.apply_event(event));
        }
        outcomes
    }

    /// Applies events until `tab_id` has no running query.
    pub async fn wait_for_query(&mut self, tab_id: &TabId) -> Result<Vec<EventOutcome>, TabError> {
        let mut outcomes = Vec::new();
        loop {
            let tab = self.tabs.get(tab_id).ok_or_else(|| TabError::UnknownTab(tab_id.clone()))?;
            if !tab.session.is_active() {
                return Ok(outcomes);
            }
            match self.next_event().await {
                Some(outcome) => outcomes.push(outcome),
                None => return Ok(outcomes),
            }
        }
    }

    pub fn persisted_layout(&self) -> PersistedTabs {
        PersistedTabs {
            active_tab_id: self.active.0.clone(),
            tabs_order: self.order.iter().map(|id| id.0.clone()).collect(),
            tabs_by_id: self
                .tabs
                .values()
                .map(|tab| (tab.id.0.clone(), tab.to_persisted()))
                .collect(),
        }
    }

    fn position(&self, tab_id: &TabId) -> Result<usize, TabError> {
        self.order
            .iter()
            .position(|id| id == tab_id)
            .ok_or_else(|| TabError::UnknownTab(tab_id.clone()))
    }

    fn tab_mut(&mut self, tab_id: &TabId) -> Result<&mut QueryTab, TabError> {
        self.tabs
            .get_mut(tab_id)
            .ok_or_else(|| TabError::UnknownTab(tab_id.clone()))
    }

    fn persist_layout(&self) {
        if let Err(err) = self.store.save_layout(&self.persisted_layout()) {
            warn!(target: "beach_query::tabs", error = %err, "failed to persist tab layout");
        }
    }

    fn persist_dirty(&self) {
        let dirty: DirtyFlags = self
            .tabs
            .values()
            .filter(|tab| tab.is_dirty)
            .map(|tab| (tab.id.0.clone(), true))
            .collect();
        if let Err(err) = self.store.save_dirty(&dirty) {
            warn!(target: "beach_query::tabs", error = %err, "failed to persist dirty flags");
        }
    }

    fn persist_history(&self) {
        let entries: &[QueryInHistory] = self.history.entries();
        if let Err(err) = self.store.save_history(entries) {
            warn!(target: "beach_query::tabs", error = %err, "failed to persist query history");
        }
    }
}

/// Rebuilds tabs from storage, repairing dangling ids and an unknown active tab.
fn restore_layout(
    layout: Option<PersistedTabs>,
    dirty: DirtyFlags,
    now: i64,
) -> (HashMap<TabId, QueryTab>, Vec<TabId>, TabId) {
    let mut tabs = HashMap::new();
    let mut order = Vec::new();
    let mut active_id = String::new();

    if let Some(mut layout) = layout {
        active_id = layout.active_tab_id;
        for id in layout.tabs_order {
            let Some(persisted) = layout.tabs_by_id.remove(&id) else {
                continue;
            };
            let is_dirty = dirty.get(&id).copied().unwrap_or(false);
            let tab = QueryTab::restored(persisted, is_dirty);
            order.push(tab.id.clone());
            tabs.insert(tab.id.clone(), tab);
        }
    }

    if order.is_empty() {
        let tab = QueryTab::new(TabId::generate(), String::new(), String::new(), now);
        order.push(tab.id.clone());
        tabs.insert(tab.id.clone(), tab);
    }

    let active = TabId(active_id);
    let active = if tabs.contains_key(&active) {
        active
    } else {
        order[0].clone()
    };
    (tabs, order, active)
}

fn now_millis() -> i64 {
    unix_millis(OffsetDateTime::now_utc())
}
