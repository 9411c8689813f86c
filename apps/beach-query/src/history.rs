//! Recently executed queries, newest last.

use serde::{Deserialize, Serialize};

pub const MAX_QUERIES_IN_HISTORY: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInHistory {
    pub query_text: String,
    pub query_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<u64>,
    /// Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryHistory {
    entries: Vec<QueryInHistory>,
    current: Option<String>,
}

impl QueryHistory {
    pub fn new(mut entries: Vec<QueryInHistory>) -> Self {
        if entries.len() > MAX_QUERIES_IN_HISTORY {
            entries.drain(..entries.len() - MAX_QUERIES_IN_HISTORY);
        }
        Self {
            entries,
            current: None,
        }
    }

    pub fn entries(&self) -> &[QueryInHistory] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current(&self) -> Option<&QueryInHistory> {
        let id = self.current.as_deref()?;
        self.entries.iter().find(|entry| entry.query_id == id)
    }

    /// Appends a query, evicting the oldest past the cap. Blank text is ignored.
    pub fn save(&mut self, query_text: &str, query_id: &str) -> bool {
        if query_text.trim().is_empty() {
            return false;
        }
        self.entries.push(QueryInHistory {
            query_text: query_text.to_string(),
            query_id: query_id.to_string(),
            duration_us: None,
            end_time: None,
        });
        if self.entries.len() > MAX_QUERIES_IN_HISTORY {
            self.entries.remove(0);
        }
        self.current = Some(query_id.to_string());
        true
    }

    pub fn update_stats(&mut self, query_id: &str, duration_us: u64, end_time: i64) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.query_id == query_id)
        {
            Some(entry) => {
                entry.duration_us = Some(duration_us);
                entry.end_time = Some(end_time);
                true
            }
            None => false,
        }
    }

    /// Steps back, wrapping from the oldest entry to the newest.
    pub fn previous(&mut self) -> Option<&QueryInHistory> {
        let len = self.entries.len();
        let index = match self.position()? {
            Some(0) | None => len - 1,
            Some(index) => index - 1,
        };
        self.select(index)
    }

    /// Steps forward, wrapping from the newest entry to the oldest.
    pub fn next(&mut self) -> Option<&QueryInHistory> {
        let len = self.entries.len();
        let index = match self.position()? {
            None => len - 1,
            Some(index) if index + 1 >= len => 0,
            Some(index) => index + 1,
        };
        self.select(index)
    }

    /// Entries whose text contains `filter`, ignoring case.
    pub fn filtered(&self, filter: &str) -> Vec<&QueryInHistory> {
        let needle = filter.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.query_text.to_lowercase().contains(&needle))
            .collect()
    }

    /// `None` when empty; otherwise the index of the current entry, if known.
    fn position(&self) -> Option<Option<usize>> {
        if self.entries.is_empty() {
            return None;
        }
        let current = self.current.as_deref();
        Some(current.and_then(|id| self.entries.iter().position(|entry| entry.query_id == id)))
    }

    fn select(&mut self, index: usize) -> Option<&QueryInHistory> {
        let entry = self.entries.get(index)?;
        self.current = Some(entry.query_id.clone());
        Some(entry)
    }
}
