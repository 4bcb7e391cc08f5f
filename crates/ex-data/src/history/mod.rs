//! Persisted query history, keyed by data-source id.
//!
//! The store is a key-value side effect invoked by the batch runner on every
//! successful completion. Entries are ordered newest-last and capped.

use ahash::AHashMap;
use parking_lot::Mutex;

use ex_core::HistoryEntry;

/// Maximum retained entries per data source.
pub const HISTORY_LIMIT: usize = 100;

pub trait HistoryStore: Send + Sync {
    fn append(&self, datasource_id: &str, entry: HistoryEntry);
    fn entries(&self, datasource_id: &str) -> Vec<HistoryEntry>;
}

/// In-memory history store.
pub struct MemoryHistory {
    limit: usize,
    entries: Mutex<AHashMap<String, Vec<HistoryEntry>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            entries: Mutex::new(AHashMap::new()),
        }
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for MemoryHistory {
    fn append(&self, datasource_id: &str, entry: HistoryEntry) {
        let mut entries = self.entries.lock();
        let list = entries.entry(datasource_id.to_string()).or_default();

        // Skip consecutive duplicates of the same query set.
        if list.last().map(|e| &e.queries) == Some(&entry.queries) {
            return;
        }
        list.push(entry);
        if list.len() > self.limit {
            let excess = list.len() - self.limit;
            list.drain(..excess);
        }
    }

    fn entries(&self, datasource_id: &str) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .get(datasource_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts_ms: i64, text: &str) -> HistoryEntry {
        HistoryEntry {
            ts_ms,
            queries: vec![text.to_string()],
        }
    }

    #[test]
    fn entries_are_keyed_by_datasource() {
        let store = MemoryHistory::new();
        store.append("prom", entry(1, "up"));
        store.append("loki", entry(2, "{job=\"api\"}"));

        assert_eq!(store.entries("prom").len(), 1);
        assert_eq!(store.entries("loki").len(), 1);
        assert!(store.entries("other").is_empty());
    }

    #[test]
    fn cap_drops_oldest_entries() {
        let store = MemoryHistory::with_limit(2);
        store.append("prom", entry(1, "one"));
        store.append("prom", entry(2, "two"));
        store.append("prom", entry(3, "three"));

        let entries = store.entries("prom");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].queries, vec!["two"]);
        assert_eq!(entries[1].queries, vec!["three"]);
    }

    #[test]
    fn consecutive_duplicates_collapse() {
        let store = MemoryHistory::new();
        store.append("prom", entry(1, "up"));
        store.append("prom", entry(2, "up"));

        assert_eq!(store.entries("prom").len(), 1);
    }
}
