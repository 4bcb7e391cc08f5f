//! Query rows, refresh intervals and the per-pane key registry.

use std::time::Duration;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// One user-authored query row. The runner only ever reads a snapshot taken
/// at batch start; rows are mutated exclusively through pane-state methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Stable key identifying the row ("A", "B", ...).
    pub key: String,
    /// Target expression as typed by the user.
    pub expr: String,
    /// Hidden rows are kept but excluded from execution.
    pub hidden: bool,
}

impl Query {
    pub fn new(key: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expr: expr.into(),
            hidden: false,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.expr.trim().is_empty()
    }

    /// Runnable rows are visible and non-empty.
    pub fn is_runnable(&self) -> bool {
        !self.hidden && !self.is_blank()
    }
}

/// One persisted history entry: the query texts of a completed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts_ms: i64,
    pub queries: Vec<String>,
}

/// Refresh setting for a pane. `Live` is the sentinel that switches the pane
/// from interval polling to persistent streaming subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshInterval {
    Off,
    Every(Duration),
    Live,
}

impl RefreshInterval {
    pub fn is_live(&self) -> bool {
        matches!(self, RefreshInterval::Live)
    }

    /// Parses "off", "live", or a humantime duration such as "5s" or "1m".
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        match text.trim().to_lowercase().as_str() {
            "" | "off" => Ok(RefreshInterval::Off),
            "live" => Ok(RefreshInterval::Live),
            other => {
                let duration = humantime::parse_duration(other)?;
                Ok(RefreshInterval::Every(duration))
            }
        }
    }
}

impl std::fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshInterval::Off => write!(f, "off"),
            RefreshInterval::Live => write!(f, "live"),
            RefreshInterval::Every(d) => write!(f, "{}", humantime::format_duration(*d)),
        }
    }
}

/// Allocates stable query keys within one pane. An explicit object rather
/// than a process-wide set so tests and panes each own their key space.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    claimed: AHashSet<String>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims and returns the first free key in the sequence
    /// "A".."Z", "AA", "AB", ...
    pub fn next_key(&mut self) -> String {
        let mut index = 0usize;
        loop {
            let key = Self::key_at(index);
            if self.claimed.insert(key.clone()) {
                return key;
            }
            index += 1;
        }
    }

    /// Claims a specific key; false if already taken.
    pub fn claim(&mut self, key: &str) -> bool {
        self.claimed.insert(key.to_string())
    }

    pub fn release(&mut self, key: &str) {
        self.claimed.remove(key);
    }

    pub fn reset(&mut self) {
        self.claimed.clear();
    }

    fn key_at(mut index: usize) -> String {
        // Bijective base-26 over 'A'..'Z'.
        let mut out = String::new();
        loop {
            out.insert(0, (b'A' + (index % 26) as u8) as char);
            index /= 26;
            if index == 0 {
                break;
            }
            index -= 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_allocates_in_sequence() {
        let mut registry = KeyRegistry::new();
        let keys: Vec<String> = (0..27).map(|_| registry.next_key()).collect();

        assert_eq!(keys[0], "A");
        assert_eq!(keys[1], "B");
        assert_eq!(keys[25], "Z");
        assert_eq!(keys[26], "AA");
    }

    #[test]
    fn registry_reuses_released_keys() {
        let mut registry = KeyRegistry::new();
        let a = registry.next_key();
        let _b = registry.next_key();

        registry.release(&a);
        assert_eq!(registry.next_key(), "A");
    }

    #[test]
    fn refresh_interval_parses_sentinels_and_durations() {
        assert_eq!(RefreshInterval::parse("off").unwrap(), RefreshInterval::Off);
        assert_eq!(RefreshInterval::parse("").unwrap(), RefreshInterval::Off);
        assert_eq!(
            RefreshInterval::parse("Live").unwrap(),
            RefreshInterval::Live
        );
        assert_eq!(
            RefreshInterval::parse("5s").unwrap(),
            RefreshInterval::Every(Duration::from_secs(5))
        );
        assert!(RefreshInterval::parse("not-a-duration").is_err());
    }

    #[test]
    fn blank_and_hidden_queries_are_not_runnable() {
        let blank = Query::new("A", "   ");
        assert!(!blank.is_runnable());

        let mut hidden = Query::new("B", "rate(requests[5m])");
        hidden.hidden = true;
        assert!(!hidden.is_runnable());

        assert!(Query::new("C", "up").is_runnable());
    }
}
