//! Queue entries and cycle summaries

use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::fingerprint::{QueryFingerprint, SearchQuery};
use crate::constants::batch;

/// Named priority levels; any `u32` is accepted by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn value(self) -> u32 {
        match self {
            Priority::Low => batch::LOW_PRIORITY,
            Priority::Normal => batch::DEFAULT_PRIORITY,
            Priority::High => batch::HIGH_PRIORITY,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" | "default" => Ok(Priority::Normal),
            "high" | "premium" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}' (low, normal, high)", other)),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// One pending query against a quota-constrained source
///
/// `dedup_count` and `attempts` are kept in their own store hashes so they
/// can be bumped atomically; they are filled in when the entry is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub fingerprint: QueryFingerprint,
    pub keywords: Vec<String>,
    pub location: String,
    pub source: String,
    /// Higher runs first
    pub priority: u32,
    pub requested_at: DateTime<Utc>,
    /// Insertion order, breaks priority ties
    pub sequence: u64,
    #[serde(skip, default = "one")]
    pub dedup_count: u64,
    #[serde(skip)]
    pub attempts: u32,
}

fn one() -> u64 {
    1
}

impl QueuedRequest {
    /// Entry for a query already restricted to its source
    pub fn new(query: &SearchQuery, priority: u32, sequence: u64) -> Self {
        Self {
            fingerprint: query.fingerprint(),
            keywords: query.keywords.clone(),
            location: query.location.clone(),
            source: query.source.clone().unwrap_or_default(),
            priority,
            requested_at: Utc::now(),
            sequence,
            dedup_count: 1,
            attempts: 0,
        }
    }

    /// The query this entry will run
    pub fn query(&self) -> SearchQuery {
        SearchQuery::new(&self.keywords, &self.location).with_source(self.source.clone())
    }

    /// Requests folded into this entry beyond the first
    pub fn duplicates(&self) -> u64 {
        self.dedup_count.saturating_sub(1)
    }

    /// Execution order: priority descending, then insertion order
    pub(crate) fn order_key(&self) -> (Reverse<u32>, u64) {
        (Reverse(self.priority), self.sequence)
    }
}

/// Outcome of one drain cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Entries taken from the queue this cycle
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries removed after exhausting their attempts
    pub dropped: usize,
    /// Entries skipped because the source's window was exhausted
    pub rate_limited: usize,
    /// Repeat requests served by the entries that succeeded
    pub deduplicated_requests: u64,
    /// Upstream calls avoided: collapsed repeats plus entries already cached
    pub api_calls_saved: u64,
    /// Entries still queued after the cycle
    pub remaining: usize,
    pub duration_ms: u64,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed ({} ok, {} failed, {} dropped, {} rate limited), {} deduplicated, {} calls saved, {} remaining in {}ms",
            self.processed,
            self.succeeded,
            self.failed,
            self.dropped,
            self.rate_limited,
            self.deduplicated_requests,
            self.api_calls_saved,
            self.remaining,
            self.duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_key_sorts_priority_then_sequence() {
        let query = SearchQuery::new(&["rust"], "remote").with_source("adzuna");
        let mut entries = vec![
            QueuedRequest::new(&query, 100, 3),
            QueuedRequest::new(&query, 200, 5),
            QueuedRequest::new(&query, 100, 1),
        ];
        entries.sort_by_key(|e| e.order_key());

        let order: Vec<_> = entries.iter().map(|e| (e.priority, e.sequence)).collect();
        assert_eq!(order, vec![(200, 5), (100, 1), (100, 3)]);
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!("High".parse::<Priority>().unwrap().value(), 200);
        assert_eq!("premium".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_counters_not_serialized() {
        let query = SearchQuery::new(&["go"], "berlin").with_source("jsearch");
        let mut entry = QueuedRequest::new(&query, 100, 1);
        entry.dedup_count = 4;
        entry.attempts = 2;

        let back: QueuedRequest =
            serde_json::from_str(&serde_json::to_string(&entry).unwrap()).unwrap();
        assert_eq!(back.dedup_count, 1);
        assert_eq!(back.attempts, 0);
        assert_eq!(back.query().fingerprint(), entry.fingerprint);
    }
}
