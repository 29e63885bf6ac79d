//! Bounded in-memory request history.
//!
//! The learner consumes this as its data source. Records are appended when a
//! request is admitted and annotated with the response outcome once the
//! handler finishes.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::Mutex;

/// Request attributes captured at admission time
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestMetadata {
    pub method: String,
    pub path: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

/// One admitted request
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub identifier: String,
    /// Unix milliseconds
    pub timestamp: i64,
    pub method: String,
    pub path: String,
    pub status: Option<u16>,
    /// Seconds
    pub response_time: Option<f64>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl RequestRecord {
    pub fn new(identifier: &str, timestamp: i64, metadata: &RequestMetadata) -> Self {
        Self {
            identifier: identifier.to_string(),
            timestamp,
            method: metadata.method.clone(),
            path: metadata.path.clone(),
            status: None,
            response_time: None,
            user_agent: metadata.user_agent.clone(),
            referer: metadata.referer.clone(),
        }
    }
}

/// How far back `annotate` searches for the record to update
const ANNOTATE_SCAN_LIMIT: usize = 256;

/// Ring buffer of recent request records; oldest entries are evicted first
pub struct RequestHistory {
    records: Mutex<VecDeque<RequestRecord>>,
    capacity: usize,
}

impl RequestHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    pub async fn push(&self, record: RequestRecord) {
        let mut records = self.records.lock().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Fill in the outcome of the most recent matching record.
    ///
    /// Returns false if the record has already been evicted or annotated.
    pub async fn annotate(
        &self,
        identifier: &str,
        timestamp: i64,
        status: u16,
        response_time: f64,
    ) -> bool {
        let mut records = self.records.lock().await;
        let found = records
            .iter_mut()
            .rev()
            .take(ANNOTATE_SCAN_LIMIT)
            .find(|r| r.timestamp == timestamp && r.identifier == identifier && r.status.is_none());

        match found {
            Some(record) => {
                record.status = Some(status);
                record.response_time = Some(response_time);
                true
            }
            None => false,
        }
    }

    /// Copy of the current contents, oldest first
    pub async fn snapshot(&self) -> Vec<RequestRecord> {
        self.records.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(path: &str) -> RequestMetadata {
        RequestMetadata {
            method: "GET".to_string(),
            path: path.to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
            referer: None,
        }
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let history = RequestHistory::new(3);
        for ts in 0..5 {
            history
                .push(RequestRecord::new("a", ts, &metadata("/")))
                .await;
        }

        let snapshot = history.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].timestamp, 2);
        assert_eq!(snapshot[2].timestamp, 4);
    }

    #[tokio::test]
    async fn test_annotate_sets_outcome_once() {
        let history = RequestHistory::new(10);
        history
            .push(RequestRecord::new("a", 100, &metadata("/api")))
            .await;

        assert!(history.annotate("a", 100, 200, 0.05).await);
        assert!(!history.annotate("a", 100, 500, 1.0).await);

        let record = &history.snapshot().await[0];
        assert_eq!(record.status, Some(200));
        assert_eq!(record.response_time, Some(0.05));
    }

    #[tokio::test]
    async fn test_annotate_missing_record() {
        let history = RequestHistory::new(10);
        assert!(!history.annotate("ghost", 1, 200, 0.1).await);
        assert!(history.is_empty().await);
    }
}
