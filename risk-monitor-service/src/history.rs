//! Bounded per-subject snapshot history.
//!
//! The anomaly baseline for every monitored pool and wallet. All access
//! goes through one async mutex per store so the background worker and
//! concurrent check/analyze requests cannot interleave an append/trim.

use risk_monitor_types::{PoolSnapshot, WalletSnapshot};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Maximum retained pool snapshots per pool.
pub const POOL_HISTORY_CAP: usize = 100;
/// Maximum retained wallet snapshots per wallet.
pub const WALLET_HISTORY_CAP: usize = 50;

#[derive(Default)]
struct Inner<T> {
    entries: HashMap<String, Vec<T>>,
}

pub struct HistoryStore<T> {
    inner: Mutex<Inner<T>>,
    cap: usize,
}

impl<T: Clone> HistoryStore<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
            }),
            cap,
        }
    }

    /// Snapshot of the current history for one subject, oldest first.
    pub async fn get(&self, subject: &str) -> Vec<T> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(&subject.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Append a snapshot, evicting the oldest entries beyond the cap.
    pub async fn append(&self, subject: &str, snapshot: T) {
        let mut inner = self.inner.lock().await;
        let history = inner.entries.entry(subject.to_lowercase()).or_default();
        history.push(snapshot);
        if history.len() > self.cap {
            let excess = history.len() - self.cap;
            history.drain(..excess);
        }
    }

    pub async fn len(&self, subject: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(&subject.to_lowercase())
            .map(|h| h.len())
            .unwrap_or(0)
    }

    /// Per-subject history lengths, for the status endpoint.
    pub async fn lengths(&self) -> HashMap<String, usize> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect()
    }

    pub async fn remove(&self, subject: &str) {
        let mut inner = self.inner.lock().await;
        inner.entries.remove(&subject.to_lowercase());
    }
}

pub fn pool_history() -> HistoryStore<PoolSnapshot> {
    HistoryStore::new(POOL_HISTORY_CAP)
}

pub fn wallet_history() -> HistoryStore<WalletSnapshot> {
    HistoryStore::new(WALLET_HISTORY_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_trims_to_cap_oldest_first() {
        let store: HistoryStore<i64> = HistoryStore::new(100);
        for i in 0..101 {
            store.append("0xPool", i).await;
        }
        let history = store.get("0xpool").await;
        assert_eq!(history.len(), 100);
        // Entry 0 evicted, entries 1..=100 remain in order
        assert_eq!(history[0], 1);
        assert_eq!(history[99], 100);
    }

    #[tokio::test]
    async fn subjects_are_case_normalized_and_independent() {
        let store: HistoryStore<i64> = HistoryStore::new(10);
        store.append("0xAAA", 1).await;
        store.append("0xaaa", 2).await;
        store.append("0xbbb", 3).await;

        assert_eq!(store.len("0xAaA").await, 2);
        assert_eq!(store.len("0xbbb").await, 1);
        assert_eq!(store.len("0xccc").await, 0);
    }

    #[tokio::test]
    async fn remove_clears_subject_history() {
        let store: HistoryStore<i64> = HistoryStore::new(10);
        store.append("0xaaa", 1).await;
        store.remove("0xAAA").await;
        assert_eq!(store.len("0xaaa").await, 0);
    }
}
