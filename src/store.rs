//! Current-run view model.
//!
//! Holds one immutable [`RunView`] behind a `watch` channel. Each state change
//! is a single send, so subscribers see either the previous run or the new one
//! and never a mix. Every run takes a generation number when it starts; a
//! result carrying an older generation is dropped.

use crate::model::RunView;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct StoreState {
    pub generation: u64,
    pub status: RunStatus,
    pub view: Option<Arc<RunView>>,
}

pub struct RunStore {
    tx: watch::Sender<StoreState>,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StoreState {
            generation: 0,
            status: RunStatus::Idle,
            view: None,
        });
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StoreState {
        self.tx.borrow().clone()
    }

    /// Start a new generation and clear the previous run's view.
    pub fn begin_run(&self) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|s| {
            s.generation += 1;
            s.status = RunStatus::Running;
            s.view = None;
            generation = s.generation;
        });
        generation
    }

    /// Install a completed view. Returns `false` if `generation` is stale.
    pub fn publish(&self, generation: u64, view: Arc<RunView>) -> bool {
        self.tx.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            s.status = RunStatus::Completed;
            s.view = Some(view);
            true
        })
    }

    /// Record a failed run. Returns `false` if `generation` is stale.
    pub fn fail(&self, generation: u64, error: String) -> bool {
        self.tx.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            s.status = RunStatus::Failed(error);
            s.view = None;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{LogDigest, SummaryDigest};
    use crate::features::FeatureTable;
    use crate::model::{ClassifiedFigures, RunNonce, Summary};

    fn view(nonce: &str) -> Arc<RunView> {
        Arc::new(RunView {
            timestamp_utc: String::new(),
            base_url: "http://localhost:8000".into(),
            nonce: RunNonce::new(nonce),
            fast_mode: Some(true),
            backend_ok: true,
            artifacts: Vec::new(),
            summary: Summary::new(),
            figures: ClassifiedFigures::default(),
            features: FeatureTable::default(),
            kpis: Vec::new(),
            digest: SummaryDigest::default(),
            log: LogDigest::default(),
        })
    }

    #[test]
    fn publish_replaces_view_wholesale() {
        let store = RunStore::new();
        let g = store.begin_run();
        assert_eq!(store.snapshot().status, RunStatus::Running);
        assert!(store.publish(g, view("a")));
        let snap = store.snapshot();
        assert_eq!(snap.status, RunStatus::Completed);
        assert_eq!(snap.view.unwrap().nonce.as_str(), "a");
    }

    #[test]
    fn stale_generation_is_discarded() {
        let store = RunStore::new();
        let old = store.begin_run();
        let new = store.begin_run();
        assert!(!store.publish(old, view("old")));
        assert!(!store.fail(old, "late".into()));
        assert_eq!(store.snapshot().status, RunStatus::Running);
        assert!(store.publish(new, view("new")));
        assert_eq!(store.snapshot().view.unwrap().nonce.as_str(), "new");
    }

    #[test]
    fn begin_clears_previous_view() {
        let store = RunStore::new();
        let g = store.begin_run();
        store.publish(g, view("a"));
        store.begin_run();
        assert!(store.snapshot().view.is_none());
    }

    #[tokio::test]
    async fn subscribers_see_whole_values() {
        let store = RunStore::new();
        let mut rx = store.subscribe();
        let g = store.begin_run();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, RunStatus::Running);
        store.publish(g, view("x"));
        rx.changed().await.unwrap();
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.status, RunStatus::Completed);
        assert!(state.view.is_some());
    }
}
