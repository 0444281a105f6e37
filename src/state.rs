use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::operation::OperationRecord;
use crate::tracker::ReconcileSummary;

/// Immutable projection of the tracker, published once per tick.
#[derive(Debug, Clone, Default)]
pub struct TrackerView {
    pub generated_at: Option<DateTime<Utc>>,
    /// Live operations ordered by opid.
    pub running: Vec<OperationRecord>,
    /// Completed slow operations, oldest first. Shared between views until
    /// the history changes.
    pub history: Arc<[OperationRecord]>,
    pub last_tick: ReconcileSummary,
}

/// Health of the poll loop as seen by `/healthz`.
#[derive(Debug, Clone, Default)]
pub struct LoopHealth {
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

struct SharedStateInner {
    view: ArcSwap<TrackerView>,
    loop_health: RwLock<LoopHealth>,
}

impl Default for SharedStateInner {
    fn default() -> Self {
        Self {
            view: ArcSwap::from_pointee(TrackerView::default()),
            loop_health: RwLock::new(LoopHealth::default()),
        }
    }
}

/// Shared state container for the HTTP layer and the poll loop.
///
/// The poll loop is the only writer. It swaps in a fresh [`TrackerView`]
/// after every reconcile, so readers never block it and never see a
/// half-applied tick.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, view: TrackerView) {
        self.inner.view.store(Arc::new(view));
    }

    pub fn view(&self) -> Arc<TrackerView> {
        self.inner.view.load_full()
    }

    pub async fn record_loop_success(&self) {
        let mut health = self.inner.loop_health.write().await;
        health.last_success_at = Some(Utc::now());
        health.consecutive_failures = 0;
        health.last_error = None;
    }

    pub async fn record_loop_failure(&self, error: String) {
        let mut health = self.inner.loop_health.write().await;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_error = Some(error);
    }

    pub async fn loop_health(&self) -> LoopHealth {
        self.inner.loop_health.read().await.clone()
    }

    /// Ready once the loop has succeeded within `max_staleness` and has not
    /// failed since.
    pub async fn is_ready(&self, max_staleness: Duration) -> bool {
        let health = self.inner.loop_health.read().await;
        if health.consecutive_failures > 0 {
            return false;
        }
        let staleness =
            chrono::Duration::from_std(max_staleness).unwrap_or(chrono::Duration::MAX);
        health
            .last_success_at
            .is_some_and(|last| Utc::now().signed_duration_since(last) <= staleness)
    }
}
