//! Operation lifetime tracking across `currentOp` snapshots.
//!
//! Each tick the tracker compares the new snapshot against what it saw last
//! time. Operations still present contribute their newly elapsed time to the
//! running counter; operations that vanished are treated as completed, get a
//! single histogram observation and, when slow enough, a history entry.
//!
//! The tracker owns its maps exclusively and is driven from one task, so it
//! needs no locking. Readers get a [`TrackerView`] published by the poll loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bson::Document;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::TrackerSettings;
use crate::history::HistoryRing;
use crate::metrics::OperationSink;
use crate::operation::OperationRecord;
use crate::state::TrackerView;

/// What one reconcile pass did, for logging and the published view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Entries parsed into records.
    pub parsed: usize,
    /// Entries skipped because they failed to parse.
    pub skipped: usize,
    /// Running counter increments emitted.
    pub emitted: usize,
    /// Operations detected as completed this tick.
    pub completed: usize,
    /// Completed operations appended to history.
    pub recorded: usize,
}

pub struct Tracker {
    settings: TrackerSettings,
    last_seen_micros: HashMap<i32, i64>,
    live_records: HashMap<i32, OperationRecord>,
    history: HistoryRing,
    /// Snapshot of `history` handed to views; refreshed only when it changes.
    published_history: Arc<[OperationRecord]>,
}

impl Tracker {
    pub fn new(settings: TrackerSettings) -> Self {
        let history = HistoryRing::new(settings.history_capacity);
        Self {
            settings,
            last_seen_micros: HashMap::new(),
            live_records: HashMap::new(),
            history,
            published_history: Arc::from(Vec::new()),
        }
    }

    /// Fold one snapshot into the tracked state, reporting through `sink`.
    ///
    /// A bad entry never fails the tick; it is logged and skipped. If an opid
    /// occurs twice in one snapshot the later entry is treated as a
    /// continuation of the earlier one.
    pub fn reconcile(
        &mut self,
        snapshot: &[Document],
        now: DateTime<Utc>,
        sink: &dyn OperationSink,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut present = HashSet::with_capacity(snapshot.len());

        for raw in snapshot {
            let mut record = match OperationRecord::parse(raw, now) {
                Ok(record) => record,
                Err(err) => {
                    debug!(error = %err, "skipping unparseable currentOp entry");
                    summary.skipped += 1;
                    continue;
                }
            };
            summary.parsed += 1;

            record.delta_micros = match self.last_seen_micros.get(&record.opid) {
                Some(&last_micros) => {
                    let delta = record.running_micros - last_micros;
                    debug!(
                        opid = record.opid,
                        user = %record.effective_user,
                        op = %record.operation,
                        last_micros,
                        running_micros = record.running_micros,
                        delta,
                        "operation still running"
                    );
                    delta
                }
                None => {
                    debug!(
                        opid = record.opid,
                        user = %record.effective_user,
                        op = %record.operation,
                        "new operation observed"
                    );
                    record.running_micros
                }
            };

            if record.delta_micros >= self.settings.noise_floor_micros {
                sink.add_running(&record.labels(), record.delta_micros as f64 / 1_000.0);
                summary.emitted += 1;
            } else if record.delta_micros < 0 {
                // TODO: decide whether a shrinking microsecs_running should reset the baseline.
                debug!(
                    opid = record.opid,
                    delta = record.delta_micros,
                    "negative running delta"
                );
            }

            self.last_seen_micros
                .insert(record.opid, record.running_micros);
            present.insert(record.opid);
            self.live_records.insert(record.opid, record);
        }

        let gone: Vec<i32> = self
            .last_seen_micros
            .keys()
            .filter(|opid| !present.contains(*opid))
            .copied()
            .collect();

        for opid in gone {
            self.last_seen_micros.remove(&opid);
            let Some(record) = self.live_records.remove(&opid) else {
                continue;
            };
            summary.completed += 1;
            if self.complete(record, now, sink) {
                summary.recorded += 1;
            }
        }

        if summary.recorded > 0 {
            self.published_history = self.history.snapshot().into();
        }

        summary
    }

    /// Report a vanished operation. Returns true when it entered history.
    fn complete(
        &mut self,
        mut record: OperationRecord,
        now: DateTime<Utc>,
        sink: &dyn OperationSink,
    ) -> bool {
        debug!(opid = record.opid, "operation no longer running");

        if record.running_micros > self.settings.observe_floor_micros {
            sink.observe_completed(&record.labels(), record.running_micros as f64 / 1_000_000.0);
        }

        if record.running_micros <= self.settings.history_threshold_micros
            || self.settings.is_excluded(&record.namespace)
        {
            return false;
        }

        record.completed_at = Some(now);
        self.history.append(record);
        true
    }

    /// Currently tracked operations, ordered by opid.
    pub fn live_records(&self) -> Vec<OperationRecord> {
        let mut records: Vec<_> = self.live_records.values().cloned().collect();
        records.sort_by_key(|record| record.opid);
        records
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    pub fn tracked(&self) -> usize {
        self.last_seen_micros.len()
    }

    pub fn view(&self, generated_at: DateTime<Utc>, last_tick: ReconcileSummary) -> TrackerView {
        TrackerView {
            generated_at: Some(generated_at),
            running: self.live_records(),
            history: Arc::clone(&self.published_history),
            last_tick,
        }
    }
}
