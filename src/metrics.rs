use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Buckets for completed operation durations, in seconds.
const COMPLETED_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1_800.0, 3_600.0,
];

/// Label triple shared by the running counter and the completed histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationLabels<'a> {
    pub user: &'a str,
    pub operation: &'a str,
    pub namespace: &'a str,
}

impl OperationLabels<'_> {
    fn values(&self) -> [&str; 3] {
        [self.user, self.operation, self.namespace]
    }
}

/// Destination for the tracker's telemetry. Calls are fire-and-forget.
pub trait OperationSink {
    /// Accumulate slow time for an operation still in flight (milliseconds).
    fn add_running(&self, labels: &OperationLabels<'_>, millis: f64);

    /// Record the total duration of a completed operation (seconds).
    fn observe_completed(&self, labels: &OperationLabels<'_>, seconds: f64);
}

/// Metrics registry for the exporter scraped by Prometheus.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    loops: LoopMetrics,
    operations: OperationMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("mongoslow".into()), None)?);

        let loops = LoopMetrics::register(&registry)?;
        let operations = OperationMetrics::register(&registry)?;

        Ok(Self {
            registry,
            loops,
            operations,
        })
    }

    /// Observe the execution duration for a loop.
    pub fn observe_duration(&self, loop_name: &str, duration: Duration) {
        self.loops
            .poll_duration
            .with_label_values(&[loop_name])
            .observe(duration.as_secs_f64());
    }

    /// Record a success flag for a loop iteration (1=success, 0=failed).
    pub fn record_success(&self, loop_name: &str, success: bool) {
        self.loops
            .last_success
            .with_label_values(&[loop_name])
            .set(if success { 1 } else { 0 });
    }

    /// Increment the error counter for a loop.
    pub fn inc_error(&self, loop_name: &str) {
        self.loops.errors_total.with_label_values(&[loop_name]).inc();
    }

    pub fn inc_parse_failures(&self, count: usize) {
        if count > 0 {
            self.operations.parse_failures.inc_by(count as u64);
        }
    }

    pub fn set_tracker_gauges(&self, tracked: usize, history_entries: usize) {
        self.operations.tracked.set(tracked as i64);
        self.operations.history_entries.set(history_entries as i64);
    }

    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl OperationSink for AppMetrics {
    fn add_running(&self, labels: &OperationLabels<'_>, millis: f64) {
        // Counters only move forward.
        if millis > 0.0 {
            self.operations
                .running_millis
                .with_label_values(&labels.values())
                .inc_by(millis);
        }
    }

    fn observe_completed(&self, labels: &OperationLabels<'_>, seconds: f64) {
        self.operations
            .completed_seconds
            .with_label_values(&labels.values())
            .observe(seconds);
    }
}

#[derive(Clone)]
struct LoopMetrics {
    poll_duration: HistogramVec,
    last_success: IntGaugeVec,
    errors_total: IntCounterVec,
}

impl LoopMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let poll_duration = HistogramVec::new(
            HistogramOpts::new("poll_duration_seconds", "Poll loop iteration duration"),
            &["loop"],
        )?;
        registry.register(Box::new(poll_duration.clone()))?;

        let last_success = IntGaugeVec::new(
            Opts::new(
                "last_poll_success",
                "Loop success flag (1=success, 0=failure)",
            ),
            &["loop"],
        )?;
        registry.register(Box::new(last_success.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("poll_errors_total", "Total loop errors"),
            &["loop"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            poll_duration,
            last_success,
            errors_total,
        })
    }
}

#[derive(Clone)]
struct OperationMetrics {
    running_millis: CounterVec,
    completed_seconds: HistogramVec,
    tracked: IntGauge,
    history_entries: IntGauge,
    parse_failures: IntCounter,
}

impl OperationMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let running_millis = CounterVec::new(
            Opts::new(
                "slow_query_milliseconds_total",
                "Milliseconds of slow operation time accumulated while running, according to currentOp",
            ),
            &["user", "operation", "ns"],
        )?;
        registry.register(Box::new(running_millis.clone()))?;

        let completed_seconds = HistogramVec::new(
            HistogramOpts::new(
                "slow_query_duration_seconds",
                "Total duration of completed slow operations",
            )
            .buckets(COMPLETED_BUCKETS.to_vec()),
            &["user", "operation", "ns"],
        )?;
        registry.register(Box::new(completed_seconds.clone()))?;

        let tracked = IntGauge::new(
            "tracked_operations",
            "Operations currently tracked across polls",
        )?;
        registry.register(Box::new(tracked.clone()))?;

        let history_entries = IntGauge::new(
            "history_entries",
            "Completed slow operations retained in the history ring",
        )?;
        registry.register(Box::new(history_entries.clone()))?;

        let parse_failures = IntCounter::new(
            "parse_failures_total",
            "currentOp entries skipped because required fields were missing",
        )?;
        registry.register(Box::new(parse_failures.clone()))?;

        Ok(Self {
            running_millis,
            completed_seconds,
            tracked,
            history_entries,
            parse_failures,
        })
    }
}
