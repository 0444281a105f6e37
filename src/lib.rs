pub mod app;
pub mod config;
pub mod history;
pub mod http;
pub mod metrics;
pub mod operation;
pub mod poller;
pub mod source;
pub mod state;
pub mod tracker;

// Re-export commonly used types for tests
pub use history::HistoryRing;
pub use metrics::{AppMetrics, OperationLabels, OperationSink};
pub use operation::{OperationRecord, ParseError};
pub use state::{SharedState, TrackerView};
pub use tracker::{ReconcileSummary, Tracker};
