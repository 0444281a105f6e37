use std::sync::Arc;

use crate::config::AppConfig;
use crate::metrics::AppMetrics;
use crate::state::SharedState;

/// Shared application context passed to HTTP handlers and the poll loop.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub metrics: AppMetrics,
    pub state: SharedState,
}

impl AppContext {
    pub fn new(config: AppConfig, metrics: AppMetrics, state: SharedState) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            state,
        }
    }
}
