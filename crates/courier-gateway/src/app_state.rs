//! Shared application state for the delivery endpoints.

use std::sync::Arc;

use tokio::time::Duration;

use crate::config::WebSection;
use crate::stream::StreamCoordinator;

/// Transport timings, taken from the `web` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub heartbeat: Duration,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl Timings {
    pub fn from_config(web: &WebSection) -> Self {
        Self {
            heartbeat: Duration::from_millis(web.heartbeat_ms),
            ping_interval: Duration::from_millis(web.ping_interval_ms),
            idle_timeout: Duration::from_millis(web.idle_timeout_ms),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    timings: Timings,
    coordinator: Arc<StreamCoordinator>,
}

impl AppState {
    pub fn new(timings: Timings, coordinator: Arc<StreamCoordinator>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                timings,
                coordinator,
            }),
        }
    }

    pub fn coordinator(&self) -> Arc<StreamCoordinator> {
        Arc::clone(&self.inner.coordinator)
    }

    /// Long-poll hold time; also the short-poll deadline.
    pub fn heartbeat(&self) -> Duration {
        self.inner.timings.heartbeat
    }

    pub fn ping_interval(&self) -> Duration {
        self.inner.timings.ping_interval
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.timings.idle_timeout
    }
}
