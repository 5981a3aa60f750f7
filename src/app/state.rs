//! Application state shared across routes

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::session::SessionService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            sessions: Arc::new(SessionService::new(config.game_settings())),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the state was built
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
