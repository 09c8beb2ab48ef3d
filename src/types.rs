use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::trading_core::StatusSnapshot;

/// Shared application state
pub struct AppState {
    /// Latest engine snapshot, written by the engine task after every event
    pub status: RwLock<StatusSnapshot>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(initial: StatusSnapshot) -> Self {
        Self {
            status: RwLock::new(initial),
            started_at: Utc::now(),
        }
    }
}
