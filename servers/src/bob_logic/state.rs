use lib_beacon::{BeaconRegistry, QueryDispatcher};
use std::sync::Arc;
use std::time::Duration;

/// Shared by every handler. The registry is read-only once the server starts.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<QueryDispatcher>,
    // Deadline applied to every dispatch, batch or stream
    pub timeout: Duration,
}

impl AppState {
    pub fn new(dispatcher: QueryDispatcher, timeout: Duration) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            timeout,
        }
    }

    pub fn registry(&self) -> &BeaconRegistry {
        self.dispatcher.registry()
    }
}
