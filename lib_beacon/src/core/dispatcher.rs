//! # Query Dispatcher
//!
//! Fans one `GenericQuery` out to every registered beacon and fans the
//! normalized results back in under a single deadline.
//!
//! ## Lifecycle of a dispatch
//!
//! `Idle → FanningOut → Collecting → Complete | TimedOut | Incomplete`
//!
//! 1.  **Fan-out**: one task per beacon is spawned into a `JoinSet`. Every task
//!     holds a child of the dispatch's `CancellationToken`, an `Arc` to its
//!     (descriptor, adapter) pair, and a clone of the result sender. Nothing
//!     else is shared between tasks, so one beacon's failure or slowness never
//!     touches another's result.
//! 2.  **Collect**: results are read in arrival order until every beacon has
//!     answered or the deadline passes.
//! 3.  **Cancel & join**: the token is cancelled and the `JoinSet` is shut
//!     down. In-flight request futures are dropped, which closes their
//!     connections. The dispatch call only returns once every task is gone.
//!
//! Batch mode buffers results into an `AggregateResponse`. Stream mode pushes
//! each result into a caller-owned sink as soon as it arrives.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::beacons::{AggregateResponse, Credentials, GenericQuery, NormalizedResult};
use crate::core::registry::{friendly_query, BeaconRegistry, RegisteredBeacon};
use crate::retrieve::BeaconClient;

/// Per-dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Nothing started yet.
    Idle,
    /// Spawning one task per beacon.
    FanningOut,
    /// Waiting for results.
    Collecting,
    /// Every registered beacon produced a result.
    Complete,
    /// The deadline (or the caller's token) cut collection short.
    TimedOut,
    /// Every unit ended but some produced no result (a unit panicked).
    Incomplete,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DispatchState::Idle => "idle",
            DispatchState::FanningOut => "fanning-out",
            DispatchState::Collecting => "collecting",
            DispatchState::Complete => "complete",
            DispatchState::TimedOut => "timed-out",
            DispatchState::Incomplete => "incomplete",
        };
        f.write_str(label)
    }
}

/// What a batch dispatch hands back.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// `Complete`, `TimedOut` or `Incomplete`.
    pub state: DispatchState,
    /// Results in arrival order.
    pub results: AggregateResponse,
    /// Registered beacons that produced no result, in registration order.
    pub unanswered: Vec<String>,
}

/// # Query Dispatcher
///
/// Cheap to share: it holds an `Arc` to the read-only registry and a clone of
/// the pooled HTTP client. Concurrent dispatches do not interact.
#[derive(Debug, Clone)]
pub struct QueryDispatcher {
    registry: Arc<BeaconRegistry>,
    client: BeaconClient,
    limiter: Option<Arc<Semaphore>>,
}

/// Everything one unit of work needs, owned so it can move into a task.
struct Unit {
    beacon: Arc<RegisteredBeacon>,
    client: BeaconClient,
    query: Arc<GenericQuery>,
    credentials: Option<Arc<Credentials>>,
    limiter: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

impl Unit {
    /// Queries the beacon, or returns `None` if cancelled first.
    async fn run(self) -> Option<NormalizedResult> {
        let name = self.beacon.name().to_string();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                log::debug!("[{}] query cancelled", name);
                None
            }
            result = self.request() => result,
        }
    }

    async fn request(&self) -> Option<NormalizedResult> {
        // Holding the permit for the whole request bounds in-flight requests.
        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.clone().acquire_owned().await.ok()?),
            None => None,
        };
        Some(self.beacon.query(&self.client, &self.query, self.credentials.as_deref()).await)
    }
}

impl QueryDispatcher {
    /// Creates a dispatcher with unbounded fan-out.
    pub fn new(registry: Arc<BeaconRegistry>, client: BeaconClient) -> Self {
        Self {
            registry,
            client,
            limiter: None,
        }
    }

    /// Caps the number of beacon requests in flight at once, across all
    /// dispatches sharing this dispatcher. `0` is treated as `1`.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(max_in_flight.max(1))));
        self
    }

    /// The registry this dispatcher queries.
    pub fn registry(&self) -> &Arc<BeaconRegistry> {
        &self.registry
    }

    /// Spawns one unit per registered beacon, each sending into `sink`.
    fn fan_out(
        &self,
        query: &GenericQuery,
        credentials: Option<&Credentials>,
        sink: &mpsc::Sender<NormalizedResult>,
        cancel: &CancellationToken,
    ) -> JoinSet<()> {
        let query = Arc::new(query.clone());
        let credentials = credentials.cloned().map(Arc::new);
        let mut units = JoinSet::new();

        for beacon in self.registry.list() {
            let unit = Unit {
                beacon: Arc::clone(beacon),
                client: self.client.clone(),
                query: Arc::clone(&query),
                credentials: credentials.clone(),
                limiter: self.limiter.clone(),
                cancel: cancel.child_token(),
            };
            let tx = sink.clone();
            units.spawn(async move {
                if let Some(result) = unit.run().await {
                    // A closed sink means the consumer is gone; the result is dropped.
                    let _ = tx.send(result).await;
                }
            });
        }
        units
    }

    /// Cancels every remaining unit and waits for all of them to finish.
    async fn cancel_and_join(units: &mut JoinSet<()>, cancel: &CancellationToken) {
        cancel.cancel();
        units.shutdown().await;
    }

    /// # Batch Dispatch
    ///
    /// Queries every registered beacon and waits for all of them, but never
    /// longer than `deadline`. Whatever arrived by then is returned; beacons
    /// still working are cancelled and listed in `unanswered`.
    pub async fn dispatch_batch(
        &self,
        query: &GenericQuery,
        credentials: Option<&Credentials>,
        deadline: Duration,
    ) -> DispatchOutcome {
        let expected = self.registry.count();
        let mut state = DispatchState::Idle;

        if expected == 0 {
            return DispatchOutcome {
                state: DispatchState::Complete,
                results: AggregateResponse::default(),
                unanswered: Vec::new(),
            };
        }

        let expires = deadline_instant(deadline);
        log::debug!("Dispatch {} -> {}: {} beacon(s)", state, DispatchState::FanningOut, expected);
        state = DispatchState::FanningOut;
        let (tx, mut rx) = mpsc::channel(expected);
        let cancel = CancellationToken::new();
        let mut units = self.fan_out(query, credentials, &tx, &cancel);
        drop(tx);

        log::debug!("Dispatch {} -> {}", state, DispatchState::Collecting);
        state = DispatchState::Collecting;
        let mut results = AggregateResponse::with_capacity(expected);
        while results.len() < expected {
            match tokio::time::timeout_at(expires, rx.recv()).await {
                Ok(Some(result)) => results.push(result),
                // Every sender is gone: no more results can arrive.
                Ok(None) => {
                    state = DispatchState::Incomplete;
                    break;
                }
                Err(_) => {
                    state = DispatchState::TimedOut;
                    break;
                }
            }
        }
        if state == DispatchState::Collecting {
            state = DispatchState::Complete;
        }

        Self::cancel_and_join(&mut units, &cancel).await;

        let unanswered = self.unanswered(&results);
        match state {
            DispatchState::TimedOut => log::warn!(
                "[{}] deadline of {:?} reached with {}/{} result(s); cancelled: {}",
                friendly_query(query),
                deadline,
                results.len(),
                expected,
                unanswered.join(", ")
            ),
            DispatchState::Incomplete => log::error!(
                "[{}] dispatch lost {} unit(s) without a result: {}",
                friendly_query(query),
                unanswered.len(),
                unanswered.join(", ")
            ),
            _ => log::debug!("Dispatch complete with {} result(s)", results.len()),
        }

        DispatchOutcome {
            state,
            results,
            unanswered,
        }
    }

    /// # Streaming Dispatch
    ///
    /// Queries every registered beacon and pushes each result into `sink` as it
    /// arrives. The caller owns the deadline: cancelling `cancel` stops the
    /// dispatch, and every unit still running is cancelled and joined before
    /// this returns.
    ///
    /// Returns `Complete` when every unit finished, `TimedOut` when the token
    /// fired first, `Incomplete` when a unit died without a result.
    pub async fn dispatch_stream(
        &self,
        query: &GenericQuery,
        credentials: Option<&Credentials>,
        sink: mpsc::Sender<NormalizedResult>,
        cancel: CancellationToken,
    ) -> DispatchState {
        let mut units = self.fan_out(query, credentials, &sink, &cancel);
        drop(sink);
        let mut lost = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    Self::cancel_and_join(&mut units, &cancel).await;
                    log::debug!("[{}] streaming dispatch cancelled", friendly_query(query));
                    return DispatchState::TimedOut;
                }
                joined = units.join_next() => match joined {
                    None if lost > 0 => return DispatchState::Incomplete,
                    None => return DispatchState::Complete,
                    Some(Err(e)) if e.is_panic() => {
                        lost += 1;
                        log::error!("Beacon task panicked: {}", e);
                    }
                    Some(_) => {}
                },
            }
        }
    }

    fn unanswered(&self, results: &AggregateResponse) -> Vec<String> {
        let answered: HashSet<&str> = results.results().iter().map(|r| r.name()).collect();
        self.registry
            .names()
            .into_iter()
            .filter(|name| !answered.contains(name.as_str()))
            .collect()
    }
}

/// `now + deadline`, saturating to a far-future instant for huge deadlines.
fn deadline_instant(deadline: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(deadline)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

// Roughly 30 years.
const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacons::{BeaconDescriptor, ProtocolAdapter, ProtocolVersion};

    fn dispatcher(registry: BeaconRegistry) -> QueryDispatcher {
        QueryDispatcher::new(Arc::new(registry), BeaconClient::new(None).unwrap())
    }

    fn unreachable_registry() -> BeaconRegistry {
        let mut registry = BeaconRegistry::new();
        // Port 9 on loopback: nothing listens, the connection is refused.
        registry
            .register_from_config(r#"{"name": "gone", "version": "0.2", "endpoint": "http://127.0.0.1:9/"}"#, "gone")
            .unwrap();
        registry
    }

    /// An adapter whose unit dies before producing a result.
    struct PanickingAdapter;

    impl ProtocolAdapter for PanickingAdapter {
        fn version(&self) -> ProtocolVersion {
            ProtocolVersion::V0_2
        }

        fn initialize_defaults(&self, _descriptor: &mut BeaconDescriptor) {}

        fn parse_body(&self, _descriptor: &BeaconDescriptor, _status: u16, _body: &[u8]) -> NormalizedResult {
            panic!("parse_body")
        }

        fn parse_response(
            &self,
            _descriptor: &BeaconDescriptor,
            _status: u16,
            _body: &[u8],
            _transport_error: Option<&str>,
        ) -> NormalizedResult {
            panic!("parse_response")
        }
    }

    fn registry_with_panicking_beacon() -> BeaconRegistry {
        let mut registry = unreachable_registry();
        let mut descriptor = BeaconDescriptor::blank(ProtocolVersion::V0_2);
        descriptor.name = "broken".to_string();
        descriptor.endpoint = "http://127.0.0.1:9/".to_string();
        registry.register_raw(descriptor, Box::new(PanickingAdapter));
        registry
    }

    #[tokio::test]
    async fn empty_registry_completes_immediately() {
        let outcome = dispatcher(BeaconRegistry::new())
            .dispatch_batch(&GenericQuery::new(), None, Duration::from_secs(5))
            .await;
        assert_eq!(outcome.state, DispatchState::Complete);
        assert!(outcome.results.is_empty());
        assert!(outcome.unanswered.is_empty());
    }

    #[tokio::test]
    async fn unreachable_beacons_still_produce_results() {
        let outcome = dispatcher(unreachable_registry())
            .dispatch_batch(&GenericQuery::new(), None, Duration::from_secs(10))
            .await;
        assert_eq!(outcome.state, DispatchState::Complete);
        assert_eq!(outcome.results.len(), 1);
        let err = outcome.results.results()[0].error().unwrap();
        assert_eq!((err.code, err.message.as_str()), (400, "could not reach beacon"));
    }

    #[tokio::test]
    async fn stream_with_empty_registry_completes() {
        let (tx, mut rx) = mpsc::channel(1);
        let state = dispatcher(BeaconRegistry::new())
            .dispatch_stream(&GenericQuery::new(), None, tx, CancellationToken::new())
            .await;
        assert_eq!(state, DispatchState::Complete);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn huge_deadline_saturates_instead_of_overflowing() {
        let huge = Duration::from_secs(u64::MAX);

        let empty = dispatcher(BeaconRegistry::new())
            .dispatch_batch(&GenericQuery::new(), None, huge)
            .await;
        assert_eq!(empty.state, DispatchState::Complete);

        let outcome = dispatcher(unreachable_registry())
            .dispatch_batch(&GenericQuery::new(), None, huge)
            .await;
        assert_eq!(outcome.state, DispatchState::Complete);
        assert_eq!(outcome.results.len(), 1);
    }

    #[test]
    fn deadline_instant_is_monotonic_for_any_duration() {
        let now = Instant::now();
        assert!(deadline_instant(Duration::from_secs(u64::MAX)) > now + Duration::from_secs(86_400));
        assert!(deadline_instant(Duration::ZERO) >= now);
    }

    #[tokio::test]
    async fn lost_unit_makes_batch_incomplete() {
        let outcome = dispatcher(registry_with_panicking_beacon())
            .dispatch_batch(&GenericQuery::new(), None, Duration::from_secs(10))
            .await;
        assert_eq!(outcome.state, DispatchState::Incomplete);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results.contains("gone"));
        assert_eq!(outcome.unanswered, vec!["broken".to_string()]);
    }

    #[tokio::test]
    async fn lost_unit_makes_stream_incomplete() {
        let (tx, mut rx) = mpsc::channel(4);
        let state = dispatcher(registry_with_panicking_beacon())
            .dispatch_stream(&GenericQuery::new(), None, tx, CancellationToken::new())
            .await;
        assert_eq!(state, DispatchState::Incomplete);

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.name(), "gone");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn states_render_for_logs() {
        assert_eq!(DispatchState::FanningOut.to_string(), "fanning-out");
        assert_eq!(DispatchState::TimedOut.to_string(), "timed-out");
        assert_eq!(DispatchState::Incomplete.to_string(), "incomplete");
    }
}
