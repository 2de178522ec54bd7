//! Log follower state machine.
//!
//! ```text
//! Stopped -> FetchingInitialState -> Polling <-> Backoff -> Stopped
//! ```
//!
//! The follower owns the cursor. Each successful follow response advances
//! it to the response's last-included tick before the body is processed,
//! so a bad record never causes already-delivered entries to be fetched
//! again. A response whose cursor is behind ours is dropped whole, since
//! its entries were already delivered. An empty tail waits out the idle
//! backoff; a non-empty batch is followed by the next poll immediately.

use crate::config::FollowerConfig;
use crate::dispatch::{ChangeEvent, Delivery, Dispatcher, Listener};
use crate::error::{FatalError, FatalErrorKind, FollowError, FollowResult};
use crate::http::{HttpClient, HttpResponse};
use crate::registry::IntoSubscriptions;
use crate::transaction::{Routed, TransactionBuffer};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tickfeed_protocol::{
    split_records, Endpoints, LogEntry, LoggerState, Tick, LAST_INCLUDED_HEADER,
};
use tracing::{debug, error, info, warn};

/// The current state of the follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
    /// No loop is running.
    Stopped,
    /// Requesting the current log position.
    FetchingInitialState,
    /// Requesting entries after the cursor.
    Polling,
    /// Waiting after an empty tail.
    Backoff,
}

impl FollowerState {
    /// Returns true while a loop is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, FollowerState::Stopped)
    }
}

/// Counters for a follower's lifetime.
#[derive(Debug, Clone, Default)]
pub struct FollowerStats {
    /// Follow requests issued.
    pub polls: u64,
    /// Follow responses that reported an empty tail.
    pub idle_polls: u64,
    /// Records received in follow bodies.
    pub records_received: u64,
    /// Records dropped because they could not be parsed.
    pub malformed_records: u64,
    /// Entries dropped for breaking the transaction protocol.
    pub txn_violations: u64,
    /// Transactions replayed on commit.
    pub transactions_committed: u64,
    /// Transactions discarded on abort.
    pub transactions_aborted: u64,
    /// Events that passed a subscription filter and reached at least one listener.
    pub events_dispatched: u64,
    /// Follow responses whose cursor was behind ours; their batches were dropped.
    pub cursor_regressions: u64,
    /// Time of the last follow response.
    pub last_poll_time: Option<Instant>,
    /// Last fatal error message.
    pub last_error: Option<String>,
}

/// Result of one follow request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The server returned entries up to `cursor`.
    Delivered {
        /// Records in the body.
        records: usize,
        /// Events handed to listeners.
        dispatched: usize,
        /// Cursor after this poll.
        cursor: Tick,
    },
    /// The server reported no new entries; the cursor is unchanged.
    Idle,
    /// The server returned a cursor behind ours. The batch was dropped
    /// and the cursor is unchanged.
    Regressed {
        /// The cursor the server returned.
        received: Tick,
    },
}

/// A fatal-error listener.
pub type ErrorListener = Arc<dyn Fn(&FatalError) + Send + Sync>;

#[derive(Debug, Default)]
struct Control {
    /// Cleared by `stop()`; the loop exits at its next check.
    running: bool,
    /// True while a loop owns the poll cycle.
    active: bool,
}

/// Shared run flag plus the condvar that wakes a backoff wait.
#[derive(Debug, Default)]
struct RunControl {
    control: Mutex<Control>,
    wake: Condvar,
}

impl RunControl {
    /// Marks a loop as starting. Returns false if one is already active,
    /// in which case that loop simply keeps running.
    fn claim(&self) -> bool {
        let mut control = self.control.lock();
        control.running = true;
        if control.active {
            false
        } else {
            control.active = true;
            true
        }
    }

    /// Like `claim`, but leaves an active loop untouched.
    fn claim_exclusive(&self) -> bool {
        let mut control = self.control.lock();
        if control.active {
            return false;
        }
        control.running = true;
        control.active = true;
        true
    }

    /// Checked once per iteration. When stopped, runs `on_exit` and
    /// releases the loop under the same lock.
    fn keep_going(&self, on_exit: impl FnOnce()) -> bool {
        let mut control = self.control.lock();
        if !control.running {
            on_exit();
            control.active = false;
        }
        control.running
    }

    /// Ends the loop after a fatal error.
    fn release(&self, on_exit: impl FnOnce()) {
        let mut control = self.control.lock();
        on_exit();
        control.running = false;
        control.active = false;
    }

    fn stop(&self) {
        self.control.lock().running = false;
        self.wake.notify_all();
    }

    fn is_running(&self) -> bool {
        self.control.lock().running
    }

    fn is_active(&self) -> bool {
        self.control.lock().active
    }

    /// Sleeps for `delay` unless stopped first.
    fn wait(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut control = self.control.lock();
        while control.running {
            if self.wake.wait_until(&mut control, deadline).timed_out() {
                break;
            }
        }
    }
}

/// Stops a follower without holding a reference to it.
///
/// Safe to capture in listeners.
#[derive(Debug, Clone)]
pub struct StopHandle {
    control: Arc<RunControl>,
}

impl StopHandle {
    /// Stops the follower. Idempotent.
    pub fn stop(&self) {
        self.control.stop();
    }
}

struct Pipeline {
    transactions: TransactionBuffer,
    dispatcher: Dispatcher,
}

/// Counters collected while processing one batch.
#[derive(Default)]
struct BatchTally {
    records: u64,
    malformed: u64,
    violations: u64,
    committed: u64,
    aborted: u64,
    dispatched: u64,
}

struct Inner<C: HttpClient> {
    client: C,
    config: FollowerConfig,
    endpoints: Endpoints,
    state: RwLock<FollowerState>,
    stats: RwLock<FollowerStats>,
    cursor: RwLock<Option<Tick>>,
    control: Arc<RunControl>,
    /// Held for the duration of each request, so at most one is in flight.
    poll_gate: Mutex<()>,
    pipeline: Mutex<Pipeline>,
    error_listeners: RwLock<Vec<ErrorListener>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Follows one database's replication log and dispatches committed
/// document changes to subscribed listeners.
///
/// Cloning yields another handle to the same follower.
///
/// # Example
///
/// ```rust,ignore
/// let follower = LogFollower::new(FollowerConfig::new("shop"), client);
/// follower.subscribe(Subscription::new("users").with_events([EventKind::Delete]));
/// follower.on("users", |event| println!("{} {}", event.label(), event.payload));
/// follower.start()?;
/// ```
pub struct LogFollower<C: HttpClient + 'static> {
    inner: Arc<Inner<C>>,
}

impl<C: HttpClient + 'static> Clone for LogFollower<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: HttpClient + 'static> LogFollower<C> {
    /// Creates a stopped follower.
    pub fn new(config: FollowerConfig, client: C) -> Self {
        let endpoints = Endpoints::for_database(&config.database);
        let cursor = config.start_tick.clone();
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                endpoints,
                state: RwLock::new(FollowerState::Stopped),
                stats: RwLock::new(FollowerStats::default()),
                cursor: RwLock::new(cursor),
                control: Arc::new(RunControl::default()),
                poll_gate: Mutex::new(()),
                pipeline: Mutex::new(Pipeline {
                    transactions: TransactionBuffer::new(),
                    dispatcher: Dispatcher::new(),
                }),
                error_listeners: RwLock::new(Vec::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FollowerConfig {
        &self.inner.config
    }

    /// Returns the current state.
    pub fn state(&self) -> FollowerState {
        *self.inner.state.read()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> FollowerStats {
        self.inner.stats.read().clone()
    }

    /// Returns the cursor: the next follow request asks for entries after it.
    pub fn cursor(&self) -> Option<Tick> {
        self.inner.cursor.read().clone()
    }

    /// Returns true until `stop()` or a fatal error.
    pub fn is_running(&self) -> bool {
        self.inner.control.is_running()
    }

    /// Returns the number of transactions waiting for commit or abort.
    pub fn open_transactions(&self) -> usize {
        self.inner.pipeline.lock().transactions.open_transactions()
    }

    /// Returns a handle that can stop this follower.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            control: Arc::clone(&self.inner.control),
        }
    }

    // --- Subscriptions ---

    /// Adds subscriptions. Accepts a collection name, a descriptor or a list.
    pub fn subscribe(&self, subscriptions: impl IntoSubscriptions) {
        self.inner
            .pipeline
            .lock()
            .dispatcher
            .registry_mut()
            .subscribe(subscriptions);
    }

    /// Narrows or removes subscriptions.
    ///
    /// Fails if a descriptor names a collection that is not subscribed.
    pub fn unsubscribe(&self, subscriptions: impl IntoSubscriptions) -> FollowResult<()> {
        self.inner
            .pipeline
            .lock()
            .dispatcher
            .registry_mut()
            .unsubscribe(subscriptions)
    }

    /// Returns the subscribed collection names.
    pub fn subscribed_collections(&self) -> Vec<String> {
        let pipeline = self.inner.pipeline.lock();
        let mut names: Vec<String> = pipeline
            .dispatcher
            .registry()
            .collections()
            .map(String::from)
            .collect();
        names.sort();
        names
    }

    // --- Listeners ---

    /// Registers a listener for a collection's events.
    ///
    /// Listeners run on the polling thread, in registration order.
    pub fn on<F>(&self, collection: impl Into<String>, listener: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.inner
            .pipeline
            .lock()
            .dispatcher
            .add_listener(collection, listener);
    }

    /// Registers a channel for a collection's events.
    pub fn channel(&self, collection: impl Into<String>) -> Receiver<ChangeEvent> {
        self.inner.pipeline.lock().dispatcher.add_channel(collection)
    }

    /// Registers a listener for fatal errors.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&FatalError) + Send + Sync + 'static,
    {
        self.inner.error_listeners.write().push(Arc::new(listener));
    }

    // --- Lifecycle ---

    /// Starts following on a background thread.
    ///
    /// Resumes from the cursor if one is known, otherwise fetches the
    /// current log position first. If a loop is still finishing its last
    /// request after `stop()`, that loop keeps running instead.
    pub fn start(&self) -> FollowResult<()> {
        if !self.inner.control.claim() {
            debug!("follower loop already active; resumed");
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("tickfeed-{}", self.inner.endpoints.database()))
            .spawn(move || {
                if let Some(err) = inner.run_loop() {
                    inner.notify_error(&err);
                }
            });

        match spawned {
            Ok(handle) => {
                *self.inner.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner
                    .control
                    .release(|| self.inner.set_state(FollowerState::Stopped));
                Err(FollowError::Spawn(e))
            }
        }
    }

    /// Runs the loop on the calling thread until stopped or a fatal error.
    ///
    /// Fails with [`FollowError::AlreadyRunning`] if a loop is active.
    pub fn run(&self) -> FollowResult<()> {
        if !self.inner.control.claim_exclusive() {
            return Err(FollowError::AlreadyRunning);
        }
        match self.inner.run_loop() {
            Some(err) => {
                self.inner.notify_error(&err);
                Err(err.into())
            }
            None => Ok(()),
        }
    }

    /// Stops following. Idempotent.
    ///
    /// An in-flight request completes and its batch is processed; no
    /// further request is issued. A pending backoff wait ends at once.
    pub fn stop(&self) {
        if self.inner.control.is_running() {
            info!(database = self.inner.endpoints.database(), "stopping follower");
        }
        self.inner.control.stop();
    }

    /// Waits for the background thread started by `start()` to exit.
    ///
    /// Returns immediately when called from the polling thread itself.
    pub fn join(&self) {
        let handle = {
            let mut worker = self.inner.worker.lock();
            match worker.as_ref() {
                Some(h) if h.thread().id() == thread::current().id() => return,
                _ => worker.take(),
            }
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("follower thread panicked");
            }
        }
    }

    // --- Single steps ---

    /// Returns the cursor, fetching the current log position if none is known.
    ///
    /// Fails with [`FollowError::AlreadyRunning`] while a loop owns the
    /// follower, and with [`FollowError::PollInProgress`] when called from a
    /// listener of another single step.
    pub fn initialize(&self) -> FollowResult<Tick> {
        if let Some(cursor) = self.cursor() {
            return Ok(cursor);
        }
        let _gate = self.step_gate()?;
        Ok(self.inner.initial_cursor()?)
    }

    /// Issues one follow request and processes its batch.
    ///
    /// Fails like [`initialize`](Self::initialize) when another step or a
    /// loop is in progress.
    pub fn poll_once(&self) -> FollowResult<PollOutcome> {
        let _gate = self.step_gate()?;
        let cursor = self.inner.initial_cursor()?;
        Ok(self.inner.poll(cursor)?)
    }

    fn step_gate(&self) -> FollowResult<MutexGuard<'_, ()>> {
        if self.inner.control.is_active() {
            return Err(FollowError::AlreadyRunning);
        }
        self.inner
            .poll_gate
            .try_lock()
            .ok_or(FollowError::PollInProgress)
    }
}

impl<C: HttpClient> Inner<C> {
    fn set_state(&self, state: FollowerState) {
        *self.state.write() = state;
    }

    /// Returns the known cursor or fetches the initial one. Callers hold
    /// the poll gate.
    fn initial_cursor(&self) -> Result<Tick, FatalError> {
        let known = self.cursor.read().clone();
        match known {
            Some(cursor) => Ok(cursor),
            None => self.fetch_initial_state(),
        }
    }

    fn request(&self, path: &str) -> HttpResponse {
        self.client
            .get(path)
            .unwrap_or_else(HttpResponse::transport_failure)
    }

    /// Loop body. Returns the fatal error that ended it, if any.
    fn run_loop(&self) -> Option<FatalError> {
        info!(
            database = self.endpoints.database(),
            cursor = ?self.cursor.read().as_ref().map(Tick::to_string),
            "follower started"
        );

        let failure = loop {
            if !self.control.keep_going(|| self.set_state(FollowerState::Stopped)) {
                break None;
            }

            let gate = self.poll_gate.lock();
            let known = self.cursor.read().clone();
            let cursor = match known {
                Some(cursor) => cursor,
                None => {
                    self.set_state(FollowerState::FetchingInitialState);
                    match self.fetch_initial_state() {
                        Ok(tick) => tick,
                        Err(err) => break Some(err),
                    }
                }
            };

            self.set_state(FollowerState::Polling);
            match self.poll(cursor) {
                Ok(PollOutcome::Idle | PollOutcome::Regressed { .. }) => {
                    drop(gate);
                    self.set_state(FollowerState::Backoff);
                    self.control.wait(self.config.idle_backoff);
                }
                Ok(PollOutcome::Delivered { .. }) => {}
                Err(err) => break Some(err),
            }
        };

        match &failure {
            Some(err) => {
                let message = err.to_string();
                self.stats.write().last_error = Some(message.clone());
                // Released before anything else so a start() from here on
                // spawns a fresh loop.
                self.control.release(|| self.set_state(FollowerState::Stopped));
                error!(
                    database = self.endpoints.database(),
                    status = err.status,
                    body = %err.body_text(),
                    "{message}"
                );
            }
            None => info!(database = self.endpoints.database(), "follower stopped"),
        }
        failure
    }

    fn notify_error(&self, err: &FatalError) {
        let listeners = self.error_listeners.read().clone();
        for listener in listeners {
            listener(err);
        }
    }

    fn fetch_initial_state(&self) -> Result<Tick, FatalError> {
        let response = self.request(self.endpoints.logger_state());
        if response.status != 200 {
            return Err(FatalError::from_response(FatalErrorKind::LoggerState, response));
        }

        let state = match LoggerState::parse(&response.body) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "undecodable logger state");
                return Err(FatalError::from_response(FatalErrorKind::LoggerState, response));
            }
        };

        if state.running == Some(false) {
            warn!(
                database = self.endpoints.database(),
                "replication logger reports it is not running"
            );
        }
        info!(
            database = self.endpoints.database(),
            tick = %state.last_log_tick,
            server_version = state.server_version.as_deref().unwrap_or("unknown"),
            "initial log position fetched"
        );
        *self.cursor.write() = Some(state.last_log_tick.clone());
        Ok(state.last_log_tick)
    }

    fn poll(&self, cursor: Tick) -> Result<PollOutcome, FatalError> {
        let response = self.request(&self.endpoints.logger_follow(&cursor));
        {
            let mut stats = self.stats.write();
            stats.polls += 1;
            stats.last_poll_time = Some(Instant::now());
        }

        if response.status == 0 || !self.config.follow_success.contains(&response.status) {
            return Err(FatalError::from_response(FatalErrorKind::LoggerFollow, response));
        }

        let last_included = match response.header(LAST_INCLUDED_HEADER) {
            None => {
                warn!(status = response.status, "follow response without last-included header");
                None
            }
            Some(raw) => match Tick::parse(raw) {
                Ok(tick) if tick.is_zero() => None,
                Ok(tick) => Some(tick),
                Err(e) => {
                    warn!(error = %e, "unparseable last-included header");
                    None
                }
            },
        };

        let Some(next) = last_included else {
            self.stats.write().idle_polls += 1;
            debug!(cursor = %cursor, "empty tail");
            return Ok(PollOutcome::Idle);
        };

        if next < cursor {
            self.stats.write().cursor_regressions += 1;
            warn!(cursor = %cursor, received = %next, "dropping batch with regressing cursor");
            return Ok(PollOutcome::Regressed { received: next });
        }

        debug!(from = %cursor, to = %next, "cursor advanced");
        *self.cursor.write() = Some(next.clone());
        let cursor = next;
        let tally = self.process_batch(&response.body);

        {
            let mut stats = self.stats.write();
            stats.records_received += tally.records;
            stats.malformed_records += tally.malformed;
            stats.txn_violations += tally.violations;
            stats.transactions_committed += tally.committed;
            stats.transactions_aborted += tally.aborted;
            stats.events_dispatched += tally.dispatched;
        }

        Ok(PollOutcome::Delivered {
            records: tally.records as usize,
            dispatched: tally.dispatched as usize,
            cursor,
        })
    }

    /// Runs every record of a batch through parse, buffer and dispatch,
    /// in arrival order.
    fn process_batch(&self, body: &[u8]) -> BatchTally {
        let mut tally = BatchTally::default();

        for record in split_records(body) {
            tally.records += 1;
            let entry = match LogEntry::parse(record) {
                Ok(entry) => entry,
                Err(e) => {
                    tally.malformed += 1;
                    debug!(error = %e, "dropping malformed record");
                    continue;
                }
            };

            let deliveries: Vec<Delivery> = {
                let mut pipeline = self.pipeline.lock();
                let ready = match pipeline.transactions.route(entry) {
                    Routed::Passthrough(entry) => vec![entry],
                    Routed::Committed(entries) => {
                        tally.committed += 1;
                        entries
                    }
                    Routed::Aborted { discarded } => {
                        tally.aborted += 1;
                        debug!(discarded, "transaction aborted");
                        Vec::new()
                    }
                    Routed::Violation(violation) => {
                        tally.violations += 1;
                        warn!(%violation, "dropping entry");
                        Vec::new()
                    }
                    Routed::Opened | Routed::Buffered | Routed::Skipped => Vec::new(),
                };
                ready
                    .into_iter()
                    .filter_map(|entry| pipeline.dispatcher.dispatch(entry))
                    .collect()
            };

            // Listeners run outside the lock so they may call back in.
            for delivery in deliveries {
                if delivery.listener_count() > 0 {
                    tally.dispatched += 1;
                }
                delivery.deliver();
            }
        }

        tally
    }
}
