// Copyright 2025 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::error::PoolError;
use crate::handle::HandleCore;
use crate::handle::PooledResource;
use crate::manage::ConnectionOptions;
use crate::manage::ManageResource;
use crate::mutex::Condvar;
use crate::mutex::Mutex;

/// The configuration of [`Pool`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of resources checked out at any instant.
    pub max_active: usize,

    /// Maximum number of idle resources kept for reuse.
    pub max_idle: usize,

    /// Checkout duration after which an active resource may be forcibly
    /// reclaimed by a saturated `acquire`.
    pub max_checkout_duration: Duration,

    /// How long one wait cycle blocks before the acquire loop re-evaluates the
    /// pool.
    pub time_to_wait: Duration,

    /// How many bad resources a single acquire call tolerates on top of
    /// `max_idle` before it fails with [`PoolError::Exhausted`].
    pub bad_resource_tolerance: usize,

    /// Whether the liveness probe runs as part of validity checks.
    pub probe_enabled: bool,

    /// The query issued by the liveness probe.
    pub probe_query: String,

    /// Probe only resources unused for at least this long.
    ///
    /// `None` skips probing entirely even when it is enabled.
    pub probe_when_idle_for: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            max_checkout_duration: Duration::from_secs(20),
            time_to_wait: Duration::from_secs(20),
            bad_resource_tolerance: 3,
            probe_enabled: false,
            probe_query: "NO PROBE QUERY SET".to_string(),
            probe_when_idle_for: Some(Duration::ZERO),
        }
    }
}

impl PoolConfig {
    /// Creates a new [`PoolConfig`] with the specified active cap.
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active,
            ..Self::default()
        }
    }

    /// Returns a new [`PoolConfig`] with the specified idle cap.
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Returns a new [`PoolConfig`] with the specified checkout budget.
    pub fn with_max_checkout_duration(mut self, max_checkout_duration: Duration) -> Self {
        self.max_checkout_duration = max_checkout_duration;
        self
    }

    /// Returns a new [`PoolConfig`] with the specified wait cycle duration.
    pub fn with_time_to_wait(mut self, time_to_wait: Duration) -> Self {
        self.time_to_wait = time_to_wait;
        self
    }

    /// Returns a new [`PoolConfig`] with the specified bad-resource tolerance.
    pub fn with_bad_resource_tolerance(mut self, bad_resource_tolerance: usize) -> Self {
        self.bad_resource_tolerance = bad_resource_tolerance;
        self
    }

    /// Returns a new [`PoolConfig`] with the liveness probe enabled and the
    /// specified query.
    pub fn with_probe(mut self, probe_query: impl Into<String>) -> Self {
        self.probe_enabled = true;
        self.probe_query = probe_query.into();
        self
    }

    /// Returns a new [`PoolConfig`] with the specified probe idle threshold.
    pub fn with_probe_when_idle_for(mut self, probe_when_idle_for: Option<Duration>) -> Self {
        self.probe_when_idle_for = probe_when_idle_for;
        self
    }
}

/// A point-in-time snapshot of the pool's gauges and counters.
///
/// See [`Pool::status`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolStatus {
    /// The configured active cap.
    pub max_active: usize,

    /// The configured idle cap.
    pub max_idle: usize,

    /// The number of resources currently checked out.
    pub active_count: usize,

    /// The number of idle resources currently available.
    pub idle_count: usize,

    /// The number of callers currently inside `acquire`.
    pub acquiring_count: usize,

    /// The number of checkouts served so far.
    pub request_count: u64,

    /// Total time spent inside `acquire` across all checkouts.
    pub accumulated_request_time: Duration,

    /// Total time resources spent checked out.
    pub accumulated_checkout_time: Duration,

    /// Total time callers spent blocked waiting for capacity.
    pub accumulated_wait_time: Duration,

    /// The number of acquire calls that had to wait at least once.
    pub had_to_wait_count: u64,

    /// The number of bad resources seen by the pool.
    pub bad_resource_count: u64,

    /// The number of overdue resources forcibly reclaimed.
    pub claimed_overdue_count: u64,

    /// Total checkout time of the reclaimed overdue resources.
    pub accumulated_checkout_time_of_overdue: Duration,
}

impl PoolStatus {
    /// Average time an acquire call took, over all served checkouts.
    pub fn average_request_time(&self) -> Duration {
        average(self.accumulated_request_time, self.request_count)
    }

    /// Average time a caller spent blocked, over the calls that had to wait.
    pub fn average_wait_time(&self) -> Duration {
        average(self.accumulated_wait_time, self.had_to_wait_count)
    }

    /// Average checkout duration, over all served checkouts.
    pub fn average_checkout_time(&self) -> Duration {
        average(self.accumulated_checkout_time, self.request_count)
    }

    /// Average checkout duration of the forcibly reclaimed resources.
    pub fn average_overdue_checkout_time(&self) -> Duration {
        average(
            self.accumulated_checkout_time_of_overdue,
            self.claimed_overdue_count,
        )
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        total / count.min(u32::MAX as u64) as u32
    }
}

/// A bounded, synchronous, thread-safe resource pool.
///
/// See the [module level documentation](crate) for more.
pub struct Pool<M: ManageResource> {
    manager: M,

    /// All collections, counters, and the live configuration, under one lock.
    state: Mutex<PoolState<M::Resource>>,
    /// Signalled whenever a resource is recycled into the idle set.
    available: Condvar,
    /// A gauge of callers currently inside `acquire`.
    acquiring: AtomicUsize,
}

struct PoolState<R> {
    config: PoolConfig,
    options: ConnectionOptions,
    /// Hash of (url, username, password) the pool currently expects; handles
    /// stamped with a different code are discarded on release.
    expected_type_code: u64,

    /// The free list. The most recently returned resource is reused first.
    idle: Vec<IdleResource<R>>,
    /// Checked-out resources in checkout order. Index 0 is the oldest.
    active: Vec<ActiveResource<R>>,

    stats: Counters,
}

struct IdleResource<R> {
    resource: R,
    created_at: Instant,
    last_used_at: Instant,
}

struct ActiveResource<R> {
    core: Arc<HandleCore<R>>,
    type_code: u64,
    created_at: Instant,
    last_used_at: Instant,
    checked_out_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    request_count: u64,
    accumulated_request_time: Duration,
    accumulated_checkout_time: Duration,
    accumulated_wait_time: Duration,
    had_to_wait_count: u64,
    bad_resource_count: u64,
    claimed_overdue_count: u64,
    accumulated_checkout_time_of_overdue: Duration,
}

/// A resource on its way to a caller, with the metadata carried over from its
/// previous life (fresh, recycled, or reclaimed).
struct Candidate<R> {
    resource: R,
    created_at: Instant,
    last_used_at: Instant,
}

impl<M: ManageResource> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Pool")
            .field("config", &state.config)
            .field("active_count", &state.active.len())
            .field("idle_count", &state.idle.len())
            .finish()
    }
}

impl<M: ManageResource> Pool<M> {
    /// Creates a new [`Pool`].
    ///
    /// No resource is opened up front; the first `acquire` does.
    pub fn new(config: PoolConfig, options: ConnectionOptions, manager: M) -> Arc<Self> {
        let expected_type_code =
            assemble_type_code(&options.url, &options.username, &options.password);
        let state = Mutex::new(PoolState {
            config,
            options,
            expected_type_code,
            idle: Vec::new(),
            active: Vec::new(),
            stats: Counters::default(),
        });

        Arc::new(Self {
            manager,
            state,
            available: Condvar::new(),
            acquiring: AtomicUsize::new(0),
        })
    }

    /// Checks out a resource using the pool's default credentials.
    ///
    /// See [`Pool::acquire_as`].
    pub fn acquire(self: &Arc<Self>) -> Result<PooledResource<M>, PoolError<M::Error>> {
        let (username, password) = {
            let state = self.state.lock();
            (
                state.options.username.clone(),
                state.options.password.clone(),
            )
        };
        self.acquire_as(&username, &password)
    }

    /// Checks out a resource on behalf of the given credentials.
    ///
    /// Blocks while the pool is saturated, in bounded wait cycles of
    /// `time_to_wait`, until an idle resource appears, an active slot frees up,
    /// or the oldest active resource exceeds its checkout budget and is
    /// reclaimed. Fails with [`PoolError::Exhausted`] when too many consecutive
    /// bad resources were encountered within this one call.
    ///
    /// The handle is stamped with the identity code of `(url, username,
    /// password)`; if the pool's configuration changes while it is checked out,
    /// the resource is closed instead of recycled on release.
    pub fn acquire_as(
        self: &Arc<Self>,
        username: &str,
        password: &str,
    ) -> Result<PooledResource<M>, PoolError<M::Error>> {
        let started_at = Instant::now();
        let mut counted_wait = false;
        let mut local_bad_count: usize = 0;

        self.acquiring.fetch_add(1, Ordering::Relaxed);
        // TODO(*) replace scopeguard with std DropGuard once stabilized
        //  https://github.com/rust-lang/rust/issues/144426
        let _in_flight = scopeguard::guard((), |()| {
            self.acquiring.fetch_sub(1, Ordering::Relaxed);
        });

        loop {
            let mut state = self.state.lock();

            let mut candidate = if let Some(idle) = state.idle.pop() {
                // Reuse the most recently returned resource first.
                trace!("checked out an idle resource from the pool");
                Candidate {
                    resource: idle.resource,
                    created_at: idle.created_at,
                    last_used_at: idle.last_used_at,
                }
            } else if state.active.len() < state.config.max_active {
                // Resource creation is deliberately serialized through the
                // pool lock; no two callers race to open at the same time.
                let resource = self
                    .manager
                    .open(&state.options)
                    .map_err(PoolError::Resource)?;
                debug!("opened a new resource");
                let now = Instant::now();
                Candidate {
                    resource,
                    created_at: now,
                    last_used_at: now,
                }
            } else {
                let budget = state.config.max_checkout_duration;
                match state.active.first().map(|e| e.checked_out_at.elapsed()) {
                    Some(longest_checkout) if longest_checkout > budget => {
                        let entry = state.active.remove(0);
                        state.stats.claimed_overdue_count += 1;
                        state.stats.accumulated_checkout_time_of_overdue += longest_checkout;
                        state.stats.accumulated_checkout_time += longest_checkout;
                        let Some(mut resource) = entry.core.take() else {
                            return Err(PoolError::Internal {
                                message: "an active handle lost its resource".to_string(),
                            });
                        };
                        if let Err(err) = self.manager.rollback(&mut resource) {
                            // The resource is being repurposed regardless; the
                            // validity check below decides its fate.
                            debug!("bad resource, could not roll back: {}", err);
                        }
                        debug!("claimed overdue resource");
                        Candidate {
                            resource,
                            created_at: entry.created_at,
                            last_used_at: entry.last_used_at,
                        }
                    }
                    _ => {
                        if !counted_wait {
                            state.stats.had_to_wait_count += 1;
                            counted_wait = true;
                        }
                        let time_to_wait = state.config.time_to_wait;
                        debug!("waiting as long as {:?} for a resource", time_to_wait);
                        let wait_started = Instant::now();
                        let (mut state, _timed_out) =
                            self.available.wait_timeout(state, time_to_wait);
                        state.stats.accumulated_wait_time += wait_started.elapsed();
                        // A timed-out wait is not fatal; re-evaluate the pool.
                        continue;
                    }
                }
            };

            if self.is_usable(
                &mut candidate.resource,
                candidate.last_used_at,
                &state.config,
            ) {
                self.manager
                    .rollback(&mut candidate.resource)
                    .map_err(PoolError::Resource)?;
                let type_code = assemble_type_code(&state.options.url, username, password);
                let now = Instant::now();
                let core = Arc::new(HandleCore::new(candidate.resource));
                state.active.push(ActiveResource {
                    core: core.clone(),
                    type_code,
                    created_at: candidate.created_at,
                    last_used_at: now,
                    checked_out_at: now,
                });
                state.stats.request_count += 1;
                state.stats.accumulated_request_time += started_at.elapsed();
                return Ok(PooledResource::new(core, Arc::downgrade(self)));
            }

            debug!("a bad resource was handed out by the pool, discarding");
            state.stats.bad_resource_count += 1;
            local_bad_count += 1;
            let tolerance = state.config.max_idle + state.config.bad_resource_tolerance;
            drop(candidate);
            if local_bad_count > tolerance {
                warn!(
                    "could not obtain a good resource after {} bad ones",
                    local_bad_count
                );
                return Err(PoolError::Exhausted {
                    message: format!("gave up after {} consecutive bad resources", local_bad_count),
                });
            }
        }
    }

    /// Returns a checked-out resource to the pool.
    ///
    /// Invoked by the handle on drop. Never fails observably; internal errors
    /// are logged and swallowed.
    pub(crate) fn release(&self, core: &Arc<HandleCore<M::Resource>>) {
        let mut state = self.state.lock();

        let position = state
            .active
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.core, core));
        let Some(position) = position else {
            // Already repossessed (reclaimed, flushed) or released twice.
            debug!("a bad resource attempted to return to the pool, discarding");
            state.stats.bad_resource_count += 1;
            return;
        };
        let entry = state.active.remove(position);
        let checkout = entry.checked_out_at.elapsed();

        let Some(mut resource) = entry.core.take() else {
            debug!("a bad resource attempted to return to the pool, discarding");
            state.stats.bad_resource_count += 1;
            return;
        };

        if !self.is_usable(&mut resource, entry.last_used_at, &state.config) {
            debug!("a bad resource attempted to return to the pool, discarding");
            state.stats.bad_resource_count += 1;
            return;
        }

        state.stats.accumulated_checkout_time += checkout;
        if state.idle.len() < state.config.max_idle
            && entry.type_code == state.expected_type_code
        {
            match self.manager.rollback(&mut resource) {
                Ok(()) => {
                    state.idle.push(IdleResource {
                        resource,
                        created_at: entry.created_at,
                        last_used_at: entry.last_used_at,
                    });
                    trace!("returned resource to the pool");
                    // Either the freed idle slot or the freed active slot may
                    // satisfy any waiter, so wake them all.
                    self.available.notify_all();
                }
                Err(err) => {
                    warn!("could not roll back returned resource, closing it: {}", err);
                    let _ = self.manager.close(&mut resource);
                }
            }
        } else {
            if let Err(err) = self.manager.rollback(&mut resource) {
                warn!("could not roll back surplus resource: {}", err);
            }
            let _ = self.manager.close(&mut resource);
            trace!("closed surplus resource");
        }
    }

    /// Closes all active and idle resources in the pool.
    ///
    /// Handles still held by callers turn stale. The expected identity code is
    /// recomputed from the current connection options, so no resource outlives
    /// a configuration change. A forced shutdown must not raise: every error
    /// is swallowed.
    ///
    /// This is also the deterministic shutdown entry point. A pool that is
    /// dropped without it closes nothing itself; resources then close through
    /// their own `Drop`.
    pub fn force_close_all(&self) {
        let mut state = self.state.lock();
        state.expected_type_code = assemble_type_code(
            &state.options.url,
            &state.options.username,
            &state.options.password,
        );
        for entry in state.active.drain(..).rev() {
            let Some(mut resource) = entry.core.take() else {
                continue;
            };
            let _ = self.manager.rollback(&mut resource);
            let _ = self.manager.close(&mut resource);
        }
        for entry in state.idle.drain(..).rev() {
            let mut resource = entry.resource;
            let _ = self.manager.rollback(&mut resource);
            let _ = self.manager.close(&mut resource);
        }
        debug!("forcefully closed/removed all resources");
    }

    /// Returns the current status of the pool.
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            max_active: state.config.max_active,
            max_idle: state.config.max_idle,
            active_count: state.active.len(),
            idle_count: state.idle.len(),
            acquiring_count: self.acquiring.load(Ordering::Relaxed),
            request_count: state.stats.request_count,
            accumulated_request_time: state.stats.accumulated_request_time,
            accumulated_checkout_time: state.stats.accumulated_checkout_time,
            accumulated_wait_time: state.stats.accumulated_wait_time,
            had_to_wait_count: state.stats.had_to_wait_count,
            bad_resource_count: state.stats.bad_resource_count,
            claimed_overdue_count: state.stats.claimed_overdue_count,
            accumulated_checkout_time_of_overdue: state.stats.accumulated_checkout_time_of_overdue,
        }
    }

    /// Returns a snapshot of the live configuration.
    pub fn config(&self) -> PoolConfig {
        self.state.lock().config.clone()
    }

    /// Returns a snapshot of the live connection options.
    pub fn options(&self) -> ConnectionOptions {
        self.state.lock().options.clone()
    }

    /// Replaces the whole configuration in one transition and flushes the
    /// pool.
    pub fn set_config(&self, config: PoolConfig) {
        self.state.lock().config = config;
        self.force_close_all();
    }

    /// Sets the active cap. Flushes the pool.
    pub fn set_max_active(&self, max_active: usize) {
        self.state.lock().config.max_active = max_active;
        self.force_close_all();
    }

    /// Sets the idle cap. Flushes the pool.
    pub fn set_max_idle(&self, max_idle: usize) {
        self.state.lock().config.max_idle = max_idle;
        self.force_close_all();
    }

    /// Sets the checkout budget after which active resources may be reclaimed.
    /// Flushes the pool.
    pub fn set_max_checkout_duration(&self, max_checkout_duration: Duration) {
        self.state.lock().config.max_checkout_duration = max_checkout_duration;
        self.force_close_all();
    }

    /// Sets the duration of one wait cycle. Flushes the pool.
    pub fn set_time_to_wait(&self, time_to_wait: Duration) {
        self.state.lock().config.time_to_wait = time_to_wait;
        self.force_close_all();
    }

    /// Sets the bad-resource tolerance.
    ///
    /// Unlike the other setters this only tunes the retry policy of future
    /// acquire calls and does not flush the pool.
    pub fn set_bad_resource_tolerance(&self, bad_resource_tolerance: usize) {
        self.state.lock().config.bad_resource_tolerance = bad_resource_tolerance;
    }

    /// Enables or disables the liveness probe. Flushes the pool.
    pub fn set_probe_enabled(&self, probe_enabled: bool) {
        self.state.lock().config.probe_enabled = probe_enabled;
        self.force_close_all();
    }

    /// Sets the liveness probe query. Flushes the pool.
    pub fn set_probe_query(&self, probe_query: impl Into<String>) {
        self.state.lock().config.probe_query = probe_query.into();
        self.force_close_all();
    }

    /// Sets the idle threshold below which probing is skipped. Flushes the
    /// pool.
    pub fn set_probe_when_idle_for(&self, probe_when_idle_for: Option<Duration>) {
        self.state.lock().config.probe_when_idle_for = probe_when_idle_for;
        self.force_close_all();
    }

    /// Replaces the endpoint and credentials, recomputes the expected identity
    /// code, and flushes the pool.
    pub fn set_connection_options(&self, options: ConnectionOptions) {
        self.state.lock().options = options;
        self.force_close_all();
    }

    /// Whether the resource is still usable.
    ///
    /// A resource passes when it does not report itself closed, and, if the
    /// probe applies, when the probe query (followed by a rollback) succeeds.
    /// The probe is skipped when disabled, when no idle threshold is set, or
    /// when the resource was used more recently than the threshold. A failed
    /// probe force-closes the resource.
    fn is_usable(
        &self,
        resource: &mut M::Resource,
        last_used_at: Instant,
        config: &PoolConfig,
    ) -> bool {
        if self.manager.is_closed(resource) {
            debug!("resource is bad: it reports itself closed");
            return false;
        }
        if !config.probe_enabled {
            return true;
        }
        let Some(threshold) = config.probe_when_idle_for else {
            return true;
        };
        if last_used_at.elapsed() <= threshold {
            return true;
        }

        trace!("probing resource");
        let mut outcome = self.manager.probe(resource, &config.probe_query);
        if outcome.is_ok() {
            outcome = self.manager.rollback(resource);
        }
        match outcome {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "execution of probe query '{}' failed: {}",
                    config.probe_query, err
                );
                let _ = self.manager.close(resource);
                false
            }
        }
    }
}

/// A cheap equality heuristic over the connection identity; collisions are
/// tolerated.
fn assemble_type_code(url: &str, username: &str, password: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    username.hash(&mut hasher);
    password.hash(&mut hasher);
    hasher.finish()
}
