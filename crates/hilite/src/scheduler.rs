//! Scheduler facade and event loop.
//!
//! Flow:
//! 1. Spawn POOL_SIZE execution units via the injected factory
//! 2. Route `highlight()` submissions to idle units, or queue them FIFO
//! 3. Match each unit reply to its in-flight request and settle the caller
//! 4. Drain the queue into freed units before letting them sit idle
//! 5. On shutdown: reject everything outstanding, terminate all units
//!
//! All pool, queue, and in-flight state is owned by a single event-loop
//! task; callers talk to it over channels, so no mutation ever races
//! another. Units run genuinely in parallel but are opaque here.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::inflight::InFlightTable;
use crate::pending::PendingQueue;
use crate::pool::{Pool, Released, UnitState};
use crate::protocol::{Range, UnitEvent, UnitId};
use crate::request::{HighlightError, HighlightRequest, ReplyReceiver};
use crate::unit::UnitFactory;

/// Pool size used when none is configured. Three units keeps a typical
/// diff view responsive without drowning the host in workers.
pub const DEFAULT_POOL_SIZE: usize = 3;

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of execution units; fixed for the scheduler's lifetime.
    pub pool_size: usize,
    /// How long a spawned unit may take to signal readiness before it is
    /// treated as failed and replaced.
    pub startup_timeout: Duration,
    /// Optional per-request deadline. `None` (the default) matches the
    /// historical contract: a dispatched request waits as long as its unit
    /// takes. When set, an expired request is rejected with
    /// [`HighlightError::Timeout`] and the unit is replaced, since a late
    /// reply could no longer be matched safely.
    pub request_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            request_timeout: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Snapshot of the pool partition and backlog, answered by the event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Units ready for immediate dispatch.
    pub idle: usize,
    /// Units serving a request or still starting up.
    pub busy: usize,
    /// Requests waiting for a free unit.
    pub queued: usize,
}

enum Command {
    Submit(HighlightRequest),
    Stats(oneshot::Sender<PoolStats>),
}

#[derive(Debug, Clone, Copy)]
enum DeadlineKind {
    Startup,
    Request,
}

/// Timer message delivered back to the event loop. The generation guards
/// against stale timers: a unit re-dispatched since the timer was armed
/// carries a newer generation and the expiry is ignored.
#[derive(Debug)]
struct Deadline {
    unit: UnitId,
    generation: u64,
    kind: DeadlineKind,
}

/// A caller's pending highlight result.
///
/// Settles when the serving unit replies; dropping it abandons the result
/// but does not cancel the work (there is no cancellation path).
pub struct PendingHighlight {
    rx: ReplyReceiver,
}

impl Future for PendingHighlight {
    type Output = Result<Vec<Range>, HighlightError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(HighlightError::ShuttingDown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Facade over the worker pool. The only interface the rest of the
/// application uses; safe to share (behind `Arc`) across any number of
/// concurrent callers, none of which ever observe pool size or queue state.
pub struct Scheduler {
    command_tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

impl Scheduler {
    /// Spawn the event loop and the initial pool. Must be called from
    /// within a tokio runtime.
    pub fn start(config: SchedulerConfig, factory: Arc<dyn UnitFactory>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(64);
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let core = SchedulerCore {
            pool: Pool::new(config.pool_size),
            queue: PendingQueue::new(),
            inflight: InFlightTable::new(),
            factory,
            events_tx,
            deadline_tx,
            startup_timeout: config.startup_timeout,
            request_timeout: config.request_timeout,
        };

        tokio::spawn(core.run(command_rx, events_rx, deadline_rx, cancel.clone(), done_tx));

        Self {
            command_tx,
            cancel,
            done: done_rx,
        }
    }

    /// Request highlighting of `content`. Returns immediately; the returned
    /// future settles when an execution unit has produced the ranges (or
    /// the request failed). Submission order is preserved: requests that
    /// must wait are served strictly FIFO once capacity frees up. Relative
    /// *completion* order across requests is not guaranteed.
    pub fn highlight(
        &self,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> PendingHighlight {
        let (request, rx) = HighlightRequest::new(name.into(), content.into());
        // If the loop is gone the command (and the reply sender inside it)
        // is dropped, settling the future with ShuttingDown.
        let _ = self.command_tx.send(Command::Submit(request));
        PendingHighlight { rx }
    }

    /// Current pool partition and backlog. All-zero after shutdown.
    pub async fn stats(&self) -> PoolStats {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(Command::Stats(tx)).is_err() {
            return PoolStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop the event loop: every queued and in-flight request is rejected
    /// with [`HighlightError::ShuttingDown`] and all units are terminated.
    /// Waits for the loop to finish tearing down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut done = self.done.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // The loop observes the cancellation and rejects everything
        // outstanding; nothing is left pending forever.
        self.cancel.cancel();
    }
}

struct SchedulerCore {
    pool: Pool,
    queue: PendingQueue,
    inflight: InFlightTable,
    factory: Arc<dyn UnitFactory>,
    events_tx: mpsc::Sender<(UnitId, UnitEvent)>,
    deadline_tx: mpsc::UnboundedSender<Deadline>,
    startup_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl SchedulerCore {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut events_rx: mpsc::Receiver<(UnitId, UnitEvent)>,
        mut deadline_rx: mpsc::UnboundedReceiver<Deadline>,
        cancel: CancellationToken,
        done: watch::Sender<bool>,
    ) {
        for _ in 0..self.pool.size() {
            self.spawn_unit();
        }
        tracing::info!(pool_size = self.pool.size(), "Scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.reject_all();
                    break;
                }

                Some((unit, event)) = events_rx.recv() => {
                    self.handle_unit_event(unit, event);
                }

                Some(deadline) = deadline_rx.recv() => {
                    self.handle_deadline(deadline);
                }

                cmd = command_rx.recv() => match cmd {
                    Some(Command::Submit(request)) => self.submit(request),
                    Some(Command::Stats(tx)) => {
                        let _ = tx.send(self.stats());
                    }
                    None => {
                        self.reject_all();
                        break;
                    }
                },
            }
            self.check_invariants();
        }

        let _ = done.send(true);
        tracing::info!("Scheduler event loop exiting");
    }

    fn handle_unit_event(&mut self, unit: UnitId, event: UnitEvent) {
        match event {
            UnitEvent::Ready => match self.pool.state(unit) {
                Some(UnitState::Starting) => {
                    tracing::debug!(%unit, "Unit ready");
                    self.release(unit);
                }
                Some(state) => {
                    debug_assert!(false, "Ready from unit in state {state:?}");
                    tracing::error!(%unit, ?state, "Bug: Ready from a unit that is not starting");
                }
                None => {
                    tracing::warn!(%unit, "Ready from replaced unit, dropping");
                }
            },

            UnitEvent::Done { ranges } => {
                let Some(request) = self.inflight.take_and_clear(unit) else {
                    self.report_unmatched(unit, "Done");
                    return;
                };
                tracing::info!(
                    target: "hilite::request",
                    %unit,
                    name = %request.name(),
                    spans = ranges.len(),
                    "Highlight complete"
                );
                request.resolve(ranges);
                self.release(unit);
            }

            UnitEvent::Failed { error } => {
                let Some(request) = self.inflight.take_and_clear(unit) else {
                    self.report_unmatched(unit, "Failed");
                    return;
                };
                tracing::warn!(
                    target: "hilite::request",
                    %unit,
                    name = %request.name(),
                    %error,
                    "Highlight failed"
                );
                request.reject(HighlightError::UnitFailed(error));
                // The unit survives a failed work item and can serve again.
                self.release(unit);
            }

            UnitEvent::Crashed { error } => {
                tracing::warn!(%unit, %error, "Unit crashed");
                self.replace_unit(unit, HighlightError::UnitCrashed(error));
            }
        }
    }

    fn handle_deadline(&mut self, deadline: Deadline) {
        let Deadline {
            unit,
            generation,
            kind,
        } = deadline;

        match kind {
            DeadlineKind::Startup => {
                if self.pool.state(unit) == Some(UnitState::Starting) {
                    tracing::error!(%unit, "Unit never signalled readiness, replacing");
                    self.replace_unit(
                        unit,
                        HighlightError::UnitCrashed("unit never became ready".to_string()),
                    );
                }
            }
            DeadlineKind::Request => {
                if self.pool.state(unit) == Some(UnitState::Busy)
                    && self.pool.generation(unit) == Some(generation)
                    && self.inflight.contains(unit)
                {
                    tracing::warn!(%unit, "Request deadline exceeded, replacing unit");
                    self.replace_unit(unit, HighlightError::Timeout);
                }
            }
        }
    }

    /// Dispatch to an idle unit, or queue when the pool is saturated.
    fn submit(&mut self, request: HighlightRequest) {
        tracing::debug!(target: "hilite::request", name = %request.name(), "Highlight requested");

        loop {
            let Some(unit) = self.pool.acquire_idle() else {
                tracing::debug!(
                    name = %request.name(),
                    queued = self.queue.len() + 1,
                    "Pool saturated, queueing"
                );
                self.queue.enqueue(request);
                return;
            };

            self.pool.mark_busy(unit);
            match self.pool.post(unit, request.work_item()) {
                Ok(generation) => {
                    tracing::debug!(%unit, name = %request.name(), "Dispatched");
                    self.inflight.bind(unit, request);
                    self.arm_request_deadline(unit, generation);
                    return;
                }
                Err(e) => {
                    // Try the next idle unit with the same request.
                    tracing::warn!(%unit, error = %e, "Idle unit rejected work, replacing");
                    self.replace_unit(unit, HighlightError::UnitCrashed(e.to_string()));
                }
            }
        }
    }

    /// Free a unit: hand it the queue head if one is waiting, otherwise
    /// return it to the idle set.
    fn release(&mut self, unit: UnitId) {
        match self.pool.release(unit, &mut self.queue, &mut self.inflight) {
            Released::Idle => {}
            Released::Redispatched { generation } => {
                self.arm_request_deadline(unit, generation);
            }
            Released::DispatchFailed { request, error } => {
                tracing::warn!(%unit, error = %error, "Dispatch to freed unit failed");
                self.queue.requeue_front(request);
                self.replace_unit(unit, HighlightError::UnitCrashed(error.to_string()));
            }
        }
    }

    /// Remove a failed unit, reject whatever it was serving, and spawn a
    /// replacement so the pool size is preserved.
    fn replace_unit(&mut self, unit: UnitId, error: HighlightError) {
        if let Some(request) = self.inflight.remove(unit) {
            tracing::debug!(%unit, name = %request.name(), "Rejecting request bound to failed unit");
            request.reject(error);
        }

        match self.pool.remove(unit) {
            Some(handle) => {
                handle.terminate();
                self.spawn_unit();
            }
            None => {
                tracing::warn!(%unit, "Replace of unknown unit ignored");
            }
        }
    }

    fn spawn_unit(&mut self) {
        let id = UnitId::new();
        match self.factory.spawn(id, self.events_tx.clone()) {
            Ok(handle) => {
                tracing::debug!(unit = %id, "Spawned execution unit");
                self.pool.insert_starting(id, handle);
                self.arm_deadline(id, 0, DeadlineKind::Startup, self.startup_timeout);
            }
            Err(e) => {
                tracing::error!(
                    unit = %id,
                    error = %e,
                    "Failed to spawn execution unit - pool capacity reduced"
                );
            }
        }
    }

    fn arm_request_deadline(&self, unit: UnitId, generation: u64) {
        if let Some(timeout) = self.request_timeout {
            self.arm_deadline(unit, generation, DeadlineKind::Request, timeout);
        }
    }

    fn arm_deadline(&self, unit: UnitId, generation: u64, kind: DeadlineKind, after: Duration) {
        let tx = self.deadline_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Deadline {
                unit,
                generation,
                kind,
            });
        });
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.pool.idle_count(),
            busy: self.pool.busy_count(),
            queued: self.queue.len(),
        }
    }

    /// A terminal reply arrived for a unit with no in-flight binding. A
    /// reply from a unit we no longer track is expected staleness (the
    /// unit was replaced); a reply from a tracked-but-unbound unit means
    /// the bookkeeping is inconsistent.
    fn report_unmatched(&self, unit: UnitId, kind: &str) {
        if self.pool.state(unit).is_none() {
            tracing::warn!(%unit, kind, "Stale reply from replaced unit, dropping");
        } else {
            debug_assert!(false, "reply from unit with no in-flight binding");
            tracing::error!(%unit, kind, "Bug: reply from a unit with no in-flight binding");
        }
    }

    fn reject_all(&mut self) {
        tracing::info!("Scheduler shutting down, rejecting outstanding requests");

        let queued: Vec<_> = self.queue.drain().collect();
        for request in queued {
            request.reject(HighlightError::ShuttingDown);
        }

        let inflight: Vec<_> = self.inflight.drain().collect();
        for (unit, request) in inflight {
            tracing::debug!(%unit, name = %request.name(), "Rejecting in-flight request");
            request.reject(HighlightError::ShuttingDown);
        }

        for handle in self.pool.drain() {
            handle.terminate();
        }
    }

    fn check_invariants(&self) {
        // The queue may hold requests only while no unit is idle, and no
        // more units can be bound than are busy.
        debug_assert!(
            self.queue.is_empty() || self.pool.idle_count() == 0,
            "pending queue non-empty while units are idle"
        );
        debug_assert!(
            self.inflight.len() <= self.pool.busy_count(),
            "more in-flight bindings than busy units"
        );
    }
}
