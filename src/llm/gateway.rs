//! Rate-limited call gateway.
//!
//! Every outbound generation/embedding call goes through one FIFO queue
//! drained by a single worker task. The worker enforces:
//! - at most `max_concurrent` calls in flight
//! - a minimum delay between two dispatches
//! - on a throttling signal, the call goes back to the head of the queue
//!   and nothing is dispatched until its cooldown has passed
//!
//! Each queued call moves through an explicit state machine:
//!
//! ```text
//!   Pending ──ok/err──────────────────────────▶ Done / Failed
//!      │
//!      └─throttled─▶ Backoff{1} ─throttled─▶ Backoff{2} ─ … ─▶ Failed
//!                        │                       │        (after max retries)
//!                        └──────ok/err───────────┴──────▶ Done / Failed
//! ```
//!
//! Cooldown grows as `throttle_cooldown × 2^(attempt-1)`, capped at 32×.
//!
//! A call whose caller has stopped waiting (the `invoke` future was
//! dropped) is discarded instead of being dispatched or retried.

use anyhow::anyhow;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use super::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::CallError;

/// Largest backoff exponent: cooldown never exceeds 32× the base.
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Lifecycle of a queued call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    /// Throttled `attempt` times in a row; waiting at the head of the queue.
    Backoff { attempt: u32 },
    Done,
    Failed,
}

/// What one attempt of a call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Done,
    Failed,
    Throttled(String),
}

/// Transition after an attempt finishes.
fn next_state(state: CallState, outcome: &Outcome, max_retries: u32) -> CallState {
    match outcome {
        Outcome::Done => CallState::Done,
        Outcome::Failed => CallState::Failed,
        Outcome::Throttled(_) => {
            let attempt = match state {
                CallState::Backoff { attempt } => attempt + 1,
                _ => 1,
            };
            if attempt > max_retries {
                CallState::Failed
            } else {
                CallState::Backoff { attempt }
            }
        }
    }
}

/// Cooldown before retrying a call throttled `attempt` times.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base * (1u32 << exponent)
}

type Attempt = Box<dyn FnMut() -> BoxFuture<'static, Outcome> + Send>;
type Reject = Box<dyn FnOnce(CallError) + Send>;
type Abandoned = Box<dyn Fn() -> bool + Send>;
type ResultSlot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, CallError>>>>>;

struct Job {
    attempt: Attempt,
    reject: Reject,
    /// True once nobody is waiting for the result.
    abandoned: Abandoned,
    state: CallState,
}

/// Handle to the shared call queue. Cheap to clone; the worker stops once
/// every handle is dropped and the queue has drained.
#[derive(Clone)]
pub struct Gateway {
    tx: mpsc::UnboundedSender<Job>,
}

impl Gateway {
    /// Start the queue worker. Must be called from within a tokio runtime.
    pub fn new(config: GatewayConfig, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            max_concurrent: config.max_concurrent.max(1),
            min_delay: config.min_delay(),
            cooldown: config.throttle_cooldown(),
            max_retries: config.max_throttle_retries,
            clock,
            rx,
            open: true,
            queue: VecDeque::new(),
            in_flight: JoinSet::new(),
            last_dispatch: None,
            resume_at: None,
        };
        tokio::spawn(worker.run());
        Self { tx }
    }

    /// Queue `op` and wait for its result.
    ///
    /// `op` is called once per attempt. Throttled attempts are retried from
    /// the head of the queue; any other error is returned as-is.
    pub async fn invoke<T, F, Fut>(&self, mut op: F) -> Result<T, CallError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CallError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot: ResultSlot<T> = Arc::new(Mutex::new(Some(tx)));

        let deliver = slot.clone();
        let attempt: Attempt = Box::new(move || {
            let call = op();
            let deliver = deliver.clone();
            Box::pin(async move {
                match call.await {
                    Ok(value) => {
                        send(&deliver, Ok(value));
                        Outcome::Done
                    }
                    Err(CallError::Throttled(reason)) => Outcome::Throttled(reason),
                    Err(err) => {
                        send(&deliver, Err(err));
                        Outcome::Failed
                    }
                }
            })
        });
        let watch = slot.clone();
        let abandoned: Abandoned = Box::new(move || {
            watch.lock().as_ref().map_or(true, |tx| tx.is_closed())
        });
        let reject: Reject = Box::new(move |err| send(&slot, Err(err)));

        self.tx
            .send(Job {
                attempt,
                reject,
                abandoned,
                state: CallState::Pending,
            })
            .map_err(|_| CallError::Failed(anyhow!("call gateway has shut down")))?;

        rx.await
            .unwrap_or_else(|_| Err(CallError::Failed(anyhow!("call gateway dropped the call"))))
    }
}

fn send<T>(slot: &ResultSlot<T>, result: Result<T, CallError>) {
    if let Some(tx) = slot.lock().take() {
        let _ = tx.send(result);
    }
}

struct Worker {
    max_concurrent: usize,
    min_delay: Duration,
    cooldown: Duration,
    max_retries: u32,
    clock: Arc<dyn Clock>,
    rx: mpsc::UnboundedReceiver<Job>,
    open: bool,
    queue: VecDeque<Job>,
    in_flight: JoinSet<(Job, Outcome)>,
    last_dispatch: Option<Instant>,
    resume_at: Option<Instant>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.drop_abandoned();
            if !self.queue.is_empty() && self.in_flight.len() < self.max_concurrent {
                let now = self.clock.now();
                let ready_at = self.ready_at();
                if now >= ready_at {
                    self.dispatch(now);
                    continue;
                }

                let clock = self.clock.clone();
                tokio::select! {
                    _ = clock.sleep(ready_at - now) => {}
                    Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                        self.finish(joined);
                    }
                    msg = self.rx.recv(), if self.open => self.accept(msg),
                }
                continue;
            }

            if !self.open && self.queue.is_empty() && self.in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.finish(joined);
                }
                msg = self.rx.recv(), if self.open => self.accept(msg),
                else => break,
            }
        }
        tracing::debug!("Call gateway worker stopped");
    }

    /// Earliest instant the next dispatch may happen.
    fn ready_at(&self) -> Instant {
        let now = self.clock.now();
        let paced = self
            .last_dispatch
            .map(|at| at + self.min_delay)
            .unwrap_or(now);
        match self.resume_at {
            Some(resume) if resume > paced => resume,
            _ => paced,
        }
    }

    fn drop_abandoned(&mut self) {
        let before = self.queue.len();
        self.queue.retain(|job| !(job.abandoned)());
        let dropped = before - self.queue.len();
        if dropped > 0 {
            tracing::debug!("Dropped {dropped} queued calls whose callers went away");
        }
    }

    fn accept(&mut self, msg: Option<Job>) {
        match msg {
            Some(job) => self.queue.push_back(job),
            None => self.open = false,
        }
    }

    fn dispatch(&mut self, now: Instant) {
        let Some(mut job) = self.queue.pop_front() else {
            return;
        };
        tracing::debug!(
            "Dispatching call ({:?}, {} queued, {} in flight)",
            job.state,
            self.queue.len(),
            self.in_flight.len()
        );
        self.last_dispatch = Some(now);
        self.in_flight.spawn(async move {
            let outcome = (job.attempt)().await;
            (job, outcome)
        });
    }

    fn finish(&mut self, joined: Result<(Job, Outcome), JoinError>) {
        let (mut job, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                // The call's result sender went down with the task.
                tracing::error!("Gateway call panicked: {e}");
                return;
            }
        };

        job.state = next_state(job.state, &outcome, self.max_retries);
        let Outcome::Throttled(reason) = outcome else {
            return;
        };

        match job.state {
            CallState::Backoff { attempt } if (job.abandoned)() => {
                // Still honour the cooldown for whatever is queued behind it.
                self.resume_at = Some(self.clock.now() + backoff(self.cooldown, attempt));
                tracing::debug!("Throttled call abandoned by its caller, not retrying: {reason}");
            }
            CallState::Backoff { attempt } => {
                let wait = backoff(self.cooldown, attempt);
                tracing::warn!(
                    "Call throttled ({reason}); retry {attempt}/{} in {wait:?}",
                    self.max_retries
                );
                self.resume_at = Some(self.clock.now() + wait);
                self.queue.push_front(job);
            }
            _ => {
                tracing::warn!(
                    "Call still throttled after {} retries, giving up: {reason}",
                    self.max_retries
                );
                (job.reject)(CallError::Throttled(reason));
            }
        }
    }
}
