#![deny(missing_docs)]
//! A timer-driven token bucket rate limiter.
//!
//! A [TokenBucket] holds up to `capacity` tokens and adds `refill` tokens
//! every `interval` while its refill task is running. Consuming tokens is
//! either synchronous through [`try_consume`], which never suspends, or
//! asynchronous through [`consume`], which suspends the caller until enough
//! tokens have accumulated. Pending asynchronous requests are served strictly
//! in arrival order.
//!
//! Refilling can be suspended for a bounded duration with
//! [`force_stop_for`], for example when an upstream service asks you to back
//! off. Suppressed ticks are skipped, not made up afterwards.
//!
//! ## Usage
//!
//! Add the following to your `Cargo.toml`:
//!
//! ```toml
//! token-bucket = "0.1.0"
//! ```
//!
//! ## Example
//!
//! ```
//! use token_bucket::TokenBucket;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), token_bucket::Error> {
//! let bucket = TokenBucket::builder()
//!     .capacity(10)
//!     .refill(1.0)
//!     .initial(10)
//!     .build()?;
//!
//! assert!(bucket.try_consume(5));
//! assert!(!bucket.try_consume(6));
//! assert_eq!(bucket.tokens(), 5.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Example with a running refill task
//!
//! The refill task runs on the Tokio runtime, so [`start`] must be called
//! from within one:
//!
//! ```no_run
//! use std::time::Duration;
//! use token_bucket::TokenBucket;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), token_bucket::Error> {
//! let bucket = TokenBucket::builder()
//!     .capacity(5)
//!     .refill(1.0)
//!     .interval(Duration::from_secs(1))
//!     .initial(0)
//!     .build()?;
//!
//! bucket.start();
//!
//! println!("Waiting for tokens...");
//! // should take about 5 seconds to be served.
//! bucket.consume(5).await?;
//! println!("I made it!");
//! # Ok(())
//! # }
//! ```
//!
//! [`try_consume`]: TokenBucket::try_consume
//! [`consume`]: TokenBucket::consume
//! [`start`]: TokenBucket::start
//! [`force_stop_for`]: TokenBucket::force_stop_for

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Cadence of the verbose token level report, independent of the refill
/// interval.
const LEVEL_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Error type for the rate limiter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configured capacity was zero.
    #[error("capacity must be a positive number of tokens")]
    InvalidCapacity,
    /// The configured refill amount was zero, negative, or not finite.
    #[error("refill amount per interval must be positive and finite")]
    InvalidRefill,
    /// The configured refill interval was zero.
    #[error("refill interval must be a non-zero duration")]
    InvalidInterval,
    /// The configured initial token count exceeded the capacity.
    #[error("initial tokens {initial} outside of range 0..={capacity}")]
    InvalidInitial {
        /// The initial token count that was asked for.
        initial: usize,
        /// The configured capacity.
        capacity: usize,
    },
    /// More tokens were requested than the bucket can ever hold, so the
    /// request can never be satisfied.
    #[error("requested {requested} tokens but the bucket only holds {capacity}")]
    ExceedsCapacity {
        /// The number of tokens that were requested.
        requested: usize,
        /// The configured capacity.
        capacity: usize,
    },
    /// The bucket state went away while a request was queued.
    #[error("bucket was dropped while waiting for tokens")]
    Interrupted,
}

/// A single queued request waiting for tokens.
struct Waiter {
    /// Number of tokens required to complete this request.
    amount: usize,
    /// Triggered when the request has been served.
    completion: oneshot::Sender<()>,
}

/// Mutable bucket state. All fields are serialized under a single lock and
/// the lock is never held across an await.
struct State {
    /// Current number of available tokens, always in `0.0..=capacity`.
    tokens: f64,
    /// While the current time is before this, refill ticks are suppressed.
    force_stop_until: Option<Instant>,
    /// Pending asynchronous requests in arrival order.
    waiters: VecDeque<Waiter>,
    /// Handle to the refill task, present while the bucket is running.
    refill_task: Option<JoinHandle<()>>,
}

struct Inner {
    /// Max number of tokens the bucket can hold.
    capacity: usize,
    /// Tokens added on every refill tick.
    refill: f64,
    /// Period between refill ticks.
    interval: Duration,
    /// Whether diagnostic logging is enabled.
    verbose: bool,
    state: Mutex<State>,
}

impl Inner {
    /// The recurring refill task. Holds only a weak reference so that
    /// dropping every bucket handle lets the task wind down on its own.
    async fn refill_loop(inner: Weak<Inner>, interval: Duration, verbose: bool) {
        let mut tick = time::interval_at(Instant::now() + interval, interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report = time::interval_at(
            Instant::now() + LEVEL_REPORT_INTERVAL,
            LEVEL_REPORT_INTERVAL,
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };

                    inner.on_tick();
                }
                _ = report.tick(), if verbose => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };

                    let state = inner.state.lock();
                    tracing::info!(tokens = state.tokens, "token level");
                }
            }
        }
    }

    /// Process one refill tick: skip it entirely while force stopped,
    /// otherwise add tokens up to capacity and serve queued requests.
    fn on_tick(&self) {
        let mut state = self.state.lock();

        if let Some(until) = state.force_stop_until {
            if Instant::now() < until {
                return;
            }

            state.force_stop_until = None;

            if self.verbose {
                tracing::info!("force stop ended, refilling resumes");
            }
        }

        state.tokens = (state.tokens + self.refill).min(self.capacity as f64);
        self.drain_waiters(&mut state);
    }

    /// Serve queued requests in strict arrival order: stop at the first head
    /// request that does not fit, even if later, smaller ones would.
    fn drain_waiters(&self, state: &mut State) {
        while let Some(head) = state.waiters.front() {
            if head.completion.is_closed() {
                // The caller abandoned the wait, reap the entry without
                // consuming any tokens.
                state.waiters.pop_front();
                continue;
            }

            if state.tokens < head.amount as f64 {
                break;
            }

            if let Some(waiter) = state.waiters.pop_front() {
                // The receiver can be dropped from another thread between
                // the closed check above and this send. Only debit tokens
                // once the send has landed.
                if waiter.completion.send(()).is_err() {
                    continue;
                }

                state.tokens -= waiter.amount as f64;
            }
        }
    }

    /// Estimate how long until `amount` tokens could be available, assuming
    /// no other consumers intervene. Diagnostic only.
    fn estimate_ready(&self, state: &State, amount: usize) -> Duration {
        let deficit = (amount as f64 - state.tokens).max(0.0);
        let ticks = (deficit / self.refill).ceil() as u32;
        let mut wait = self.interval * ticks;

        if let Some(until) = state.force_stop_until {
            wait += until.saturating_duration_since(Instant::now());
        }

        wait
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().refill_task.take() {
            task.abort();
        }
    }
}

/// Builder for a [TokenBucket].
pub struct Builder {
    capacity: usize,
    refill: f64,
    interval: Duration,
    initial: Option<usize>,
    verbose: bool,
}

impl Builder {
    /// Set the maximum number of tokens the bucket can hold.
    ///
    /// Defaults to `120`.
    #[inline(always)]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the number of tokens added on every refill tick.
    ///
    /// May be fractional. Defaults to `1.0`.
    #[inline(always)]
    pub fn refill(mut self, refill: f64) -> Self {
        self.refill = refill;
        self
    }

    /// Set the period between refill ticks.
    ///
    /// Defaults to one second.
    #[inline(always)]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the number of tokens the bucket starts with.
    ///
    /// Defaults to the configured capacity.
    #[inline(always)]
    pub fn initial(mut self, initial: usize) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Enable diagnostic logging through `tracing`.
    ///
    /// Purely observational, never affects token accounting. Defaults to
    /// `false`.
    #[inline(always)]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Construct the bucket.
    ///
    /// The bucket starts out in the stopped state; call
    /// [`start`][TokenBucket::start] to arm the refill task.
    ///
    /// # Errors
    ///
    /// Fails fast if the capacity is zero, the refill amount is not positive
    /// and finite, the interval is zero, or the initial token count exceeds
    /// the capacity.
    pub fn build(self) -> Result<TokenBucket, Error> {
        if self.capacity == 0 {
            return Err(Error::InvalidCapacity);
        }

        if !self.refill.is_finite() || self.refill <= 0.0 {
            return Err(Error::InvalidRefill);
        }

        if self.interval.is_zero() {
            return Err(Error::InvalidInterval);
        }

        let initial = self.initial.unwrap_or(self.capacity);

        if initial > self.capacity {
            return Err(Error::InvalidInitial {
                initial,
                capacity: self.capacity,
            });
        }

        let inner = Arc::new(Inner {
            capacity: self.capacity,
            refill: self.refill,
            interval: self.interval,
            verbose: self.verbose,
            state: Mutex::new(State {
                tokens: initial as f64,
                force_stop_until: None,
                waiters: VecDeque::new(),
                refill_task: None,
            }),
        });

        Ok(TokenBucket { inner })
    }
}

/// A token bucket rate limiter.
///
/// Cloning produces another handle to the same bucket; all clones share
/// tokens, waiters, and the refill task.
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<Inner>,
}

impl TokenBucket {
    /// Construct a new bucket through a builder.
    pub fn builder() -> Builder {
        Builder {
            capacity: 120,
            refill: 1.0,
            interval: Duration::from_secs(1),
            initial: None,
            verbose: false,
        }
    }

    /// Query how many tokens are currently available.
    ///
    /// This is a best-effort snapshot; other consumers may intervene between
    /// reading the level and acting on it.
    pub fn tokens(&self) -> f64 {
        self.inner.state.lock().tokens
    }

    /// Get the max number of tokens this bucket is configured for.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Whether the refill task is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().refill_task.is_some()
    }

    /// Arm the refill task.
    ///
    /// Idempotent: calling this while already running is a no-op. Returns
    /// `&self` so construction and start can be chained.
    ///
    /// Must be called from within a Tokio runtime, since the refill task is
    /// spawned onto it.
    pub fn start(&self) -> &Self {
        let mut state = self.inner.state.lock();

        if state.refill_task.is_none() {
            let weak = Arc::downgrade(&self.inner);
            let interval = self.inner.interval;
            let verbose = self.inner.verbose;
            state.refill_task = Some(tokio::spawn(Inner::refill_loop(weak, interval, verbose)));
        }

        self
    }

    /// Disarm the refill task.
    ///
    /// Idempotent. No further ticks fire until [`start`][TokenBucket::start]
    /// is called again. Tokens are kept and queued requests stay queued,
    /// unserviced, until restarted.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();

        if let Some(task) = state.refill_task.take() {
            task.abort();
        }
    }

    /// Try to consume `amount` tokens without suspending.
    ///
    /// Returns `true` and decrements the level if enough tokens are
    /// available, otherwise returns `false` and leaves the bucket untouched.
    /// Insufficient tokens is a normal outcome, not an error.
    ///
    /// Requesting more than the capacity can never succeed and always
    /// returns `false`; in verbose mode this is logged as a distinct
    /// condition from a temporary shortfall.
    pub fn try_consume(&self, amount: usize) -> bool {
        let mut state = self.inner.state.lock();

        if amount > self.inner.capacity {
            if self.inner.verbose {
                tracing::warn!(
                    amount,
                    capacity = self.inner.capacity,
                    "request exceeds capacity and can never be satisfied"
                );
            }

            return false;
        }

        if state.tokens >= amount as f64 {
            state.tokens -= amount as f64;
            return true;
        }

        if self.inner.verbose {
            let ready = self.inner.estimate_ready(&state, amount);
            tracing::debug!(
                amount,
                tokens = state.tokens,
                ready_in_ms = ready.as_millis() as u64,
                "insufficient tokens"
            );
        }

        false
    }

    /// Consume a single token, suspending until it is available.
    ///
    /// This is identical to [`consume`] with an argument of `1`.
    ///
    /// [`consume`]: TokenBucket::consume
    #[inline]
    pub async fn consume_one(&self) -> Result<(), Error> {
        self.consume(1).await
    }

    /// Consume `amount` tokens, suspending until they are available.
    ///
    /// If no other request is queued and the tokens are available, this
    /// completes immediately without suspending. Otherwise the request is
    /// queued and served in strict arrival order by the refill task: a large
    /// request at the head of the queue blocks smaller requests behind it by
    /// design, so arrival order is always honored.
    ///
    /// There is no timeout; a queued request stays pending until served.
    /// Dropping the returned future abandons the wait without consuming any
    /// tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExceedsCapacity`] if `amount` is larger than the
    /// bucket capacity, since such a request could never be served.
    pub async fn consume(&self, amount: usize) -> Result<(), Error> {
        let completion_rx = {
            let mut state = self.inner.state.lock();

            if amount > self.inner.capacity {
                if self.inner.verbose {
                    tracing::warn!(
                        amount,
                        capacity = self.inner.capacity,
                        "request exceeds capacity and can never be satisfied"
                    );
                }

                return Err(Error::ExceedsCapacity {
                    requested: amount,
                    capacity: self.inner.capacity,
                });
            }

            // Fast path: only when nothing is queued ahead of us, otherwise
            // we would be served out of order.
            if state.waiters.is_empty() && state.tokens >= amount as f64 {
                state.tokens -= amount as f64;
                return Ok(());
            }

            if self.inner.verbose {
                let ready = self.inner.estimate_ready(&state, amount);
                tracing::debug!(
                    amount,
                    tokens = state.tokens,
                    ready_in_ms = ready.as_millis() as u64,
                    "queueing until tokens are available"
                );
            }

            let (completion, completion_rx) = oneshot::channel();
            state.waiters.push_back(Waiter { amount, completion });
            completion_rx
        };

        completion_rx.await.map_err(|_| Error::Interrupted)
    }

    /// Suppress refilling until `delay` has passed.
    ///
    /// Ticks scheduled inside the window are skipped entirely and are not
    /// made up afterwards; accrual resumes with the first tick after the
    /// window. Already-accumulated tokens and queued requests are untouched,
    /// though queued requests will not be served before refilling resumes.
    ///
    /// Calling this while a previous window is still active moves the end of
    /// the window to `now + delay`; the windows do not stack.
    pub fn force_stop_for(&self, delay: Duration) {
        let mut state = self.inner.state.lock();

        let now = Instant::now();
        let already_active = state
            .force_stop_until
            .map(|until| now < until)
            .unwrap_or(false);

        state.force_stop_until = Some(now + delay);

        if self.inner.verbose && !already_active {
            tracing::info!(delay_ms = delay.as_millis() as u64, "force stop started");
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();

        fmt.debug_struct("TokenBucket")
            .field("tokens", &state.tokens)
            .field("capacity", &self.inner.capacity)
            .field("refill", &self.inner.refill)
            .field("interval", &self.inner.interval)
            .finish()
    }
}
