use backoff::{backoff::Backoff, ExponentialBackoff};
use tokio::sync::watch;

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

/// Lets a caller stop a wait that's in progress. Clones share the same state, so cancelling
/// any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> CancelToken {
        CancelToken::new()
    }
}

impl CancelToken {
    pub fn new() -> CancelToken {
        let (sender, receiver) = watch::channel(false);
        CancelToken {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        // the token holds its own receiver, so this can't fail
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called on this token or any of its clones
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

pub type Reporter = Arc<dyn Fn(&str) + Send + Sync>;

/// How to poll while waiting for a resource to reach some state. The first check always
/// happens immediately and later checks are spaced by `interval`, optionally randomized by
/// the jitter factor.
#[derive(Clone)]
pub struct WaitOptions {
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub jitter: f64,
    pub(crate) cancel: Option<CancelToken>,
    pub(crate) reporter: Option<Reporter>,
}

impl Debug for WaitOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WaitOptions")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("jitter", &self.jitter)
            .field("cancellable", &self.cancel.is_some())
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

impl Default for WaitOptions {
    fn default() -> WaitOptions {
        WaitOptions::new(Duration::from_secs(1))
    }
}

impl WaitOptions {
    pub fn new(interval: Duration) -> WaitOptions {
        WaitOptions {
            interval,
            timeout: None,
            jitter: 0.0,
            cancel: None,
            reporter: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> WaitOptions {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancelToken) -> WaitOptions {
        self.cancel = Some(token);
        self
    }

    /// Randomizes each interval by up to `factor` in either direction. Values are clamped
    /// to the range `0.0..=1.0`.
    pub fn with_jitter(mut self, factor: f64) -> WaitOptions {
        self.jitter = factor.max(0.0).min(1.0);
        self
    }

    /// Called with the status message of the resource each time it changes
    pub fn with_reporter<F>(mut self, reporter: F) -> WaitOptions
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub(crate) fn report(&self, message: &str) {
        if let Some(reporter) = self.reporter.as_ref() {
            reporter(message);
        }
    }

    pub(crate) fn poll_timer(&self) -> PollTimer {
        // a multiplier of 1 turns the exponential backoff into a fixed interval with jitter
        let mut backoff = ExponentialBackoff {
            initial_interval: self.interval,
            current_interval: self.interval,
            max_interval: self.interval,
            randomization_factor: self.jitter,
            multiplier: 1.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        PollTimer {
            backoff,
            fallback: self.interval,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PollTimer {
    backoff: ExponentialBackoff,
    fallback: Duration,
}

impl PollTimer {
    pub(crate) fn next_interval(&mut self) -> Duration {
        self.backoff.next_backoff().unwrap_or(self.fallback)
    }
}

/// Whether `upsert` and `transform` retry when the api server reports a conflict. The default
/// never retries and returns the conflict to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy::never()
    }
}

impl RetryPolicy {
    pub fn never() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
        }
    }

    pub fn on_conflict(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            ..RetryPolicy::never()
        }
    }

    pub fn with_intervals(mut self, initial: Duration, max: Duration) -> RetryPolicy {
        self.initial_interval = initial;
        self.max_interval = max;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    pub(crate) fn start(&self) -> ConflictBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        ConflictBackoff {
            backoff,
            remaining: self.max_retries,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ConflictBackoff {
    backoff: ExponentialBackoff,
    remaining: u32,
}

impl ConflictBackoff {
    /// Returns how long to wait before the next attempt, or None once retries are used up
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.backoff.next_backoff()
    }
}
