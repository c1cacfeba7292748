//! Bounded dispatch of per-test remote calls
//!
//! A conformance run drives one remote browser session through many
//! tests, and any single test can wedge the remote end. [`BoundedCall`]
//! wraps each call in layered timeouts so the run loop always gets an
//! answer, even when the transport does not.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::session::{RemoteFault, RemoteSession};

/// Slack added on top of the per-test timeout at each bounding layer
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Result of one bounded remote call
#[derive(Debug)]
pub enum Outcome<T> {
    /// The task ran to completion and produced a payload
    Success(T),
    /// The remote end reported that the in-page work hit its own timeout
    RemoteTimeout,
    /// The transport failed mid-call, or the remote stopped answering
    ConnectionLost,
    /// The task failed with an ordinary error; the session is still usable
    Error(anyhow::Error),
    /// The watchdog expired before the worker reported anything
    WatchdogTimeout,
}

impl<T> Outcome<T> {
    /// Harness status label for this outcome
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "OK",
            Outcome::RemoteTimeout | Outcome::WatchdogTimeout => "EXTERNAL-TIMEOUT",
            Outcome::ConnectionLost => "CRASH",
            Outcome::Error(_) => "ERROR",
        }
    }

    /// Whether this outcome should end the enclosing run loop.
    ///
    /// A lost connection or an expired watchdog leaves the session in an
    /// unknown state. A plain task error is scoped to the one test.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::ConnectionLost | Outcome::WatchdogTimeout)
    }

    /// Full error message for [`Outcome::Error`], including the cause chain
    pub fn message(&self) -> Option<String> {
        match self {
            Outcome::Error(e) => Some(format!("{:#}", e)),
            _ => None,
        }
    }

    /// Payload of a successful call
    pub fn into_success(self) -> Option<T> {
        match self {
            Outcome::Success(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Runs one remote call per test under layered timeout bounds.
///
/// Three bounds apply, tightest first:
///
/// 1. the in-page harness is asked to finish within `timeout`,
/// 2. the remote script timeout is set to `timeout + grace`, leaving the
///    remote end room to report its own expiry,
/// 3. a local watchdog gives up after `timeout + 2 * grace`.
///
/// When the watchdog expires the worker thread is abandoned. It stays
/// blocked on the transport until the process exits, which is why
/// [`Outcome::WatchdogTimeout`] is fatal to the session.
#[derive(Debug, Clone, Copy)]
pub struct BoundedCall {
    timeout: Duration,
    grace: Duration,
}

impl BoundedCall {
    /// Bound a call by `timeout` with [`DEFAULT_GRACE`] slack
    pub fn new(timeout: Duration) -> Self {
        BoundedCall {
            timeout,
            grace: DEFAULT_GRACE,
        }
    }

    /// Replace the grace period
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run `task` against `session`, watching it with the local watchdog.
    ///
    /// The remote script timeout is configured before the task is
    /// dispatched. If that configuration call cannot reach the remote,
    /// no worker is spawned and the call is [`Outcome::ConnectionLost`].
    ///
    /// The worker reports exactly once over a one-shot channel, as its
    /// final action whatever the task did. If the report and the
    /// watchdog expiry race, whichever the receiver observes first wins.
    ///
    /// On [`Outcome::WatchdogTimeout`] no cancellation is attempted; the
    /// remote call is not interruptible. The abandoned worker may still
    /// be holding the session, so reusing the session for another call
    /// after a watchdog timeout is not safe.
    ///
    /// # Panics
    ///
    /// Panics if the worker terminates without reporting an outcome,
    /// which means the task itself panicked.
    pub fn run<S, T, E, F>(&self, session: &Arc<S>, target: &str, task: F) -> Outcome<T>
    where
        S: RemoteSession + 'static,
        T: Send + 'static,
        E: RemoteFault + std::error::Error + Send + Sync + 'static,
        F: FnOnce(&S, &str, Duration) -> std::result::Result<T, E> + Send + 'static,
    {
        if let Err(e) = session.set_script_timeout(self.timeout + self.grace) {
            if e.is_connection_lost() {
                log::error!("Lost remote connection while setting script timeout");
                return Outcome::ConnectionLost;
            }
            return Outcome::Error(anyhow::Error::new(e));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let worker_session = Arc::clone(session);
        let worker_target = target.to_owned();
        let timeout = self.timeout;

        thread::spawn(move || {
            let outcome = match task(&worker_session, &worker_target, timeout) {
                Ok(payload) => Outcome::Success(payload),
                Err(e) if e.is_remote_timeout() => Outcome::RemoteTimeout,
                Err(e) if e.is_connection_lost() => Outcome::ConnectionLost,
                Err(e) => Outcome::Error(anyhow::Error::new(e)),
            };
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(self.timeout + self.grace * 2) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!("Watchdog expired for {}, abandoning worker", target);
                Outcome::WatchdogTimeout
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                panic!("bounded call worker terminated without reporting an outcome")
            }
        }
    }
}
