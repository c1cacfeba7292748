//! Test executors for harness and reference tests
//!
//! The executors translate one conformance test into navigate/execute
//! calls on a [`BrowserSession`], dispatched through [`BoundedCall`] so
//! a wedged page cannot stall the whole run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose;
use base64::Engine as Base64Engine;
use serde_json::Value;
use thiserror::Error;

use crate::runner::{BoundedCall, Outcome, DEFAULT_GRACE};
use crate::session::{BrowserSession, RemoteFault};

/// Async script injected to collect harness results.
///
/// The page is expected to stash its completion payload in
/// `window.__harness_result`, or to call `window.__harness_report`
/// once it finishes.
pub const COLLECT_SCRIPT: &str = r#"
var callback = arguments[arguments.length - 1];
if (window.__harness_result !== undefined) {
    callback(window.__harness_result);
} else {
    window.__harness_report = function (result) { callback(result); };
}
"#;

/// Async script that waits for a reference page to settle.
///
/// Pages opt into delayed rendering by putting `reftest-wait` on the
/// root element and removing it when ready.
pub const WAIT_SCRIPT: &str = r#"
var callback = arguments[arguments.length - 1];
function check() {
    if (document.documentElement.classList.contains("reftest-wait")) {
        window.requestAnimationFrame(check);
    } else {
        callback();
    }
}
check();
"#;

/// Tuning shared by the executors
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Scale factor applied to every per-test timeout
    pub timeout_multiplier: f64,
    /// Grace period handed to the dispatch watchdog
    pub grace: Duration,
    /// Window size applied before the first screenshot
    pub window_size: (u32, u32),
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            timeout_multiplier: 1.0,
            grace: DEFAULT_GRACE,
            window_size: (800, 600),
        }
    }
}

/// Failure inside an executor task, either from the session or from a
/// payload the page handed back
#[derive(Error, Debug)]
enum ExecError<E: std::error::Error> {
    #[error(transparent)]
    Session(E),

    #[error("Malformed harness payload: {0}")]
    Payload(String),
}

impl<E> RemoteFault for ExecError<E>
where
    E: std::error::Error + RemoteFault,
{
    fn is_remote_timeout(&self) -> bool {
        match self {
            ExecError::Session(e) => e.is_remote_timeout(),
            ExecError::Payload(_) => false,
        }
    }

    fn is_connection_lost(&self) -> bool {
        match self {
            ExecError::Session(e) => e.is_connection_lost(),
            ExecError::Payload(_) => false,
        }
    }
}

/// Runs testharness tests over a browser session
pub struct TestharnessExecutor<S> {
    session: Arc<S>,
    config: ExecutorConfig,
    collect_script: String,
}

impl<S: BrowserSession + 'static> TestharnessExecutor<S> {
    pub fn new(session: Arc<S>, config: ExecutorConfig) -> Self {
        TestharnessExecutor {
            session,
            config,
            collect_script: COLLECT_SCRIPT.to_string(),
        }
    }

    /// Replace the injected collection script
    pub fn with_collect_script(mut self, script: impl Into<String>) -> Self {
        self.collect_script = script.into();
        self
    }

    /// Load `url` and collect the harness payload from it, bounded by
    /// `timeout` scaled with the configured multiplier
    pub fn run_test(&self, url: &str, timeout: Duration) -> Outcome<Value> {
        let script = self.collect_script.clone();
        let call = BoundedCall::new(timeout.mul_f64(self.config.timeout_multiplier))
            .with_grace(self.config.grace);
        call.run(
            &self.session,
            url,
            move |session: &S, url: &str, _timeout: Duration| {
                session.navigate(url).map_err(ExecError::Session)?;
                let raw = session
                    .execute_async_script(&script)
                    .map_err(ExecError::Session)?;
                shape_harness_payload(raw).map_err(ExecError::Payload)
            },
        )
    }
}

/// Captures screenshots of reference tests over a browser session
pub struct RefTestExecutor<S> {
    session: Arc<S>,
    config: ExecutorConfig,
    wait_script: String,
    has_window: AtomicBool,
}

impl<S: BrowserSession + 'static> RefTestExecutor<S> {
    pub fn new(session: Arc<S>, config: ExecutorConfig) -> Self {
        RefTestExecutor {
            session,
            config,
            wait_script: WAIT_SCRIPT.to_string(),
            has_window: AtomicBool::new(false),
        }
    }

    /// Replace the injected wait script
    pub fn with_wait_script(mut self, script: impl Into<String>) -> Self {
        self.wait_script = script.into();
        self
    }

    /// Screenshot `url` once its page signals readiness, returning raw
    /// PNG bytes.
    ///
    /// The window is sized once, before the first capture, so every
    /// screenshot in a comparison comes from the same viewport.
    pub fn screenshot(&self, url: &str, timeout: Duration) -> Outcome<Vec<u8>> {
        if !self.has_window.load(Ordering::Acquire) {
            let (width, height) = self.config.window_size;
            if let Err(e) = self.session.set_window_size(width, height) {
                return if e.is_connection_lost() {
                    Outcome::ConnectionLost
                } else {
                    Outcome::Error(anyhow::Error::new(e))
                };
            }
            log::info!("Reference screenshots assume OS-level window focus");
            self.has_window.store(true, Ordering::Release);
        }

        let script = self.wait_script.clone();
        let call = BoundedCall::new(timeout.mul_f64(self.config.timeout_multiplier))
            .with_grace(self.config.grace);
        call.run(
            &self.session,
            url,
            move |session: &S, url: &str, _timeout: Duration| {
                session.navigate(url).map_err(ExecError::Session)?;
                session
                    .execute_async_script(&script)
                    .map_err(ExecError::Session)?;
                let shot = session.screenshot_base64().map_err(ExecError::Session)?;
                decode_screenshot(&shot).map_err(ExecError::Payload)
            },
        )
    }
}

/// Normalize a harness completion payload.
///
/// Remote ends may hand the payload back JSON-encoded rather than as a
/// structured value. The harness echoes the dispatched test into a
/// `test` key, which is dropped here.
fn shape_harness_payload(raw: Value) -> Result<Value, String> {
    let decoded: Value = match raw {
        Value::String(encoded) => serde_json::from_str(&encoded)
            .map_err(|e| format!("harness payload is not valid JSON: {}", e))?,
        other => other,
    };
    match decoded {
        Value::Object(mut fields) => {
            fields.remove("test");
            Ok(Value::Object(fields))
        }
        other => Err(format!("harness payload is not an object: {}", other)),
    }
}

/// Decode a screenshot reply into PNG bytes, tolerating remote ends
/// that wrap the base64 body in a data URL
fn decode_screenshot(shot: &str) -> Result<Vec<u8>, String> {
    let body = shot.strip_prefix("data:image/png;base64,").unwrap_or(shot);
    general_purpose::STANDARD
        .decode(body.trim())
        .map_err(|e| format!("screenshot is not valid base64: {}", e))
}
