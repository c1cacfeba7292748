use crate::error::{Error, Result};
use crate::harness::{ExecutorConfig, RefTestExecutor, TestharnessExecutor};
use crate::runner::Outcome;
use crate::wire::{SessionConfig, WebDriverSession};
use serde_json::Value;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

enum Command {
    RunTest(String, Duration, oneshot::Sender<Outcome<Value>>),
    Screenshot(String, Duration, oneshot::Sender<Outcome<Vec<u8>>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly handle on a remote test session, backed by a
/// dedicated worker thread.
///
/// The worker thread owns the blocking [`WebDriverSession`] and its
/// executors, and runs commands sent from async tasks. Callers can
/// await test outcomes without tying up a runtime worker for the length
/// of a watchdog window.
///
/// Dropping every handle without calling [`close`](RemoteBrowser::close)
/// still ends the remote session; the worker closes it on its way out.
#[derive(Clone)]
pub struct RemoteBrowser {
    cmd_tx: Sender<Command>,
}

impl RemoteBrowser {
    /// Connect to a remote end with default executor tuning
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        Self::connect_with(config, ExecutorConfig::default()).await
    }

    /// Connect to a remote end (spawns a background thread that owns
    /// the session).
    pub async fn connect_with(config: SessionConfig, tuning: ExecutorConfig) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (oneshot::Sender<Result<()>>, oneshot::Receiver<Result<()>>) =
            oneshot::channel();

        thread::spawn(move || {
            // Create the session on the worker thread
            let session = match WebDriverSession::create(&config) {
                Ok(s) => Arc::new(s),
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            let harness = TestharnessExecutor::new(Arc::clone(&session), tuning.clone());
            let reftest = RefTestExecutor::new(Arc::clone(&session), tuning);

            let _ = init_tx.send(Ok(()));

            // Command loop
            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::RunTest(url, timeout, resp) => {
                        let outcome = harness.run_test(&url, timeout);
                        let _ = resp.send(outcome);
                    }
                    Command::Screenshot(url, timeout, resp) => {
                        let outcome = reftest.screenshot(&url, timeout);
                        let _ = resp.send(outcome);
                    }
                    Command::Close(resp) => {
                        let res = session.close();
                        let _ = resp.send(res);
                        return;
                    }
                }
            }

            // All handles dropped without an explicit close; the remote
            // session still has to be released
            if let Err(e) = session.close() {
                log::warn!("Failed to close dropped session: {}", e);
            }
        });

        // Wait for the worker to report session creation success or failure
        let init_res = init_rx
            .await
            .map_err(|e| Error::WorkerGone(format!("Session init canceled: {}", e)))?;
        init_res?;

        Ok(Self { cmd_tx })
    }

    /// Run one harness test and await its outcome
    pub async fn run_test(&self, url: &str, timeout: Duration) -> Result<Outcome<Value>> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::RunTest(url.to_string(), timeout, tx));
        rx.await
            .map_err(|e| Error::WorkerGone(format!("RunTest canceled: {}", e)))
    }

    /// Screenshot one reference page and await the PNG bytes
    pub async fn screenshot(&self, url: &str, timeout: Duration) -> Result<Outcome<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::Screenshot(url.to_string(), timeout, tx));
        rx.await
            .map_err(|e| Error::WorkerGone(format!("Screenshot canceled: {}", e)))
    }

    /// Shut down the background worker and end the remote session
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close(tx));
        rx.await
            .map_err(|e| Error::WorkerGone(format!("Close canceled: {}", e)))?
    }
}
