//! RFox Remote Test Dispatch
//!
//! Drives a browser behind a W3C WebDriver endpoint through conformance
//! tests, bounding every remote call with a local watchdog so one
//! wedged page never stalls a whole run.
//!
//! # Features
//!
//! - **Wire Backend** (default): blocking W3C WebDriver client over HTTP
//! - **Layered Timeouts**: remote script timeout plus a local watchdog
//! - **Pluggable Sessions**: dispatch is written against session traits,
//!   so custom transports slot in
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use rfremote::{RemoteBrowser, SessionConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig {
//!     endpoint: "http://127.0.0.1:4444".to_string(),
//!     ..Default::default()
//! };
//!
//! let browser = RemoteBrowser::connect(config).await?;
//! let outcome = browser
//!     .run_test("http://wpt.live/dom/historical.html", Duration::from_secs(10))
//!     .await?;
//! println!("{}", outcome.status());
//! browser.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod runner;
pub use runner::{BoundedCall, Outcome, DEFAULT_GRACE};

pub mod session;
pub use session::{BrowserSession, RemoteFault, RemoteSession};

pub mod harness;
pub use harness::{ExecutorConfig, RefTestExecutor, TestharnessExecutor};

// W3C WebDriver wire client (blocking HTTP transport)
#[cfg(feature = "wire")]
pub mod wire;
#[cfg(feature = "wire")]
pub use wire::{SessionConfig, WebDriverSession, WireError};

// Async-friendly session API (simple worker-backed abstraction)
#[cfg(feature = "wire")]
pub mod async_api;

// Re-export the RemoteBrowser type at the crate root for ergonomic examples
#[cfg(feature = "wire")]
pub use async_api::RemoteBrowser;

/// Create a blocking session on the default wire backend
#[cfg(feature = "wire")]
pub fn connect(config: &SessionConfig) -> Result<WebDriverSession> {
    WebDriverSession::create(config)
}
