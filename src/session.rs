//! Session traits implemented by remote browser transports
//!
//! The dispatch machinery in [`crate::runner`] is written against these
//! traits rather than a concrete wire client, so any transport that can
//! report whether a failure was a remote-side timeout or a lost
//! connection can be driven by it.

use std::time::Duration;

/// Classification hooks for transport error types.
///
/// The bounded call runner sorts task failures into outcome buckets by
/// asking the error itself. Implementations should return `true` from at
/// most one of the two methods for a given value; if both return `false`
/// the failure is treated as an ordinary test error.
pub trait RemoteFault {
    /// The remote end reported that the in-page script hit its own
    /// timeout bound.
    fn is_remote_timeout(&self) -> bool;

    /// The transport to the remote end failed, or the remote answered
    /// with something other than a protocol response.
    fn is_connection_lost(&self) -> bool;
}

/// A live session on a remote browser endpoint.
pub trait RemoteSession: Send + Sync {
    /// Transport error type, classifiable into outcome buckets
    type Error: RemoteFault + std::error::Error + Send + Sync + 'static;

    /// Set the remote script timeout so in-page harness code is bounded
    /// at `bound`.
    fn set_script_timeout(&self, bound: Duration) -> std::result::Result<(), Self::Error>;
}

/// Browser-level operations needed by the test executors.
pub trait BrowserSession: RemoteSession {
    /// Navigate the browsing context to `url`
    fn navigate(&self, url: &str) -> std::result::Result<(), Self::Error>;

    /// Run an async script in the page and return its completion value
    fn execute_async_script(&self, script: &str)
        -> std::result::Result<serde_json::Value, Self::Error>;

    /// Capture the viewport as a base64-encoded PNG
    fn screenshot_base64(&self) -> std::result::Result<String, Self::Error>;

    /// Resize the browser window
    fn set_window_size(&self, width: u32, height: u32) -> std::result::Result<(), Self::Error>;
}
