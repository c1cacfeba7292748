//! Blocking WebDriver wire client
//!
//! Speaks the W3C WebDriver protocol over HTTP to a remote end such as
//! geckodriver, chromedriver or a cloud grid. Only the handful of
//! endpoints the test executors need are implemented.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::error::{Error, Result};
use crate::session::{BrowserSession, RemoteFault, RemoteSession};

/// Connection settings for a remote WebDriver endpoint
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the remote end, e.g. `http://127.0.0.1:4444`
    pub endpoint: String,
    /// W3C capabilities requested for the session
    pub capabilities: Value,
    /// Per-request transport timeout for ordinary commands. `None`
    /// leaves requests unbounded; the dispatch watchdog is the limit.
    pub http_timeout: Option<Duration>,
    /// Timeout for session creation, which can wait on a remote VM boot
    pub init_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            endpoint: "http://127.0.0.1:4444".to_string(),
            capabilities: json!({}),
            http_timeout: None,
            init_timeout: Duration::from_secs(300),
        }
    }
}

/// Errors reported by the WebDriver wire client
#[derive(Error, Debug)]
pub enum WireError {
    /// The HTTP transport failed
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote end answered with a WebDriver error document
    #[error("remote error [{code}]: {message}")]
    Api { code: String, message: String },

    /// The remote end answered with something that is not WebDriver
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteFault for WireError {
    fn is_remote_timeout(&self) -> bool {
        matches!(self, WireError::Api { code, .. } if code == "script timeout" || code == "timeout")
    }

    fn is_connection_lost(&self) -> bool {
        matches!(self, WireError::Transport(_) | WireError::Protocol(_))
    }
}

/// A session on a remote WebDriver server
pub struct WebDriverSession {
    http: reqwest::blocking::Client,
    base: Url,
    session_id: String,
}

impl WebDriverSession {
    /// Create a new session on the remote end described by `config`.
    ///
    /// Session creation uses `init_timeout` instead of the ordinary
    /// transport timeout, since grid providers may boot a VM before
    /// answering.
    pub fn create(config: &SessionConfig) -> Result<Self> {
        let base = parse_endpoint(&config.endpoint)?;
        let http = reqwest::blocking::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| Error::SetupError(format!("Failed to build HTTP client: {}", e)))?;

        let url = base
            .join("session")
            .map_err(|e| Error::EndpointError(format!("{}: {}", config.endpoint, e)))?;
        let body = json!({"capabilities": {"alwaysMatch": config.capabilities}});
        let response = http
            .post(url)
            .timeout(config.init_timeout)
            .json(&body)
            .send()
            .map_err(|e| Error::SetupError(format!("Failed to reach remote end: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| Error::SetupError(format!("Failed to read session response: {}", e)))?;
        let value = unpack(status, &text)
            .map_err(|e| Error::SetupError(format!("Session creation rejected: {}", e)))?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::SetupError("Session response has no sessionId".to_string()))?
            .to_string();

        log::debug!("Created remote session {}", session_id);

        Ok(WebDriverSession {
            http,
            base,
            session_id,
        })
    }

    /// Identifier assigned by the remote end
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// End the remote session. The remote end discards the browsing
    /// context, so the session must not be used afterwards.
    pub fn close(&self) -> Result<()> {
        let path = format!("session/{}", self.session_id);
        self.command(reqwest::Method::DELETE, &path, None)
            .map_err(|e| Error::Other(format!("Failed to close session: {}", e)))?;
        log::debug!("Closed remote session {}", self.session_id);
        Ok(())
    }

    fn session_command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> std::result::Result<Value, WireError> {
        let path = format!("session/{}/{}", self.session_id, path);
        self.command(method, &path, body)
    }

    fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> std::result::Result<Value, WireError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| WireError::Protocol(format!("bad command path {}: {}", path, e)))?;
        log::debug!("{} {}", method, path);
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send()?;
        let status = response.status();
        let text = response.text()?;
        unpack(status, &text)
    }
}

impl RemoteSession for WebDriverSession {
    type Error = WireError;

    fn set_script_timeout(&self, bound: Duration) -> std::result::Result<(), WireError> {
        let body = json!({"script": bound.as_millis() as u64});
        self.session_command(reqwest::Method::POST, "timeouts", Some(body))?;
        Ok(())
    }
}

impl BrowserSession for WebDriverSession {
    fn navigate(&self, url: &str) -> std::result::Result<(), WireError> {
        self.session_command(reqwest::Method::POST, "url", Some(json!({"url": url})))?;
        Ok(())
    }

    fn execute_async_script(&self, script: &str) -> std::result::Result<Value, WireError> {
        let body = json!({"script": script, "args": []});
        self.session_command(reqwest::Method::POST, "execute/async", Some(body))
    }

    fn screenshot_base64(&self) -> std::result::Result<String, WireError> {
        let value = self.session_command(reqwest::Method::GET, "screenshot", None)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WireError::Protocol("screenshot value is not a string".to_string()))
    }

    fn set_window_size(&self, width: u32, height: u32) -> std::result::Result<(), WireError> {
        let body = json!({"width": width, "height": height});
        self.session_command(reqwest::Method::POST, "window/rect", Some(body))?;
        Ok(())
    }
}

/// Parse the endpoint URL, keeping any path prefix joinable
fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let mut base = Url::parse(endpoint)
        .map_err(|e| Error::EndpointError(format!("{}: {}", endpoint, e)))?;
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    Ok(base)
}

/// Response envelope every WebDriver reply arrives in
#[derive(Deserialize)]
struct WireResponse {
    value: Value,
}

/// Split a raw WebDriver response into its `value`, surfacing error
/// documents as [`WireError::Api`]
fn unpack(status: reqwest::StatusCode, raw: &str) -> std::result::Result<Value, WireError> {
    let document: Value = serde_json::from_str(raw)
        .map_err(|_| WireError::Protocol(format!("response is not JSON: {:.120}", raw)))?;
    let WireResponse { value } = serde_json::from_value(document)
        .map_err(|_| WireError::Protocol("response has no value field".to_string()))?;

    if !status.is_success() {
        let code = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Err(WireError::Api { code, message });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_timeout_codes_classify_as_remote_timeout() {
        let err = WireError::Api {
            code: "script timeout".to_string(),
            message: String::new(),
        };
        assert!(err.is_remote_timeout());
        assert!(!err.is_connection_lost());

        let err = WireError::Api {
            code: "timeout".to_string(),
            message: String::new(),
        };
        assert!(err.is_remote_timeout());
    }

    #[test]
    fn ordinary_api_errors_are_neither_timeout_nor_lost() {
        let err = WireError::Api {
            code: "javascript error".to_string(),
            message: "boom".to_string(),
        };
        assert!(!err.is_remote_timeout());
        assert!(!err.is_connection_lost());
    }

    #[test]
    fn unparseable_responses_classify_as_connection_lost() {
        let err = unpack(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "<html>proxy died</html>",
        )
        .unwrap_err();
        assert!(err.is_connection_lost());
        assert!(!err.is_remote_timeout());
    }

    #[test]
    fn error_documents_unpack_into_api_errors() {
        let raw = r#"{"value": {"error": "no such window", "message": "target closed"}}"#;
        let err = unpack(reqwest::StatusCode::NOT_FOUND, raw).unwrap_err();
        match err {
            WireError::Api { code, message } => {
                assert_eq!(code, "no such window");
                assert_eq!(message, "target closed");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn success_documents_unpack_to_their_value() {
        let raw = r#"{"value": {"ready": true}}"#;
        let value = unpack(reqwest::StatusCode::OK, raw).unwrap();
        assert_eq!(value["ready"], json!(true));
    }

    #[test]
    fn endpoint_paths_keep_their_prefix() {
        let base = parse_endpoint("http://127.0.0.1:4444/wd/hub").unwrap();
        assert_eq!(
            base.join("session").unwrap().as_str(),
            "http://127.0.0.1:4444/wd/hub/session"
        );

        let base = parse_endpoint("http://127.0.0.1:4444").unwrap();
        assert_eq!(
            base.join("session").unwrap().as_str(),
            "http://127.0.0.1:4444/session"
        );
    }

    #[test]
    fn default_config_has_no_transport_bound() {
        let config = SessionConfig::default();
        assert_eq!(config.http_timeout, None);
        assert_eq!(config.init_timeout, Duration::from_secs(300));
    }
}
