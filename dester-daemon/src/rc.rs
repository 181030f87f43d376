//! rclone remote-control (RC) transport.
//!
//! Every RC call is a JSON POST to `http://localhost:<port>/<method>`; the
//! daemon answers with a JSON object, or with an error object of the form
//! `{"error": "...", "status": 500, ...}`.

use std::thread::sleep;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::DaemonError;
use crate::paths::rc_base_url;

pub const PID: &str = "core/pid";
pub const VERSION: &str = "core/version";
pub const LIST_REMOTES: &str = "config/listremotes";
pub const LIST: &str = "operations/list";

/// One synchronous RC round trip. Shared by every remote handle.
pub trait RcTransport: Send + Sync {
    fn call(&self, method: &str, params: Value) -> Result<Value, DaemonError>;
}

#[derive(Debug, Deserialize)]
struct RcErrorBody {
    error: String,
    #[serde(default)]
    status: Option<u16>,
}

/// Blocking HTTP transport (ureq) against a localhost RC endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self::with_base_url(rc_base_url(port), timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl RcTransport for HttpTransport {
    fn call(&self, method: &str, params: Value) -> Result<Value, DaemonError> {
        let url = format!("{}/{}", self.base_url, method);
        match self.agent.post(&url).send_json(params) {
            Ok(response) => response.into_json::<Value>().map_err(|err| {
                DaemonError::Unreachable {
                    url,
                    message: format!("invalid response body: {err}"),
                }
            }),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(rc_error(method, code, &body))
            }
            Err(ureq::Error::Transport(transport)) => Err(DaemonError::Unreachable {
                url,
                message: transport.to_string(),
            }),
        }
    }
}

/// Map an RC error body to [`DaemonError::Rc`]; non-JSON bodies are kept raw.
pub(crate) fn rc_error(method: &str, http_status: u16, body: &str) -> DaemonError {
    match serde_json::from_str::<RcErrorBody>(body) {
        Ok(parsed) => DaemonError::Rc {
            method: method.to_string(),
            status: parsed.status.unwrap_or(http_status),
            message: parsed.error,
        },
        Err(_) => DaemonError::Rc {
            method: method.to_string(),
            status: http_status,
            message: body.trim().to_string(),
        },
    }
}

/// Poll `core/pid` until the daemon launched as `expected_pid` answers.
///
/// Connection failures are retried, and so is an answer from another
/// process still holding the port. Any other RC error means the daemon is
/// up and is returned as-is.
pub fn wait_until_ready(
    transport: &dyn RcTransport,
    expected_pid: u32,
    attempts: u32,
    interval: Duration,
) -> Result<u32, DaemonError> {
    let attempts = attempts.max(1);
    let mut foreign = None;
    for attempt in 1..=attempts {
        match transport.call(PID, json!({})) {
            Ok(response) => {
                let answered = response.get("pid").and_then(Value::as_u64);
                if answered == Some(u64::from(expected_pid)) {
                    tracing::debug!(attempt, pid = expected_pid, "daemon answered readiness probe");
                    return Ok(attempt);
                }
                tracing::debug!(attempt, expected = expected_pid, answered = ?answered, "port answered by another process");
                foreign = answered;
            }
            Err(DaemonError::Unreachable { url, message }) => {
                tracing::debug!(attempt, %url, %message, "daemon not answering yet");
                foreign = None;
            }
            Err(err) => return Err(err),
        }
        if attempt < attempts {
            sleep(interval);
        }
    }
    match foreign {
        Some(answered) => Err(DaemonError::ForeignListener {
            expected: expected_pid,
            answered,
        }),
        None => Err(DaemonError::NotReady { attempts }),
    }
}
