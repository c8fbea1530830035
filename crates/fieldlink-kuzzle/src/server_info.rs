//! Connection-independent health check against the backend's HTTP port.
//!
//! The supervisor calls this before attempting the persistent websocket
//! connection; any failure (network error, malformed body, non-success
//! status) yields `None` rather than an error, because the only decision
//! it feeds is "retry later or give up".

use serde_json::Value;
use tracing::{debug, error};

/// Result of a successful `_serverInfo` round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    result: Value,
}

impl ServerInfo {
    /// Version string of the Kuzzle node, when present.
    #[must_use]
    pub fn kuzzle_version(&self) -> Option<&str> {
        self.result
            .pointer("/serverInfo/kuzzle/version")?
            .as_str()
    }

    /// Raw `result` document.
    #[must_use]
    pub fn result(&self) -> &Value {
        &self.result
    }
}

/// `GET http://host:port/_serverInfo`, degraded to `Option`.
pub async fn server_info(host: &str, port: u16) -> Option<ServerInfo> {
    let url = format!("http://{host}:{port}/_serverInfo");
    debug!(url = %url, "Checking Kuzzle server info");

    let response = match reqwest::get(&url).await {
        Ok(response) => response,
        Err(e) => {
            error!(url = %url, error = %e, "Unable to connect to Kuzzle");
            return None;
        }
    };

    let body: Value = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            error!(url = %url, error = %e, "Invalid server info payload");
            return None;
        }
    };

    let status = body.get("status").and_then(Value::as_i64).unwrap_or(0);
    if status != 200 {
        error!(url = %url, status, "Unable to connect to Kuzzle");
        if let Some(err) = body.get("error") {
            error!(
                message = err.get("message").and_then(|v| v.as_str()).unwrap_or(""),
                stack = err.get("stack").and_then(|v| v.as_str()).unwrap_or(""),
                "Kuzzle error"
            );
        }
        return None;
    }

    Some(ServerInfo {
        result: body.get("result").cloned().unwrap_or(Value::Null),
    })
}
