use thiserror::Error;

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Every failure the gateway can produce, normalized to one shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {}", .detail.as_deref().unwrap_or("no detail"))]
    Api { status: u16, detail: Option<String> },

    /// Malformed local input, rejected before any network call.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl RemoteError {
    /// HTTP status of a server-side rejection. `None` for local and transport failures.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The message a user should see, when the failure carries one of its own.
    ///
    /// Server rejections yield the server-supplied detail; local validation
    /// failures yield their reason. Transport and decode failures yield `None`
    /// so callers fall back to a generic message.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            RemoteError::Api { detail, .. } => detail.as_deref(),
            RemoteError::Validation(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout)
    }

    /// Build an `Api` error from a non-2xx response body.
    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        RemoteError::Api {
            status,
            detail: extract_detail(body),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_decode() {
            RemoteError::Parse(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Parse(err.to_string())
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"detail": "..."}`, the list form
/// `{"detail": [{"msg": "..."}, ...]}` and plain `message` / `error` fields.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    match value.get("detail") {
        Some(serde_json::Value::String(detail)) if !detail.is_empty() => {
            return Some(detail.clone());
        }
        Some(serde_json::Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }

    ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
