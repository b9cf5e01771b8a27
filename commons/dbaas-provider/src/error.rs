#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Provider API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    pub fn api(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ProviderError::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::NotFound(_) => true,
            ProviderError::Api { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Timeouts, connection failures, throttling and 5xx responses are worth
    /// retrying; everything else needs a spec or environment change.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout(_) => true,
            ProviderError::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.is_request()
            }
            ProviderError::Api { status, .. } => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::NotFound(_) => Some(404),
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert!(ProviderError::api(503, "SERVICE_UNAVAILABLE", "x").is_transient());
        assert!(ProviderError::api(429, "RATE_LIMITED", "x").is_transient());
        assert!(!ProviderError::api(400, "INVALID_ATTRIBUTE", "x").is_transient());
        assert!(ProviderError::api(404, "CLUSTER_NOT_FOUND", "x").is_not_found());
        assert!(ProviderError::NotFound("x".into()).is_not_found());
        assert!(ProviderError::Timeout("x".into()).is_transient());
        assert!(!ProviderError::InvalidRequest("x".into()).is_transient());
    }
}
