#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether a retry with backoff is worth attempting.
    ///
    /// Rate limits, 5xx responses, and transport drops are transient; auth,
    /// bad-request and permission failures propagate immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Http(_) => true,
            ProviderError::Parse(_) => false,
            ProviderError::Unavailable(_) => false,
            ProviderError::Cancelled => false,
        }
    }

    /// Short error code string surfaced at the transport boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Cancelled => "AI_TIMEOUT",
            _ => "STREAM_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert!(ProviderError::RateLimited { retry_after_ms: 100 }.is_transient());
        assert!(ProviderError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        for status in [400, 401, 403, 404] {
            assert!(!ProviderError::Api {
                status,
                message: String::new()
            }
            .is_transient());
        }
        assert!(!ProviderError::Cancelled.is_transient());
        assert!(!ProviderError::Unavailable("no key".into()).is_transient());
    }
}
