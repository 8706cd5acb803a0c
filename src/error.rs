use std::time::Duration;

/// Why a single resolution candidate produced nothing.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("network error (transient: {transient}): {message}")]
    Network { transient: bool, message: String },

    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("no media url found: {0}")]
    NotFound(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("no media request within {0:?}")]
    Timeout(Duration),
}

impl ResolveError {
    /// Transient failures may go away on their own; the rest usually mean
    /// the upstream page changed.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::Network { transient, .. } => *transient,
            ResolveError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            ResolveError::Timeout(_) => true,
            ResolveError::NotFound(_) | ResolveError::Browser(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::Network { .. } => "network",
            ResolveError::Status(_) => "status",
            ResolveError::NotFound(_) => "not-found",
            ResolveError::Browser(_) => "browser",
            ResolveError::Timeout(_) => "timeout",
        }
    }
}

impl From<reqwest_middleware::Error> for ResolveError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => ResolveError::Network {
                transient: false,
                message: format!("{err:#}"),
            },
        }
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ResolveError::Status(status.as_u16());
        }

        ResolveError::Network {
            transient: err.is_timeout() || err.is_connect(),
            message: err.to_string(),
        }
    }
}

impl From<thirtyfour::error::WebDriverError> for ResolveError {
    fn from(err: thirtyfour::error::WebDriverError) -> Self {
        ResolveError::Browser(err.to_string())
    }
}
