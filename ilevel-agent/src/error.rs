//! Error types shared by the session, fetch and poll layers
//!
//! Two families:
//! - Transient: network trouble, always answered with a retry timer
//! - Fatal: the dashboard refused us, polling halts until re-triggered

use reqwest::StatusCode;
use thiserror::Error;

/// Timeout, connection failure or non-200 reply. Never surfaced beyond a log entry.
#[derive(Debug, Error)]
pub enum TransientNetworkError {
    #[error("POST {url} timed out")]
    Timeout { url: String },

    #[error("POST {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },
}

/// Tokens missing from the login page
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("client id assignment not found in login page")]
    MissingClientId,

    #[error("backend URL assignment not found in login page")]
    MissingBackendUrl,

    #[error("backend URL {0:?} is not a valid absolute URL")]
    InvalidBackendUrl(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("unexpected login page: {0}")]
    ParseFailure(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Transient(#[from] TransientNetworkError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transient(#[from] TransientNetworkError),

    #[error("malformed tank list payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("tank list requested without an authenticated session")]
    NotAuthenticated,
}

impl TransientNetworkError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransientNetworkError::Timeout { url: url.to_string() }
        } else {
            TransientNetworkError::Connection {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid iLevel base URL {url}: {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
