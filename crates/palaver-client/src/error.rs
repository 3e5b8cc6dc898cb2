use thiserror::Error;

/// Errors surfaced by the client core.
///
/// The enum is `Clone` (string payloads only) so that coalesced operations
/// (throttled fetches, shared profile writes) can hand the same settled
/// result to every caller.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Missing or malformed input, raised before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport-level failure (connect, timeout, decode).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected the request.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Pub/sub channel subscription failed.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Local persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Image validation or processing failure.
    #[error("Media error: {0}")]
    Media(String),

    /// A background task died before producing a result.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Operation attempted on a destroyed widget.
    #[error("Widget has been destroyed")]
    Destroyed,
}

impl ClientError {
    /// Whether this error means the session credentials are no longer
    /// valid. Matches the configured backend error codes
    /// (case-insensitively) or a bare 401.
    pub fn is_auth_error(&self, auth_codes: &[String]) -> bool {
        match self {
            ClientError::Api { status, code, .. } => match code {
                Some(code) => auth_codes.iter().any(|c| c.eq_ignore_ascii_case(code)),
                None => *status == 401,
            },
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

impl From<palaver_shared::MediaError> for ClientError {
    fn from(e: palaver_shared::MediaError) -> Self {
        ClientError::Media(e.to_string())
    }
}

impl From<palaver_store::StoreError> for ClientError {
    fn from(e: palaver_store::StoreError) -> Self {
        ClientError::Storage(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
