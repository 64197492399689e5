//! Error types for token validation and key-set retrieval.

/// Failure while retrieving the identity provider's key set.
#[derive(thiserror::Error, Debug)]
pub enum JwksError {
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    #[error("Discovery request to {url} failed: {message}")]
    Discovery { url: String, message: String },

    #[error("Discovery document missing jwks_uri")]
    MissingJwksUri,

    #[error("Key set request to {url} failed: {message}")]
    KeySet { url: String, message: String },
}

/// Authentication or authorization failure.
///
/// `Authentication` means the caller could not be identified (no token, bad
/// token, expired token). `Authorization` means the caller was identified but
/// lacks a required scope.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),
}

impl AuthError {
    pub fn authentication(message: impl Into<String>) -> Self {
        AuthError::Authentication(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        AuthError::Authorization(message.into())
    }

    /// HTTP status this error maps to at the transport boundary.
    pub fn status(&self) -> u16 {
        match self {
            AuthError::Authentication(_) => 401,
            AuthError::Authorization(_) => 403,
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, AuthError::Authorization(_))
    }
}

impl From<JwksError> for AuthError {
    fn from(e: JwksError) -> Self {
        tracing::warn!("Key set retrieval failed: {e}");
        AuthError::Authentication("Invalid credentials".to_string())
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
