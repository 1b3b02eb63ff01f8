use strum::{Display, EnumString};
use thiserror::Error;

/// Normalized authentication errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Access denied")]
    AccessDenied,
    #[error("Expired or invalid grant")]
    ExpiredOrInvalidGrant,
    #[error("Provider error (status {status}): {message}")]
    Provider { status: u16, message: String },
    #[error("Device code expired before authorization completed")]
    TimedOut,
    #[error("Authorization cancelled")]
    Cancelled,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl AuthError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Stable category for presenting this error to a user.
    pub fn status(&self) -> AuthStatus {
        match self {
            Self::AccessDenied => AuthStatus::Denied,
            Self::ExpiredOrInvalidGrant => AuthStatus::Expired,
            Self::TimedOut => AuthStatus::TimedOut,
            Self::Cancelled => AuthStatus::Cancelled,
            Self::Provider { message, .. } => AuthStatus::from_provider_message(message),
            _ => AuthStatus::Error,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Localizable status categories derived from raw provider messages.
///
/// The string forms are stable keys suitable for message catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AuthStatus {
    Pending,
    SlowDown,
    Invalid,
    Denied,
    Expired,
    Cancelled,
    TimedOut,
    Error,
}

impl AuthStatus {
    /// Map a raw provider error string to a category.
    pub fn from_provider_message(message: &str) -> Self {
        let normalized = message.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "authorization_pending" => Self::Pending,
            "slow_down" => Self::SlowDown,
            "access_denied" => Self::Denied,
            "expired_token" => Self::Expired,
            _ if normalized.contains("invalid") => Self::Invalid,
            _ => Self::Error,
        }
    }
}
