use std::time::Duration;

use chrono::{DateTime, Utc};

use super::Token;

/// Default increase applied to the poll interval on a `slow_down` response.
pub const DEFAULT_SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Device-code session details returned by the device endpoint.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use scopeauth::auth::DeviceCodeSession;
/// use chrono::Utc;
///
/// let session = DeviceCodeSession {
///     client_id: "client".to_string(),
///     device_code: "device".to_string(),
///     user_code: "ABCD-EFGH".to_string(),
///     verification_url: "https://www.twitch.tv/activate".to_string(),
///     scopes: vec!["chat:read".to_string()],
///     issued_at: Utc::now(),
///     expires_at: Utc::now() + chrono::Duration::seconds(1800),
///     interval: Duration::from_secs(5),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DeviceCodeSession {
    pub client_id: String,
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub interval: Duration,
}

impl DeviceCodeSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time left before the device code expires, zero once it has.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Outcome of a single token-endpoint poll.
#[derive(Debug, Clone)]
pub enum DeviceCodePoll {
    Pending,
    SlowDown,
    Authorized { token: Token },
}

/// Poll interval that only ever grows.
///
/// A `slow_down` raises the interval for every later sleep in the session,
/// not just the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    interval: Duration,
    step: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, step: Duration) -> Self {
        Self { interval, step }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn slow_down(&mut self) -> Duration {
        self.interval += self.step;
        self.interval
    }
}
