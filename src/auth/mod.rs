//! OAuth device-code flow, token types and token storage.

pub mod client;
pub mod device_code;
pub mod error;
pub mod service;
pub mod store;
pub mod token;

pub use client::{DeviceAuthClient, DeviceAuthFlow};
pub use device_code::{DeviceCodePoll, DeviceCodeSession, PollSchedule};
pub use error::{AuthError, AuthStatus};
pub use service::TokenService;
pub use store::{FileTokenStore, TokenStore};
pub use token::{Token, TokenValidation};
