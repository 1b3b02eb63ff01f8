//! Convenience re-exports for common use.

pub use crate::auth::{
    AuthError, AuthStatus, DeviceAuthClient, DeviceAuthFlow, FileTokenStore, Token, TokenService,
    TokenStore,
};
pub use crate::config::AuthConfig;
pub use crate::scope::{ReauthEvent, ReauthInfo, ScopeRegistry, ScopeRequest};
