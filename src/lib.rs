//! Device-code OAuth for long-running processes.
//!
//! Independent consumers declare the permission scopes they need at runtime.
//! The [`scope::ScopeRegistry`] collapses bursts of declarations into one
//! debounced reauthorization cycle, runs at most one Device Authorization
//! Grant at a time, and reports each cycle to subscribers as
//! `Required` → `Completed | Failed`.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use scopeauth::prelude::*;
//!
//! # async fn example() -> Result<(), AuthError> {
//! let config = AuthConfig::from_env()?;
//! let client = Arc::new(DeviceAuthClient::new(reqwest::Client::new(), &config));
//! let registry = ScopeRegistry::from_config(client, &config);
//! let mut events = registry.subscribe();
//!
//! registry.register_scopes("Core", &[("chat:read", None), ("chat:edit", None)]);
//! registry.register_scopes("ClipsPlugin", &[("clips:edit", Some("create clips"))]);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ReauthEvent::Required(info) => {
//!             println!("Visit {} and enter {}", info.verification_url, info.user_code)
//!         }
//!         ReauthEvent::Completed(_) => break,
//!         ReauthEvent::Failed(failure) => return Err(failure.error),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod prelude;
pub mod scope;
pub(crate) mod util;

#[cfg(feature = "cli")]
pub mod cli;
