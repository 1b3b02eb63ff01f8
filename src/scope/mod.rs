//! Runtime scope registration and debounced reauthorization.

pub mod events;
pub mod registry;
pub mod request;

pub use events::{persist_on_completion, ReauthEvent, ReauthEventSink, ReauthFailure, ReauthInfo};
pub use registry::{ReauthPhase, ScopeRegistry};
pub use request::ScopeRequest;
