//! Utility modules.

pub mod sync;
