//! CLI entry point for scopeauth.

pub mod auth;

use clap::{Parser, Subcommand};

/// Device-code OAuth helper
#[derive(Parser, Debug)]
#[command(name = "scopeauth", version, about = "Device-code OAuth with runtime scopes")]
pub struct Cli {
    /// OAuth client id (overrides SCOPEAUTH_CLIENT_ID)
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorize the given scopes with a device code
    Login(LoginArgs),
    /// Show the persisted token
    Status,
    /// Check the persisted token with the provider
    Validate,
    /// Refresh the persisted token
    Refresh,
    /// Remove the persisted token
    Logout,
}

/// Arguments for `scopeauth login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Scope to request (repeatable)
    #[arg(short, long = "scope", required = true)]
    pub scopes: Vec<String>,

    /// Name recorded as the requester of these scopes
    #[arg(long, default_value = "cli")]
    pub requester: String,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
