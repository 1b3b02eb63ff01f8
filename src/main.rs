//! scopeauth CLI binary entry point.

use scopeauth::cli::{Cli, Commands};
use scopeauth::config::AuthConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("SCOPEAUTH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    let result = match AuthConfig::from_env() {
        Ok(mut config) => {
            if let Some(client_id) = cli.client_id {
                config.client_id = Some(client_id);
            }
            run(cli.command, &config).await
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &AuthConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Login(args) => {
            scopeauth::cli::auth::handle_login(config, &args.requester, &args.scopes).await
        }
        Commands::Status => scopeauth::cli::auth::handle_status(config).await,
        Commands::Validate => scopeauth::cli::auth::handle_validate(config).await,
        Commands::Refresh => scopeauth::cli::auth::handle_refresh(config).await,
        Commands::Logout => scopeauth::cli::auth::handle_logout(config).await,
    }
}
