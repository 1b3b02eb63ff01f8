//! CLI handlers for login, status, validate, refresh and logout.

use std::sync::Arc;

use crate::auth::{AuthError, DeviceAuthClient, FileTokenStore, TokenService, TokenStore};
use crate::config::AuthConfig;
use crate::scope::{persist_on_completion, ReauthEvent, ScopeRegistry};

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn token_service(config: &AuthConfig, http: reqwest::Client) -> TokenService {
    let client = DeviceAuthClient::new(http, config);
    TokenService::new(client, Arc::new(FileTokenStore::new(&config.token_path)))
}

/// Handle `scopeauth login --scope <scope>...`.
///
/// Runs the scopes through a registry so the same debounce and
/// reauthorization path the library uses is exercised.
pub async fn handle_login(config: &AuthConfig, requester: &str, scopes: &[String]) -> CliResult {
    config.require_client_id()?;
    let http = reqwest::Client::new();
    let service = token_service(config, http.clone());
    let client = Arc::new(DeviceAuthClient::new(http, config));
    let registry = ScopeRegistry::from_config(client, config);
    registry.add_event_sink(persist_on_completion(Arc::clone(service.store())));

    if let Some(token) = service.restore(&registry).await? {
        println!("Loaded saved token with {} scope(s)", token.scopes.len());
    }

    let mut events = registry.subscribe();
    let requested: Vec<(&str, Option<&str>)> = scopes.iter().map(|s| (s.as_str(), None)).collect();
    registry.register_scopes(requester, &requested);

    if registry.has_all_required_scopes() {
        println!("✅ Saved token already grants every requested scope");
        return Ok(());
    }

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                let polling = registry.is_request_in_flight();
                registry.cancel_pending();
                if !polling {
                    return Err(AuthError::Cancelled.into());
                }
                // the in-flight cycle reports the cancellation as Failed
                continue;
            }
        };
        match event {
            Some(ReauthEvent::Required(info)) => {
                println!("🔗 Visit: {}", info.verification_url);
                println!("📋 Enter code: {}", info.user_code);
                println!("🔐 Scopes: {}", info.all_scopes.join(" "));
                println!("⏳ Waiting for authorization...");
            }
            Some(ReauthEvent::Completed(token)) => {
                println!("✅ Authorized ({} scope(s))", token.scopes.len());
                return Ok(());
            }
            Some(ReauthEvent::Failed(failure)) => {
                eprintln!("❌ Authorization {}: {}", failure.status(), failure.message());
                std::process::exit(1);
            }
            None => return Err(AuthError::InvalidState("event stream closed".to_string()).into()),
        }
    }
}

/// Handle `scopeauth status`.
pub async fn handle_status(config: &AuthConfig) -> CliResult {
    let store = FileTokenStore::new(&config.token_path);
    println!("🔐 Token: {}", store.path().display());
    match store.load() {
        Ok(Some(token)) => {
            let status = match token.expires_at {
                Some(expires) if token.is_expired() => {
                    format!("⚠️  Expired {}", expires.format("%Y-%m-%d %H:%M"))
                }
                Some(expires) => format!("✅ Logged in (expires {})", expires.format("%Y-%m-%d %H:%M")),
                None => "✅ Logged in".to_string(),
            };
            println!("  {status}");
            println!("  Scopes: {}", token.scopes.join(" "));
        }
        Ok(None) => println!("  ❌ Not logged in"),
        Err(e) => println!("  ⚠️  Error: {e}"),
    }
    Ok(())
}

/// Handle `scopeauth validate`.
pub async fn handle_validate(config: &AuthConfig) -> CliResult {
    let store = FileTokenStore::new(&config.token_path);
    let token = store.load()?.ok_or(AuthError::NotLoggedIn)?;
    let client = DeviceAuthClient::new(reqwest::Client::new(), config);
    match client.validate(&token.access_token).await {
        Ok(validation) => {
            println!("✅ Valid for {}", validation.login.as_deref().unwrap_or("unknown user"));
            println!("  Scopes: {}", validation.scopes.join(" "));
            if let Some(secs) = validation.expires_in {
                println!("  Expires in: {secs}s");
            }
            Ok(())
        }
        Err(AuthError::ExpiredOrInvalidGrant) => {
            println!("⚠️  Token is invalid or expired; run `scopeauth refresh`");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Handle `scopeauth refresh`.
pub async fn handle_refresh(config: &AuthConfig) -> CliResult {
    let service = token_service(config, reqwest::Client::new());
    let token = service.store().load()?.ok_or(AuthError::NotLoggedIn)?;
    let refreshed = service.refresh(&token).await?;
    println!("✅ Token refreshed ({} scope(s))", refreshed.scopes.len());
    Ok(())
}

/// Handle `scopeauth logout`.
pub async fn handle_logout(config: &AuthConfig) -> CliResult {
    FileTokenStore::new(&config.token_path).clear()?;
    println!("✅ Logged out");
    Ok(())
}
