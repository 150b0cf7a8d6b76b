use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use okta_session::config::{config_path, Credentials};
use okta_session::oauth::storage::REFRESH_TOKEN_KEY;
use okta_session::oauth::{ClientFactory, Grant, GrantKind, SecretStore};

type Factory = ClientFactory<Grant, Arc<dyn SecretStore>>;

const USAGE: &str = "\
Usage: okta-session <COMMAND>

Commands:
  login    Obtain (or refresh) a token and cache it
  status   Show configuration and cached session state
  logout   Remove cached tokens from the secret store
  help     Print this message

Configuration is read from OKTA_* environment variables and the optional
config file; OKTA_ORG_URL and OKTA_CLIENT_ID are required.";

#[tokio::main]
async fn main() -> ExitCode {
    let _log_guard = okta_session::logging::init();
    info!("{} v{} starting", okta_session::NAME, okta_session::VERSION);

    let command = std::env::args().nth(1).unwrap_or_else(|| "help".to_string());
    match run(&command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: &str) -> Result<()> {
    match command {
        "login" => login().await,
        "status" => status().await,
        "logout" => logout().await,
        "help" | "-h" | "--help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("unknown command '{other}'\n\n{USAGE}"),
    }
}

fn factory() -> Result<(Credentials, Factory)> {
    let credentials = Credentials::load().context("failed to load configuration")?;
    let factory =
        ClientFactory::from_credentials(&credentials).context("failed to initialize session")?;
    Ok((credentials, factory))
}

async fn login() -> Result<()> {
    let (credentials, factory) = factory()?;

    factory
        .session()
        .ensure_valid_token(credentials.token_max_age)
        .await
        .context("authentication failed")?;

    let snapshot = factory.session().snapshot().await;
    println!(
        "Authenticated with {} ({} grant)",
        credentials.org_url(),
        snapshot.grant_kind
    );
    if let Some(obtained_at) = snapshot.obtained_at {
        println!("Token obtained at {}", obtained_at.to_rfc3339());
    }
    Ok(())
}

async fn status() -> Result<()> {
    let (credentials, factory) = factory()?;
    let session = factory.session();
    let snapshot = session.snapshot().await;

    println!("Org URL:        {}", credentials.org_url());
    println!("Client ID:      {}", credentials.client_id);
    println!("Grant:          {}", credentials.grant_kind());
    println!("Scopes:         {}", credentials.scopes.join(" "));
    println!("Secret store:   {}", session.store().name());
    println!(
        "Config file:    {}",
        config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("Session phase:  {}", snapshot.phase);

    if credentials.grant_kind() == GrantKind::Device {
        let persisted = session.store().get(REFRESH_TOKEN_KEY).await.is_some();
        println!(
            "Refresh token:  {}",
            if persisted { "cached" } else { "not cached" }
        );
    }
    Ok(())
}

async fn logout() -> Result<()> {
    let (_, factory) = factory()?;
    factory.session().logout().await;
    println!("Cached tokens removed");
    Ok(())
}
