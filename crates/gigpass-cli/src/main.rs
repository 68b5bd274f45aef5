//! gigpass - command-line access to the gig marketplace API.
//!
//! Issues authenticated requests through the same pipeline the application
//! shell uses, so renewal, cooldown and realm redirects can be exercised
//! against a real backend.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use gigpass_core::auth::{Notifier, TracingNotifier};
use gigpass_core::{ApiClient, ApiRequest, Config, MemoryNavigator, Navigator};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

const ACCESS_TOKEN_ENV: &str = "GIGPASS_ACCESS_TOKEN";
const REFRESH_TOKEN_ENV: &str = "GIGPASS_REFRESH_TOKEN";

/// When set, logs go to a file in this directory instead of stderr
const LOG_DIR_ENV: &str = "GIGPASS_LOG_DIR";

const LOG_FILE: &str = "gigpass.log";

const USAGE: &str = "\
Usage: gigpass [--at <location>] [--prompt-refresh] <command>

Commands:
  get <path>          GET an API path and print the JSON response
  refresh             Renew the access credential
  logout              Invalidate the session and clear credentials
  classify <location> Show the realm and login target for a location
  status              Show configuration and credential state

Credentials are read from GIGPASS_ACCESS_TOKEN and GIGPASS_REFRESH_TOKEN.";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get(String),
    Refresh,
    Logout,
    Classify(String),
    Status,
}

#[derive(Debug, PartialEq, Eq)]
struct Options {
    location: String,
    prompt_refresh: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut location = "/".to_string();
    let mut prompt_refresh = false;
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--at" => {
                location = iter
                    .next()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("--at requires a location"))?;
            }
            "--prompt-refresh" => prompt_refresh = true,
            _ => rest.push(arg.as_str()),
        }
    }

    let command = match rest.as_slice() {
        ["get", path] => Command::Get(path.to_string()),
        ["refresh"] => Command::Refresh,
        ["logout"] => Command::Logout,
        ["classify", location] => Command::Classify(location.to_string()),
        ["status"] => Command::Status,
        _ => bail!("{}", USAGE),
    };

    Ok(Options {
        location,
        prompt_refresh,
        command,
    })
}

/// Initialize the tracing subscriber for logging.
/// Returns the appender guard, which must live until exit when logging to a file.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_args(&args)?;

    let config = Config::load().context("Failed to load configuration")?;
    info!(base_url = %config.api_base_url, "gigpass starting");

    let navigator = Arc::new(MemoryNavigator::new(options.location.clone()));
    let client = ApiClient::builder(config)
        .navigator(Arc::clone(&navigator) as Arc<dyn Navigator>)
        .notifier(Arc::new(TracingNotifier) as Arc<dyn Notifier>)
        .build()
        .context("Failed to build API client")?;

    load_credentials(&client, options.prompt_refresh)?;

    match options.command {
        Command::Get(path) => {
            let response = client.send(ApiRequest::get(path.as_str())).await?;
            let body: serde_json::Value = response
                .json()
                .await
                .with_context(|| format!("Failed to parse JSON response from {}", path))?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Refresh => {
            client.refresh().await?;
            println!("Access credential renewed");
        }
        Command::Logout => {
            let outcome = client.logout().await;
            println!("Logged out locally (server: {:?})", outcome);
        }
        Command::Classify(location) => {
            let routes = &client.config().routes;
            let class = routes.classify(&location);
            match routes.redirect_target(class) {
                Some(target) => println!(
                    "{}: {:?} realm, login at {}",
                    location, target.realm, target.path
                ),
                None => println!("{}: public", location),
            }
        }
        Command::Status => print_status(&client),
    }

    // Give a scheduled expiry redirect the chance to run before exit.
    if client.expiry().is_notice_pending() {
        tokio::time::sleep(client.config().expiry_redirect_delay()).await;
        println!("Redirected to {}", navigator.current_path());
    }

    Ok(())
}

fn load_credentials(client: &ApiClient, prompt_refresh: bool) -> Result<()> {
    let access = std::env::var(ACCESS_TOKEN_ENV).ok();
    let refresh = if prompt_refresh {
        Some(rpassword::prompt_password("Refresh token: ").context("Failed to read refresh token")?)
    } else {
        std::env::var(REFRESH_TOKEN_ENV).ok()
    };

    if let Some(access) = access {
        client.establish_session(access, refresh);
    } else if let Some(refresh) = refresh {
        client.store().set_refresh(refresh);
    }
    Ok(())
}

fn print_status(client: &ApiClient) {
    let config = client.config();
    let store = client.store();
    println!("API:      {}", config.api_base_url);
    println!(
        "Timeouts: {}s requests, {}s uploads, {}ms renewal cooldown",
        config.request_timeout_secs, config.upload_timeout_secs, config.refresh_cooldown_ms
    );
    println!(
        "Access:   {}",
        if store.get_access().is_some() { "present" } else { "absent" }
    );
    println!(
        "Refresh:  {}",
        if store.get_refresh().is_some() { "present" } else { "absent" }
    );
    if let Some(updated) = store.updated_at() {
        let age = Utc::now() - updated;
        println!("Updated:  {}s ago", age.num_seconds().max(0));
    }
}
