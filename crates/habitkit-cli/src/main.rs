//! habitkit - command-line front end for the habitkit API.
//!
//! Signs in, shows the stored session and issues authenticated requests
//! through the same client the app uses, so expired sessions are refreshed
//! transparently.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use habitkit_core::auth::CredentialStore;
use habitkit_core::{ApiClient, Config, RequestDescriptor, SessionStatus, SessionStore};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: habitkit <command>

Commands:
  login [email] [--remember]   Sign in and store the session
  logout                       Forget the session and stored password
  status                       Show the current session state
  get <path>                   GET a protected endpoint
  post <path> <json>           POST a JSON body to an endpoint
  burst <path> [count]         Fire parallel GETs (default 5)";

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). When `HABITKIT_LOG_DIR`
/// is set, a daily-rolling log file is written there as well.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    match std::env::var_os("HABITKIT_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "habitkit.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(stderr_layer)
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
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        return Ok(());
    };

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    config.apply_env()?;

    let session = Arc::new(SessionStore::persistent_or_reset(config.session_path()?));
    let client = ApiClient::builder()
        .config(config.clone())
        .session(Arc::clone(&session))
        .on_logout(|| eprintln!("Session expired. Run `habitkit login` to sign in again."))
        .build()?;

    match command.as_str() {
        "login" => login(&client, &mut config, &args[1..]).await,
        "logout" => {
            logout(&client, &config);
            Ok(())
        }
        "status" => {
            print_status(&session);
            Ok(())
        }
        "get" => {
            let path = args.get(1).context("get needs a path")?;
            let value: serde_json::Value = client.get_json(path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        "post" => {
            let path = args.get(1).context("post needs a path")?;
            let body: serde_json::Value = match args.get(2) {
                Some(raw) => serde_json::from_str(raw).context("Body must be valid JSON")?,
                None => serde_json::json!({}),
            };
            let value: serde_json::Value = client.post_json(path, &body).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        "burst" => {
            let path = args.get(1).context("burst needs a path")?;
            let count: usize = match args.get(2) {
                Some(n) => n.parse().context("count must be a number")?,
                None => 5,
            };
            burst(&client, path, count).await
        }
        other => {
            eprintln!("{USAGE}");
            bail!("Unknown command: {}", other)
        }
    }
}

async fn login(client: &ApiClient, config: &mut Config, args: &[String]) -> Result<()> {
    let remember = args.iter().any(|a| a == "--remember");
    let email = match args.iter().find(|a| !a.starts_with("--")) {
        Some(email) => email.clone(),
        None => prompt_email(config.last_email.as_deref())?,
    };
    if email.is_empty() {
        bail!("Email required");
    }

    let password = if CredentialStore::has_credentials(&email) {
        print!("Use stored password? [Y/n]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if input.trim().to_lowercase() != "n" {
            CredentialStore::get_password(&email)?
        } else {
            rpassword::prompt_password("Password: ")?
        }
    } else {
        rpassword::prompt_password("Password: ")?
    };

    client.sign_in(&email, &password).await.map_err(|e| match e {
        habitkit_core::ApiError::Unauthorized => anyhow::anyhow!("Invalid email or password"),
        other => other.into(),
    })?;

    if remember {
        if let Err(e) = CredentialStore::store(&email, &password) {
            warn!(error = %e, "Failed to store credentials");
        }
    }

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    info!("Login successful");
    println!("Signed in.");
    Ok(())
}

/// Sign out and forget any password `login --remember` stored
fn logout(client: &ApiClient, config: &Config) {
    client.sign_out();
    if let Some(email) = config.last_email.as_deref() {
        match CredentialStore::delete(email) {
            Ok(true) => info!("Removed stored password"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to remove stored password"),
        }
    }
    println!("Signed out.");
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

fn print_status(session: &SessionStore) {
    let snapshot = session.get();
    let state = match snapshot.status {
        SessionStatus::Authenticated => "signed in",
        SessionStatus::Refreshing => "refreshing",
        SessionStatus::Unauthenticated => "signed out",
    };
    println!("Session: {}", state);
    println!(
        "Access token: {}",
        if snapshot.credentials.access_token.is_some() { "present" } else { "none" }
    );
    println!(
        "Refresh token: {}",
        if snapshot.credentials.refresh_token.is_some() { "present" } else { "none" }
    );
}

/// Fire `count` parallel GETs; with an expired token they share one refresh
async fn burst(client: &ApiClient, path: &str, count: usize) -> Result<()> {
    let requests = (0..count).map(|_| client.send(RequestDescriptor::get(path)));
    let results = join_all(requests).await;

    let mut failures = 0;
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(response) => println!("#{:<3} {}", i, response.status),
            Err(e) => {
                failures += 1;
                println!("#{:<3} error: {}", i, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} requests failed", failures, count);
    }
    Ok(())
}
