//! autoflow - command-line client for the autoflow API.
//!
//! Logs in, keeps the session alive between runs and issues authorized
//! requests through the session core.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use autoflow_core::config::API_URL_ENV;
use autoflow_core::{Config, SessionManager, SessionState};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: autoflow <command>

Commands:
  login [email]   Log in and store the session
  logout          End the session
  whoami          Show the signed-in user
  get <path>      Issue an authorized GET and print the response body

Environment:
  RUST_LOG            Log filter (default: warn)
  AUTOFLOW_API_URL    Override the API base URL";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login(Option<String>),
    Logout,
    WhoAmI,
    Get(String),
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        match args.first().map(String::as_str) {
            Some("login") => Ok(Command::Login(args.get(1).cloned())),
            Some("logout") => Ok(Command::Logout),
            Some("whoami") => Ok(Command::WhoAmI),
            Some("get") => args
                .get(1)
                .cloned()
                .map(Command::Get)
                .ok_or_else(|| anyhow::anyhow!("get requires a path")),
            Some("help") | Some("--help") | Some("-h") | None => Ok(Command::Help),
            Some(other) => Err(anyhow::anyhow!("Unknown command: {}", other)),
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
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
    match (input.is_empty(), last) {
        (true, Some(last)) => Ok(last.to_string()),
        _ => Ok(input.to_string()),
    }
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

async fn login(manager: &SessionManager, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    if email.is_empty() {
        return Err(anyhow::anyhow!("Email required"));
    }
    let password = prompt_password()?;

    let session = manager.login(&email, &password).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        error!(error = %e, "Failed to save config");
    }

    println!(
        "Logged in as {} (token valid for {} more minutes)",
        session.email,
        session.minutes_until_expiry(manager.coordinator().now())
    );
    Ok(())
}

async fn run(command: Command) -> Result<()> {
    let mut config = Config::load().context("Failed to load config")?;
    config.apply_env();
    info!(
        api = %config.api_base_url,
        overridden = std::env::var(API_URL_ENV).is_ok(),
        "Using API"
    );

    let manager = SessionManager::from_config(&config)?;
    let state = manager.initialize().await;
    info!(?state, "Session initialized");

    match command {
        Command::Login(email) => login(&manager, &mut config, email).await,
        Command::Logout => {
            manager.logout().await;
            println!("Logged out");
            Ok(())
        }
        Command::WhoAmI => {
            match manager.current_user() {
                Some(user) => println!("{} (id {})", user.email, user.subject_id),
                None => println!("Not logged in"),
            }
            Ok(())
        }
        Command::Get(path) => {
            if state != SessionState::Authenticated {
                return Err(anyhow::anyhow!("Not logged in - run `autoflow login` first"));
            }
            let response = manager.authorized_client().get(&path).await?;
            match serde_json::from_str::<serde_json::Value>(&response.body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.body),
            }
            if response.is_success() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("Request failed with status {}", response.status))
            }
        }
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
