//! techblog - command-line client for the techblog platform.
//!
//! Each invocation restores the stored session, runs one command, and
//! reports a forced logout if the backend rejected the session meanwhile.

mod cli;
mod commands;

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use techblog_core::config::CredentialBackendKind;
use techblog_core::{ApiClient, ApiError, Config, LogoutRedirect, Navigator, SessionManager};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=techblog_core=debug).
fn init_tracing(log_file: Option<&Path>) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (writer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(io::stderr()),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(log_file.is_none()))
        .with(filter)
        .init();
    Ok(guard)
}

/// Sends the user back to `techblog login` when the session is force-ended.
#[derive(Default)]
struct TerminalNavigator {
    notified: AtomicBool,
}

impl Navigator for TerminalNavigator {
    fn redirect_to_login(&self) {
        if !self.notified.swap(true, Ordering::SeqCst) {
            eprintln!("Session expired. Please log in again with `techblog login`.");
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let _guard = match init_tracing(cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ApiError>() {
                // Any forced logout was already reported by the navigator
                Some(ApiError::Unauthorized) => eprintln!("error: this action requires login"),
                Some(api_error) => eprintln!("error: {}", api_error.user_message()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

/// Each invocation is a new process, so only durable backends make sense.
fn check_credential_backend(config: &Config) -> Result<()> {
    if config.credential_backend == CredentialBackendKind::Memory {
        bail!(
            "credential_backend \"memory\" keeps no session between runs; \
             set it to \"file\" or \"keyring\" in the config file"
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    check_credential_backend(&config)?;
    info!(api = %config.api_base_url, "techblog starting");

    let session = Arc::new(SessionManager::new(config.credential_store()?));
    let cache = Arc::new(config.query_cache());
    let client = ApiClient::from_config(&config, Arc::clone(&session), cache)?;

    let redirect = Arc::new(LogoutRedirect::new(Arc::new(TerminalNavigator::default())));
    let listener = redirect.spawn(session.subscribe());
    debug!(status = ?session.status(), "Session restored");

    let result = commands::run(cli.command, &client, &mut config).await;

    listener.shutdown().await;
    result
}
