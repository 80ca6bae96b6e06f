//! jmap-session -- command-line front end for the authenticated JMAP session.
//!
//! Wires together configuration loading, logging and a [`Session`], then runs
//! one command:
//!   - `login`   print the authorization URL, read the callback URL, complete
//!   - `status`  show the authentication state
//!   - `session` print the JMAP session resource
//!   - `echo`    send `Core/echo` through the refresh-and-retry invoker
//!   - `logout`  clear stored credentials

use std::path::PathBuf;

use anyhow::{Context, bail};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jmap_session::Session;
use jmap_session::config::{Config, StorageBackend};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

enum Command {
    Login,
    Status,
    Session,
    Echo(String),
    Logout,
}

struct CliArgs {
    config_path: PathBuf,
    command: Command,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("jmap-session.toml");
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("jmap-session {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "login" if command.is_none() => command = Some(Command::Login),
            "status" if command.is_none() => command = Some(Command::Status),
            "session" if command.is_none() => command = Some(Command::Session),
            "logout" if command.is_none() => command = Some(Command::Logout),
            "echo" if command.is_none() => {
                let payload = args.next().unwrap_or_else(|| "{}".to_string());
                command = Some(Command::Echo(payload));
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    let Some(command) = command else {
        print_usage();
        std::process::exit(1);
    };

    CliArgs {
        config_path,
        command,
    }
}

fn print_usage() {
    println!(
        "\
jmap-session {version} -- Authenticated JMAP session client

USAGE:
    jmap-session [OPTIONS] <COMMAND>

COMMANDS:
    login                  Authorize with the OAuth server (PKCE)
    status                 Show the authentication state
    session                Print the JMAP session resource
    echo [JSON]            Send Core/echo with the given arguments
    logout                 Clear stored credentials

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: jmap-session.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    JMAP_SESSION_CONFIG    Alternative to --config flag
    JMAP_SESSION_*         Override individual settings

NOTES:
    The default storage backend is \"memory\", which forgets credentials when
    the process exits. Set storage.backend = \"file\" (or \"keyring\") so that
    status, session and echo can reuse a login from an earlier invocation.
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();

    let config_path = std::env::var("JMAP_SESSION_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting jmap-session"
    );

    let session = Session::new(config)?;
    let result = run(&session, cli.command).await;
    session.close().await;
    result
}

async fn run(session: &Session, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login => login(session).await,
        Command::Status => {
            let auth = session.auth();
            println!("account:       {}", auth.account());
            println!("state:         {}", auth.state().await);
            if let Some(expires_at) = auth.expires_at().await {
                println!("expires at:    {}", expires_at.to_rfc3339());
            }
            println!("expired:       {}", auth.is_expired().await);
            println!("refresh token: {}", auth.has_refresh_token().await);
            Ok(())
        }
        Command::Session => {
            let cancel = CancellationToken::new();
            let client = session.client().clone();
            let resource = session
                .invoke(&cancel, || {
                    let client = client.clone();
                    async move { client.session().await }
                })
                .await?;
            println!("username: {}", resource.username);
            println!("api url:  {}", resource.api_url);
            println!("state:    {}", resource.state);
            let mut capabilities: Vec<_> = resource.capabilities.keys().collect();
            capabilities.sort();
            for capability in capabilities {
                let account = resource.primary_account_id(capability).unwrap_or("-");
                println!("  {capability}  (primary account: {account})");
            }
            Ok(())
        }
        Command::Echo(payload) => {
            let arguments: Value =
                serde_json::from_str(&payload).context("echo payload is not valid JSON")?;
            if !arguments.is_object() {
                bail!("echo payload must be a JSON object");
            }
            let cancel = CancellationToken::new();
            let client = session.client().clone();
            let echoed = session
                .invoke(&cancel, || {
                    let client = client.clone();
                    let arguments = arguments.clone();
                    async move { client.call_raw("Core/echo", arguments).await }
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&echoed)?);
            Ok(())
        }
        Command::Logout => {
            session.auth().logout().await?;
            println!("Logged out.");
            Ok(())
        }
    }
}

async fn login(session: &Session) -> anyhow::Result<()> {
    let request = session.auth().login().await?;
    println!("Open this URL in a browser and authorize access:\n\n  {}\n", request.url);
    println!("Then paste the full redirect URL here:");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read callback URL")?;
    let callback = line.trim();
    if callback.is_empty() {
        session.auth().abandon_login().await;
        bail!("no callback URL given");
    }

    session.auth().complete_login(callback).await?;
    println!("Logged in as account '{}'.", session.auth().account());
    if !persists_credentials(session.config()) {
        eprintln!(
            "warning: storage.backend is \"memory\"; these credentials are discarded on exit. \
             Set storage.backend = \"file\" to keep them."
        );
    }
    Ok(())
}

/// Whether credentials written by this process survive into the next one.
fn persists_credentials(config: &Config) -> bool {
    config.storage.backend != StorageBackend::Memory
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("jmap_session={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_usage_does_not_panic() {
        print_usage();
    }

    #[test]
    fn test_only_memory_backend_forgets_login() {
        let mut config = Config::default();
        assert!(!persists_credentials(&config));

        config.storage.backend = StorageBackend::File;
        assert!(persists_credentials(&config));
        config.storage.backend = StorageBackend::Keyring;
        assert!(persists_credentials(&config));
    }
}
