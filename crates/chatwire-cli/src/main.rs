//! Chatwire CLI - line-based chat over a streaming WebSocket session.
//!
//! This is the entry point for the `chatwire` binary. Type a message and
//! press enter to send it; `/reconnect` and `/quit` are handled locally.

mod render;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chatwire_auth::{ApiClient, AuthConfig, StaticTokenProvider, TokenProvider};
use chatwire_client::{ClientConfig, SessionController};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use render::{describe_status, Transcript};

/// Chatwire CLI - chat with a streaming assistant from the terminal.
#[derive(Parser, Debug)]
#[command(name = "chatwire")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint. Overrides the config file.
    #[arg(long, env = "CHATWIRE_WS_URL")]
    ws_url: Option<String>,

    /// REST API base URL, used for email/password login.
    #[arg(long, env = "CHATWIRE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Socket token. Skips the login flow.
    #[arg(long, env = "CHATWIRE_TOKEN")]
    token: Option<String>,

    /// Login email.
    #[arg(long, env = "CHATWIRE_EMAIL")]
    email: Option<String>,

    /// Login password.
    #[arg(long, env = "CHATWIRE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Sender name attached to messages. Defaults to the login email.
    #[arg(long, env = "CHATWIRE_SENDER")]
    sender: Option<String>,

    /// JSON file with session settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "chatwire=debug,chatwire_client=debug,chatwire_auth=debug,warn"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &args.ws_url {
        config.url.clone_from(url);
    }

    let (tokens, login_email) = token_provider(&args).await?;
    if let Some(sender) = args.sender.clone().or(login_email) {
        config.sender = sender;
    }

    let session = SessionController::new(config, tokens).context("Failed to create session")?;
    session.start();

    let printer = tokio::spawn(print_transcript(session.clone()));
    let status = tokio::spawn(print_status(session.clone()));

    let result = run_input_loop(&session).await;

    session.shutdown().await;
    printer.abort();
    status.abort();

    result
}

/// Pick the token source: a fixed token, or a logged-in API session.
async fn token_provider(args: &Args) -> anyhow::Result<(Arc<dyn TokenProvider>, Option<String>)> {
    if let Some(token) = &args.token {
        let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new(token.clone()));
        return Ok((tokens, None));
    }

    let (Some(email), Some(password)) = (&args.email, &args.password) else {
        bail!("Provide --token, or --email and --password to log in");
    };

    let client = ApiClient::new(AuthConfig {
        base_url: args.api_url.clone(),
        ..AuthConfig::default()
    })?;
    let user = client.login(email, password).await.context("Login failed")?;

    let tokens: Arc<dyn TokenProvider> = Arc::new(client);
    Ok((tokens, Some(user.email)))
}

/// Read lines from stdin until EOF or `/quit`.
async fn run_input_loop(session: &SessionController) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/reconnect" => session.reconnect().await,
            text => {
                if !session.submit(text) {
                    eprintln!("[not connected, message not sent]");
                }
            }
        }
    }
    Ok(())
}

async fn print_transcript(session: SessionController) {
    let mut messages = session.watch_messages();
    let mut transcript = Transcript::default();

    loop {
        let snapshot = messages.borrow_and_update().clone();
        {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = transcript.render(&snapshot, &mut stdout) {
                tracing::warn!(error = %e, "Failed to write transcript");
            }
        }

        if messages.changed().await.is_err() {
            break;
        }
    }
}

async fn print_status(session: SessionController) {
    let mut status = session.watch_status();
    let mut previous = status.borrow_and_update().clone();

    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        if let Some(line) = describe_status(&previous, &current) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{line}");
        }
        previous = current;
    }
}
