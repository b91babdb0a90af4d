//! oidc-account -- OpenID Connect account helper.
//!
//! Entry point for the command-line tool:
//!   - Configuration loading
//!   - Logging setup
//!   - Interactive authorization from the terminal
//!   - Token lookup and guarded API calls for stored accounts

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use oidc_account::config::{ClientConfig, Config};
use oidc_account::oidc::{build_authorization_url, is_redirect};
use oidc_account::{
    AuthToken, AuthorizationOutcome, AuthorizationRequest, AuthorizationUi, Authenticator,
    OidcError, TokenKind,
};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

enum Command {
    Url,
    Login,
    Token { account: String, kind: TokenKind },
    Get { account: String, url: String },
}

struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    fail("--config requires a path argument");
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("oidc-account {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other if other.starts_with('-') => fail(&format!("Unknown argument: {other}")),
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("url") => Command::Url,
        Some("login") => Command::Login,
        Some("token") => {
            let Some(account) = positional.next() else {
                fail("token requires an ACCOUNT argument");
            };
            let kind = match positional.next() {
                Some(k) => k.parse().unwrap_or_else(|e: String| fail(&e)),
                None => TokenKind::Id,
            };
            Command::Token { account, kind }
        }
        Some("get") => match (positional.next(), positional.next()) {
            (Some(account), Some(url)) => Command::Get { account, url },
            _ => fail("get requires ACCOUNT and URL arguments"),
        },
        Some(other) => fail(&format!("Unknown command: {other}")),
        None => fail("No command given"),
    };

    CliArgs {
        config_path,
        command,
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    eprintln!("Run with --help for usage information.");
    std::process::exit(1);
}

fn print_usage() {
    println!(
        "\
oidc-account {version} -- OpenID Connect account helper

USAGE:
    oidc-account [OPTIONS] <COMMAND>

COMMANDS:
    url                          Print the authorization URL for the configured flow
    login                        Authorize interactively and store the account's tokens
    token <ACCOUNT> [KIND]       Print a token (id, access, refresh) [default: id]
    get <ACCOUNT> <URL>          GET a JSON resource with the account's ID token

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: oidc-account.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    OIDC_ACCOUNT_CONFIG    Alternative to --config flag
    OIDC_*                 Override individual settings (e.g. OIDC_CLIENT_ID)
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Terminal authorization
// ---------------------------------------------------------------------------

/// Prints the authorization URL and reads the redirect URI from stdin.
/// An empty line cancels.
struct TerminalUi {
    client: ClientConfig,
}

#[async_trait]
impl AuthorizationUi for TerminalUi {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, OidcError> {
        eprintln!("Open this URL in a browser and sign in:\n\n    {}\n", request.url);
        eprintln!(
            "Then paste the address you were redirected to ({}...), or an empty line to cancel:",
            self.client.redirect_uri
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| OidcError::Transport(format!("Failed to read stdin: {e}")))?;
            let Some(line) = line.map(|l| l.trim().to_string()) else {
                return Ok(AuthorizationOutcome::Cancelled);
            };
            if line.is_empty() {
                return Ok(AuthorizationOutcome::Cancelled);
            }
            if is_redirect(&self.client, &line) {
                return Ok(AuthorizationOutcome::Redirected(line));
            }
            eprintln!(
                "That is not the redirect URI ({}); try again:",
                self.client.redirect_uri
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();

    // OIDC_ACCOUNT_CONFIG is the fallback when --config is absent
    let config_path = cli
        .config_path
        .or_else(|| std::env::var("OIDC_ACCOUNT_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("oidc-account.toml"));

    let config = Config::load(&config_path)?;
    init_tracing(&config);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        flow = %config.client.flow_type,
        "Starting oidc-account"
    );

    let result = run(&config, cli.command).await;
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(message) = e.user_message() {
                eprintln!("{message}");
            }
            std::process::exit(1);
        }
    }
}

async fn run(config: &Config, command: Command) -> Result<(), OidcError> {
    match command {
        Command::Url => {
            let url = build_authorization_url(&config.client, config.client.flow_type)?;
            println!("{url}");
        }
        Command::Login => {
            let authenticator = Authenticator::from_config(config)?;
            let ui = TerminalUi {
                client: config.client.clone(),
            };
            let handle = authenticator.authorize(&ui, None).await?;
            println!("{}", handle.name);
        }
        Command::Token { account, kind } => {
            let authenticator = Authenticator::from_config(config)?;
            match authenticator.get_auth_token(&account, kind).await? {
                AuthToken::Token(token) => println!("{token}"),
                AuthToken::ReauthorizationRequired(request) => {
                    eprintln!("Account '{account}' must be authorized again:");
                    println!("{}", request.url);
                    return Err(OidcError::ReauthorizationRequired { account });
                }
            }
        }
        Command::Get { account, url } => {
            let authenticator = Authenticator::from_config(config)?;
            let json = authenticator.get_json(&account, &url).await?;
            let pretty = serde_json::to_string_pretty(&json)
                .map_err(|e| OidcError::Transport(format!("Failed to render response: {e}")))?;
            println!("{pretty}");
        }
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("oidc_account={level},warn"))
    });

    // stdout carries tokens and JSON bodies; logs go to stderr
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
