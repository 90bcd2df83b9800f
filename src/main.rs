//! msgraph - Microsoft Graph from the command line.
//!
//! Signs in with the selected OAuth2 flow, caches tokens in a JSON file, and
//! runs one Graph call per invocation.
//!
//! Exit codes:
//! - 0: success
//! - 1: runtime error (missing environment variable, sign-in failure, API error)
//! - 2: argument validation error (clap handles this automatically)

#![deny(clippy::all)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use msgraph_cli::auth::{Flow, OAuth2Client, TerminalInteraction, TokenAcquirer};
use msgraph_cli::cache::TokenCache;
use msgraph_cli::config::Config;
use msgraph_cli::credentials::Credentials;
use msgraph_cli::error::hint_for;
use msgraph_cli::graph::{GraphClient, UploadTarget};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// OAuth2 flow used to sign in.
    #[arg(long, value_enum, default_value_t = Flow::DeviceCode)]
    flow: Flow,

    /// Scope to request; repeat for several. Defaults depend on the flow
    /// (`https://graph.microsoft.com/.default` for app-only).
    #[arg(long = "scope")]
    scopes: Vec<String>,

    /// Token cache file. Defaults to `api_token_access.json` in the working
    /// directory, or TOKEN_CACHE_PATH.
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Neither read nor write the token cache.
    #[arg(long, conflicts_with = "cache")]
    no_cache: bool,

    /// Print sign-in URLs instead of opening a browser.
    #[arg(long)]
    no_browser: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print an access token.
    Token,
    /// Show the signed-in user's profile.
    Me,
    /// List the items at the root of a drive.
    Ls {
        /// Drive to list instead of the signed-in user's OneDrive.
        #[arg(long)]
        drive_id: Option<String>,
    },
    /// Upload a local file to OneDrive.
    Upload {
        /// Local file; only its base name is used remotely.
        file: PathBuf,
        /// Drive item id of the destination folder. Defaults to the drive root.
        #[arg(long)]
        folder_id: Option<String>,
    },
    /// Send a plain-text email as the signed-in user.
    SendMail {
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
    },
    /// List users in the directory.
    Users,
}

fn main() -> ExitCode {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging.level);
    debug!("Configuration loaded");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            if let Some(hint) = e.chain().find_map(hint_for) {
                eprintln!("\n{}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing/logging. Logs go to stderr; stdout carries results.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    // Fails before any network call when a required variable is missing
    let credentials = Credentials::from_env(cli.flow, &config.oauth.default_tenant)
        .context("Failed to load credentials")?;

    let scopes = if !cli.scopes.is_empty() {
        cli.scopes.clone()
    } else if cli.flow.is_delegated() {
        config.scopes.delegated.clone()
    } else {
        config.scopes.app_only.clone()
    };

    let cache_path = (!cli.no_cache)
        .then(|| cli.cache.clone().unwrap_or_else(|| config.cache.path.clone()));
    let mut cache = match &cache_path {
        Some(path) => TokenCache::load(path),
        None => TokenCache::new(),
    };

    let oauth_client = OAuth2Client::new(&credentials, &config.oauth)
        .context("Failed to create OAuth client")?;
    let interaction = TerminalInteraction {
        no_browser: cli.no_browser,
    };
    let acquirer = TokenAcquirer::new(oauth_client, cli.flow, interaction)
        .with_refresh_buffer(config.cache.refresh_before_expiry_seconds);

    info!("Acquiring token with the {} flow", cli.flow.name());
    let token = acquirer
        .acquire(&scopes, &mut cache)
        .await
        .context("Failed to obtain access token")?;

    if let Some(path) = &cache_path {
        if cache.has_state_changed() {
            cache.save(path).context("Failed to save token cache")?;
        } else {
            debug!("Token cache unchanged");
        }
    }

    let graph =
        GraphClient::new(&config.api.graph_base_url).context("Failed to create Graph client")?;
    let access_token = token.as_str();

    match cli.command {
        Command::Token => {
            println!("{}", access_token);
        }
        Command::Me => {
            let profile = graph
                .get_user_profile(access_token)
                .await
                .context("Failed to fetch user profile")?;
            print_json(&profile)?;
        }
        Command::Ls { drive_id } => {
            let items = graph
                .list_drive_items(access_token, drive_id.as_deref())
                .await
                .context("Failed to list drive items")?;
            for item in items {
                if item.is_folder() {
                    println!("{}/", item.name);
                } else {
                    println!("{}", item.name);
                }
            }
        }
        Command::Upload { file, folder_id } => {
            let target = match folder_id {
                Some(id) => UploadTarget::Item(id),
                None => UploadTarget::Root,
            };
            let item = graph
                .upload_file(access_token, &file, &target)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            print_json(&item)?;
        }
        Command::SendMail { to, subject, body } => {
            let result = graph
                .send_email(access_token, &to, &subject, &body)
                .await
                .context("Failed to send email")?;
            print_json(&result)?;
        }
        Command::Users => {
            let users = graph
                .list_users(access_token)
                .await
                .context("Failed to list users")?;
            print_json(&users)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flow_is_device_code() {
        let cli = Cli::try_parse_from(["msgraph", "me"]).expect("should parse with defaults");
        assert_eq!(cli.flow, Flow::DeviceCode);
        assert!(cli.scopes.is_empty());
        assert!(matches!(cli.command, Command::Me));
    }

    #[test]
    fn flow_and_repeated_scopes_parse() {
        let cli = Cli::try_parse_from([
            "msgraph",
            "--flow",
            "app-only",
            "--scope",
            "https://graph.microsoft.com/.default",
            "--scope",
            "User.Read.All",
            "users",
        ])
        .expect("should parse app-only with scopes");
        assert_eq!(cli.flow, Flow::AppOnly);
        assert_eq!(cli.scopes.len(), 2);
        assert!(matches!(cli.command, Command::Users));
    }

    #[test]
    fn auth_code_flow_value_parses() {
        let cli = Cli::try_parse_from(["msgraph", "--flow", "auth-code", "token"]).unwrap();
        assert_eq!(cli.flow, Flow::AuthCode);
    }

    #[test]
    fn upload_with_folder_id() {
        let cli = Cli::try_parse_from([
            "msgraph",
            "upload",
            "/tmp/qr_code.jpg",
            "--folder-id",
            "8E3E5A1607340544%21282282",
        ])
        .unwrap();
        match cli.command {
            Command::Upload { file, folder_id } => {
                assert_eq!(file, PathBuf::from("/tmp/qr_code.jpg"));
                assert_eq!(folder_id.as_deref(), Some("8E3E5A1607340544%21282282"));
            }
            _ => panic!("expected upload command"),
        }
    }

    #[test]
    fn send_mail_requires_all_fields() {
        let result = Cli::try_parse_from(["msgraph", "send-mail", "--to", "a@example.com"]);
        assert!(result.is_err(), "subject and body are required");
    }

    #[test]
    fn cache_and_no_cache_conflict() {
        let result = Cli::try_parse_from(["msgraph", "--cache", "x.json", "--no-cache", "me"]);
        assert!(result.is_err());
    }

    #[test]
    fn missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["msgraph"]).is_err());
    }
}
