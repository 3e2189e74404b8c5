//! Warden - LDAP federation checker
//!
//! Terminal front end for the Warden identity core: validates
//! configuration, probes directory servers and exercises the three
//! capabilities (login, groups, whois) without a surrounding platform.

use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use warden_core::{AuthenticationContext, Settings};
use warden_ldap::{Realm, SettingsManager, DEFAULT_SERVER_KEY};

#[derive(Parser)]
#[command(name = "warden")]
#[command(author = "Warden Team")]
#[command(version = warden_core::VERSION)]
#[command(about = "LDAP federation checker for the Warden identity stack", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Override a single property, KEY=VALUE; repeatable
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    set: Vec<String>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the resolved topology
    Check,

    /// Connect to every configured server and read its root DSE
    Probe {
        /// Fail on an unclean connection close as well
        #[arg(long)]
        strict: bool,
    },

    /// Verify a username and password against the federation
    Login {
        #[arg(short, long)]
        username: String,

        /// Password; prefer the environment variable in scripts
        #[arg(short, long, env = "WARDEN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// List the groups holding a user on one server
    Groups {
        #[arg(short, long)]
        username: String,

        /// Server key to resolve against
        #[arg(short, long, default_value = DEFAULT_SERVER_KEY)]
        server: String,
    },

    /// Look up a user's real name and email
    Whois {
        #[arg(short, long)]
        username: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    let settings = load_settings(&cli)?;

    match &cli.command {
        Commands::Check => run_check(settings, cli.json).await,
        Commands::Probe { strict } => run_probe(settings, *strict, cli.json).await,
        Commands::Login { username, password } => {
            run_login(settings, username, password, cli.json).await
        }
        Commands::Groups { username, server } => {
            run_groups(settings, server, username, cli.json).await
        }
        Commands::Whois { username } => run_whois(settings, username, cli.json).await,
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("cannot load configuration from {path}"))?,
        None => Settings::new(),
    };
    for pair in &cli.set {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("--set expects KEY=VALUE, got '{pair}'");
        };
        settings.set(key.trim(), value);
    }
    Ok(settings)
}

/// Start the realm, tolerating unreachable servers. Per-call diagnostics
/// are better than refusing to run at all; a configuration error still
/// aborts since there is nothing to run against.
async fn start_realm(settings: Settings) -> anyhow::Result<Realm> {
    let mut realm = Realm::new(settings);
    if let Err(e) = realm.start().await {
        if e.is_connection() {
            warn!(error = %e, "continuing degraded, a server failed its probe");
        } else {
            return Err(e.into());
        }
    }
    Ok(realm)
}

async fn run_check(settings: Settings, json: bool) -> anyhow::Result<ExitCode> {
    let manager = SettingsManager::new(settings);
    let servers = manager.topology().await?;
    if json {
        let report: Vec<_> = servers
            .iter()
            .map(|server| {
                serde_json::json!({
                    "key": server.key,
                    "urls": server.factory.descriptor().urls,
                    "authentication": server.factory.descriptor().auth_method.to_string(),
                    "userMapping": server.user_mapping.to_string(),
                    "groupMapping": server.group_mapping.as_ref().map(ToString::to_string),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for server in &servers {
            println!("{}", server.factory.descriptor());
            println!("  {}", server.user_mapping);
            match &server.group_mapping {
                Some(mapping) => println!("  {mapping}"),
                None => println!("  group resolution disabled"),
            }
        }
        println!("configuration OK, {} server(s)", servers.len());
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_probe(settings: Settings, strict: bool, json: bool) -> anyhow::Result<ExitCode> {
    let manager = SettingsManager::new(settings);
    let servers = manager.topology().await?;
    let mut report = Vec::new();
    let mut failures = 0usize;
    for server in &servers {
        match server.factory.server_info(strict).await {
            Ok(info) => {
                if json {
                    report.push(serde_json::json!({
                        "key": server.key,
                        "ok": true,
                        "info": info,
                    }));
                } else {
                    let vendor = match (&info.vendor_name, &info.vendor_version) {
                        (Some(name), Some(version)) => format!("{name} {version}"),
                        (Some(name), None) => name.clone(),
                        _ => "unknown vendor".to_string(),
                    };
                    println!("{}: ok, {} at {}", server.key, vendor, info.url);
                    for context in &info.naming_contexts {
                        println!("  naming context {context}");
                    }
                }
            }
            Err(e) => {
                failures += 1;
                if json {
                    report.push(serde_json::json!({
                        "key": server.key,
                        "ok": false,
                        "error": e.to_string(),
                    }));
                } else {
                    println!("{}: FAILED, {e}", server.key);
                }
            }
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_login(
    settings: Settings,
    username: &str,
    password: &str,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let realm = start_realm(settings).await?;
    let authenticator = realm.authenticator().context("realm holds no topology")?;
    let context = AuthenticationContext::new(username, Some(password.to_string()));
    let result = authenticator.authenticate(&context).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.is_success() {
        match &result.server_key {
            Some(key) => println!("authenticated '{username}' against server '{key}'"),
            None => println!("authenticated '{username}'"),
        }
    } else {
        println!("authentication failed for '{username}'");
    }
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_groups(
    settings: Settings,
    server: &str,
    username: &str,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let realm = start_realm(settings).await?;
    let provider = realm.groups_provider().context("realm holds no topology")?;
    let groups = provider.groups(server, username).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else if groups.is_empty() {
        println!("no groups for '{username}' on server '{server}'");
    } else {
        for group in &groups {
            println!("{group}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_whois(settings: Settings, username: &str, json: bool) -> anyhow::Result<ExitCode> {
    let realm = start_realm(settings).await?;
    let provider = realm.users_provider().context("realm holds no topology")?;
    match provider.user_details(username).await? {
        Some(details) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                println!("realName: {}", details.real_name);
                println!("email: {}", details.email);
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            if json {
                println!("null");
            } else {
                println!("unknown user '{username}'");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
