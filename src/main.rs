//! Operator CLI (`geo-gate`).
//!
//! This is a thin wrapper around the `geo_gate` library that handles:
//! - Command-line argument parsing
//! - Environment variable loading (.env file)
//! - Logger initialization
//! - User-facing output formatting
//!
//! Settings live in the SQLite store; `--settings` imports a JSON settings
//! file into the store before the command runs.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use geo_gate::config::ProviderSettings;
use geo_gate::initialization::{init_client, init_logger_with};
use geo_gate::pipeline::is_refusal;

use geo_gate::{
    AntiBypassGuard, DatabaseRefreshScheduler, FilterRegistry, HmacNonceAuthority, Hook,
    LogFormat, LogLevel, Lookup, ProviderRegistry, RequestContext, Settings, SqliteStore, Store,
    ValidationService, Verdict,
};

/// Geolocation request gate: lookups, dry-run checks and database maintenance.
#[derive(Debug, Parser)]
#[command(name = "geo-gate", version, about)]
struct Cli {
    /// SQLite store holding settings, cache, statistics and logs
    #[arg(long, default_value = "./geo_gate.db", global = true)]
    store: PathBuf,

    /// JSON settings file to import into the store before running
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the full location of an address
    Lookup {
        ip: IpAddr,
        /// Provider to ask (repeatable); defaults to the configured chain
        #[arg(long = "provider")]
        providers: Vec<String>,
    },
    /// Dry-run a validation for an address
    Check {
        ip: IpAddr,
        /// Hook to validate for (comment, xmlrpc, login, admin, direct)
        #[arg(long, default_value = "login")]
        hook: Hook,
        /// Request header as name=value (repeatable)
        #[arg(long = "header", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,
        /// Request method
        #[arg(long, default_value = "GET")]
        method: String,
        /// Request URI
        #[arg(long, default_value = "/")]
        uri: String,
        /// Show the block response that would be sent
        #[arg(long)]
        enforce: bool,
        /// Document root direct requests are resolved against
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Refresh the local geolocation databases
    Refresh {
        /// Ignore the schedule
        #[arg(long)]
        force: bool,
    },
    /// Print validation statistics
    Stats {
        /// Reset the counters after printing
        #[arg(long)]
        clear: bool,
    },
    /// Print recent validation log entries
    Logs {
        /// Only entries for this hook
        #[arg(long)]
        hook: Option<Hook>,
        /// Maximum number of entries
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Drop every cached validation result and failure counter
    ClearCache,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected name=value, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env may carry GEO_GATE_NONCE_SECRET and provider keys
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logger_with(cli.log_level.into(), cli.log_format)
        .context("Failed to initialize logger")?;

    if let Err(e) = run(cli).await {
        eprintln!("geo-gate error: {:#}", e);
        process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&cli.store)
            .await
            .with_context(|| format!("Failed to open store {}", cli.store.display()))?,
    );
    if let Some(path) = &cli.settings {
        import_settings(store.as_ref(), path).await?;
    }
    let settings = Settings::load(store.as_ref())
        .await
        .context("Failed to load settings")?;
    let client = init_client(&settings, None).context("Failed to build HTTP client")?;

    match cli.command {
        Command::Lookup { ip, providers } => {
            let service = service(store, client);
            let providers: Vec<ProviderSettings> =
                providers.into_iter().map(ProviderSettings::enabled).collect();
            let record = service
                .lookup(ip, &providers, &settings, Lookup::Location)
                .await;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Check {
            ip,
            hook,
            headers,
            method,
            uri,
            enforce,
            root,
        } => {
            let guard = guard(service(store, client))?;
            let mut ctx = RequestContext::from_uri(ip, &method, &uri);
            for (name, value) in headers {
                ctx = ctx.with_header(&name, value);
            }
            let verdict = match hook {
                Hook::Comment => guard.validate_comment(&settings, &ctx).await,
                Hook::Xmlrpc => guard.validate_xmlrpc(&settings, &ctx).await,
                Hook::Login => guard.validate_login(&settings, &ctx).await,
                Hook::Admin => guard.validate_admin(&settings, &ctx).await,
                Hook::Direct => {
                    let access = guard.validate_direct(&settings, &ctx, &root).await;
                    if let Some(file) = &access.file {
                        println!("would run {}", file.display());
                    }
                    access.verdict
                }
            };
            match verdict {
                Verdict::Skipped => println!("{}: validation disabled", hook),
                Verdict::Redirect { location } => println!("redirect to {}", location),
                verdict => {
                    if let Some(record) = verdict.record() {
                        println!("{}", serde_json::to_string_pretty(record)?);
                    }
                    let result = verdict.result();
                    println!(
                        "{}: {}",
                        hook,
                        result.map(|r| r.to_string()).unwrap_or_else(|| "undecided".into())
                    );
                    match verdict.response() {
                        Some(response) if enforce => {
                            println!("would respond {}", response.status)
                        }
                        _ if is_refusal(result) => println!("would be refused"),
                        _ => {}
                    }
                }
            }
        }
        Command::Refresh { force } => {
            let scheduler = DatabaseRefreshScheduler::new(Arc::clone(&store), client);
            let Some(statuses) = scheduler.run_cycle(Utc::now(), force).await? else {
                bail!("a refresh is already running");
            };
            for status in statuses {
                println!("{:<5} {:<12} {}", status.family, status.outcome, status.message);
            }
        }
        Command::Stats { clear } => {
            let service = service(store, client);
            let stats = service.statistics().get().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            if clear {
                service.statistics().clear().await?;
                println!("Statistics cleared");
            }
        }
        Command::Logs { hook, limit } => {
            let service = service(store, client);
            for entry in service.logs().recent(hook, limit).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Command::ClearCache => {
            let service = service(store, client);
            let removed = service.cache().clear().await?;
            println!("Removed {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}

fn service(store: Arc<dyn Store>, client: reqwest::Client) -> ValidationService {
    ValidationService::new(store, ProviderRegistry::with_builtins(client), FilterRegistry::new())
}

/// Hook entry points over `service`, signing with the configured nonce secret.
fn guard(service: ValidationService) -> Result<AntiBypassGuard> {
    let nonces = HmacNonceAuthority::from_env().context("Failed to set up nonce signing")?;
    Ok(AntiBypassGuard::new(Arc::new(service), Arc::new(nonces)))
}

async fn import_settings(store: &dyn Store, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    let mut settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
    settings.validate()?;
    settings.version = geo_gate::config::SETTINGS_VERSION.to_string();
    settings.save(store).await?;
    log::info!("Imported settings from {}", path.display());
    Ok(())
}
