//! tcrypto-keytool: manage the tcrypto key file
//!
//! Commands:
//!   show                     - list key versions (primary marked with *)
//!   count                    - print the number of key versions
//!   add [--force]            - generate a new primary key
//!   prune [--max-lifetime N] - drop inactive keys once they can no longer verify capsules
//!   config show             - display the active configuration

mod keytool;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;

use tcrypto_core::{LogConfig, TcryptoConfig};
use tcrypto_crypto::{KeyFile, OsRandom};

use keytool::AddOutcome;

#[derive(Parser, Debug)]
#[command(
    name = "tcrypto-keytool",
    version,
    about = "tcrypto key-file management",
    long_about = "tcrypto-keytool: add, list and prune the keys that sign and encrypt tcrypto capsules"
)]
struct Cli {
    /// Path to tcrypto.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "TCRYPTO_CONFIG",
        default_value = "/etc/tcrypto/config.toml"
    )]
    config: PathBuf,

    /// Key file (overrides keystore.keyfile)
    #[arg(long, short = 'k', env = "TCRYPTO_KEYFILE")]
    keyfile: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error; default: log.level)
    #[arg(long, env = "TCRYPTO_LOG")]
    log: Option<String>,

    /// Log format (json, text; default: log.format)
    #[arg(long, env = "TCRYPTO_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List key versions and their age
    Show,

    /// Print the number of key versions
    Count,

    /// Generate a new key pair and make it primary
    Add {
        /// Rotate even if the primary key is younger than keystore.min_rotation_interval_secs
        #[arg(long)]
        force: bool,
    },

    /// Remove non-primary keys once the newest key is older than the key lifetime
    Prune {
        /// Key lifetime in seconds (default: keystore.key_max_lifetime_secs)
        #[arg(long)]
        max_lifetime: Option<u64>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Warnings raised while loading go to stderr before the configured
    // subscriber exists.
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || TcryptoConfig::load(&cli.config))
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let (level, format) = resolve_logging(cli.log, cli.log_format, &config.log)?;
    init_logging(&level, &format);

    let keyfile = cli
        .keyfile
        .as_deref()
        .unwrap_or(config.keystore.keyfile.as_path());
    let keyfile = keytool::expand_tilde(keyfile);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        keyfile = %keyfile.display(),
        "tcrypto-keytool starting"
    );

    match cli.command {
        Commands::Show => cmd_show(&keyfile),
        Commands::Count => cmd_count(&keyfile),
        Commands::Add { force } => cmd_add(&config, &keyfile, force),
        Commands::Prune { max_lifetime } => cmd_prune(&config, &keyfile, max_lifetime),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

/// Command-line flags win over the `[log]` table.
fn resolve_logging(
    level: Option<String>,
    format: Option<LogFormat>,
    log: &LogConfig,
) -> Result<(String, LogFormat)> {
    let level = level.unwrap_or_else(|| log.level.clone());
    let format = match format {
        Some(format) => format,
        None => LogFormat::from_str(&log.format, true)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("log.format {:?}", log.format))?,
    };
    Ok((level, format))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn cmd_show(keyfile: &Path) -> Result<()> {
    let file = KeyFile::load(keyfile)
        .with_context(|| format!("reading key file: {}", keyfile.display()))?;
    print!("{}", keytool::show(&file, keytool::now()));
    Ok(())
}

fn cmd_count(keyfile: &Path) -> Result<()> {
    let file = KeyFile::load_or_new(keyfile)
        .with_context(|| format!("reading key file: {}", keyfile.display()))?;
    println!("{}", file.ring().len());
    Ok(())
}

fn cmd_add(config: &TcryptoConfig, keyfile: &Path, force: bool) -> Result<()> {
    match keytool::add(keyfile, &config.keystore, force, &OsRandom, keytool::now())? {
        AddOutcome::Added(version) => {
            println!("added primary key {version}");
            Ok(())
        }
        AddOutcome::TooSoon { age } => anyhow::bail!(
            "primary key is only {age}s old (minimum rotation interval {}s); use --force to rotate anyway",
            config.keystore.min_rotation_interval_secs
        ),
    }
}

fn cmd_prune(config: &TcryptoConfig, keyfile: &Path, max_lifetime: Option<u64>) -> Result<()> {
    let removed = keytool::prune(keyfile, &config.keystore, max_lifetime, keytool::now())
        .with_context(|| format!("pruning key file: {}", keyfile.display()))?;
    println!("removed {removed} inactive key(s)");
    Ok(())
}

fn cmd_config_show(config: &TcryptoConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
