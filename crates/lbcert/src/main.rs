//! lbcert - Main entry point
//!
//! Rotates a load balancer certificate from a certbot bundle.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lbcert::{
    archive, ControlPlane, FsObjectStore, HttpControlPlane, HttpObjectStore, ObjectStore,
    ResolvedCertificate, RotationError, RotationReport, Rotator,
};
use lbcert_config::RotationConfig;

/// Exit code when the bundle has not been published yet
const EXIT_ARCHIVE_NOT_FOUND: u8 = 2;

/// lbcert - load balancer certificate rotation
#[derive(Parser, Debug)]
#[command(name = "lbcert")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML); environment variables are used otherwise
    #[arg(short = 'c', long = "config", env = "LBCERT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rotate the certificate (default)
    Run(RunArgs),
    /// Resolve a local bundle and print the certificate it would install
    Inspect {
        /// Bundle file (tar.gz)
        #[arg(long = "archive")]
        archive: PathBuf,

        /// Domain to resolve
        #[arg(long = "domain")]
        domain: String,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Override the load balancer id
    #[arg(long = "load-balancer")]
    load_balancer_id: Option<String>,

    /// Override the domain
    #[arg(long = "domain")]
    domain: Option<String>,

    /// Read bundles from a local directory laid out as {ns}/{bucket}/{object}
    #[arg(long = "archive-dir")]
    archive_dir: Option<PathBuf>,

    /// Abort the run after this many seconds
    #[arg(long = "deadline-secs")]
    deadline_secs: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let result = match cli.command {
        Some(Commands::Inspect { archive, domain }) => inspect(&archive, &domain),
        Some(Commands::Run(args)) => run(cli.config, args),
        None => run(cli.config, RunArgs::default()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let not_published = e
                .downcast_ref::<RotationError>()
                .is_some_and(RotationError::is_archive_not_found);
            if not_published {
                ExitCode::from(EXIT_ARCHIVE_NOT_FOUND)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load configuration from the file if one is given, else from the
/// environment; CLI flags then override the loaded values
fn load_config(path: Option<PathBuf>, args: RunArgs) -> Result<RotationConfig> {
    let mut config = match &path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            RotationConfig::from_file(path).context("Failed to load configuration file")?
        }
        None => RotationConfig::from_env().context("Failed to load configuration from environment")?,
    };

    if let Some(id) = args.load_balancer_id {
        config.load_balancer_id = id;
    }
    if let Some(domain) = args.domain {
        config.domain = domain;
    }
    if let Some(dir) = args.archive_dir {
        config.archive_dir = Some(dir);
    }
    if let Some(secs) = args.deadline_secs {
        config.deadline_secs = Some(secs);
    }

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn object_store(config: &RotationConfig) -> Result<Arc<dyn ObjectStore>> {
    if let Some(dir) = &config.archive_dir {
        let store = FsObjectStore::new(dir.clone());
        info!("Reading bundles from: {}", store.root().display());
        return Ok(Arc::new(store));
    }

    let Some(endpoint) = &config.object_storage_endpoint else {
        bail!("object_storage_endpoint or archive_dir must be configured");
    };
    let store = HttpObjectStore::new(endpoint, config.auth_token.clone())
        .context("Invalid object storage endpoint")?;
    Ok(Arc::new(store))
}

fn control_plane(config: &RotationConfig) -> Result<Arc<dyn ControlPlane>> {
    let Some(endpoint) = &config.control_plane_endpoint else {
        bail!("control_plane_endpoint must be configured");
    };
    let control = HttpControlPlane::new(endpoint, config.auth_token.clone())
        .context("Invalid control plane endpoint")?;
    Ok(Arc::new(control))
}

/// Run one rotation
fn run(config_path: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let config = load_config(config_path, args)?;
    let store = object_store(&config)?;
    let control = control_plane(&config)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));

        let rotator = Rotator::new(config, store, control).with_cancellation(cancel);
        let report = rotator.run().await.context("Certificate rotation failed")?;

        match report {
            RotationReport::AlreadyInstalled { name } => {
                info!(name = %name, "Certificate already installed, nothing to do");
            }
            RotationReport::Installed { name, listeners } => {
                info!(name = %name, listeners = ?listeners, "Certificate installed");
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received interrupt, cancelling rotation");
                    token.cancel();
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received interrupt, cancelling rotation"),
            _ = term.recv() => info!("Received SIGTERM, cancelling rotation"),
        }
        token.cancel();
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling rotation");
            token.cancel();
        }
    }
}

/// Resolve a local bundle and print what would be installed
fn inspect(path: &Path, domain: &str) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read archive {}", path.display()))?;

    let pair = archive::resolve(&bytes, domain)
        .with_context(|| format!("Failed to resolve {} in {}", domain, path.display()))?;
    let certificate = ResolvedCertificate::from_pair(domain, pair)
        .context("Failed to inspect live certificate")?;

    println!("domain:    {}", certificate.domain);
    println!("not after: {}", certificate.not_after.to_rfc3339());
    println!("name:      {}", certificate.name());

    Ok(())
}
