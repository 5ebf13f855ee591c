//! CLI Entry Point for lab-bench
//!
//! Provides command-line interface for:
//! - Validating a bench document without touching hardware (`check`)
//! - Loading a bench, printing the resolved table and releasing it (`load`)
//! - Listing the bundled drivers (`drivers`)
//!
//! # Usage
//!
//! ```bash
//! lab-bench check benches/dcdc.json
//! lab-bench load benches/dcdc.json --simulate --identify
//! lab-bench load benches/dcdc.toml --role v_in --role v_in_meter --no-init
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lab_bench::logging::{self, LoggingConfig, OutputFormat};
use lab_bench::registry::DriverRegistry;
use lab_bench::sequencer::FailurePolicy;
use lab_bench::session::Transport;
use lab_bench::settings::{BenchSettings, DEFAULT_SETTINGS_PATH};
use lab_bench::transport::{SimulatedTransport, TcpTransport};
use lab_bench::{ConfigurationDocument, ConfigurationLoader};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lab-bench")]
#[command(about = "Load and initialize a bench of test instruments", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a document without opening any session
    Check {
        /// Bench document (.json or .toml); defaults to the configured one
        document: Option<PathBuf>,
    },

    /// Load a bench, print it and release it
    Load {
        /// Bench document (.json or .toml); defaults to the configured one
        document: Option<PathBuf>,

        /// Use the in-memory simulated transport
        #[arg(long)]
        simulate: bool,

        /// Bind instruments without running their init steps
        #[arg(long)]
        no_init: bool,

        /// Keep going past failing init steps
        #[arg(long)]
        continue_on_error: bool,

        /// Load only this role (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,

        /// Query *IDN? on every loaded instrument
        #[arg(long)]
        identify: bool,
    },

    /// List registered drivers
    Drivers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = BenchSettings::load_from(&cli.settings)
        .with_context(|| format!("failed to load settings from {}", cli.settings.display()))?;
    if let Some(level) = cli.log_level {
        settings.application.log_level = level;
    }
    if let Some(format) = cli.log_format {
        settings.application.log_format = format;
    }
    settings.validate().map_err(anyhow::Error::msg)?;

    let logging_config = LoggingConfig::from_settings(&settings).map_err(anyhow::Error::msg)?;
    logging::init(logging_config).map_err(anyhow::Error::msg)?;

    let registry = Arc::new(DriverRegistry::with_builtin_drivers()?);

    match cli.command {
        Commands::Check { document } => {
            let path = document_path(document, &settings)?;
            check(registry, &settings, path)
        }
        Commands::Load {
            document,
            simulate,
            no_init,
            continue_on_error,
            roles,
            identify,
        } => {
            let path = document_path(document, &settings)?;
            settings.transport.simulate |= simulate;
            if no_init {
                settings.loader.init_devices = false;
            }
            if continue_on_error {
                settings.loader.failure_policy = FailurePolicy::ContinueOnError;
            }
            if !roles.is_empty() {
                settings.loader.roles = Some(roles);
            }
            load(registry, &settings, path, identify).await
        }
        Commands::Drivers => {
            for (definition, object) in registry.list() {
                println!("{:<14} {}", definition.to_string(), object);
            }
            Ok(())
        }
    }
}

fn document_path(document: Option<PathBuf>, settings: &BenchSettings) -> Result<PathBuf> {
    document
        .or_else(|| settings.loader.document.clone())
        .context("no bench document given and none configured in [loader] document")
}

fn check(registry: Arc<DriverRegistry>, settings: &BenchSettings, path: PathBuf) -> Result<()> {
    let document = ConfigurationDocument::from_path(&path)?;
    // Preflight opens no sessions.
    let loader = ConfigurationLoader::new(registry, Arc::new(SimulatedTransport::new()))
        .with_options(settings.loader.load_options());

    let plan = loader
        .check(&document)
        .with_context(|| format!("{} failed preflight", path.display()))?;

    println!("{} OK: {} role(s)", path.display(), plan.entries.len());
    for entry in &plan.entries {
        println!(
            "  {:<16} {:<14} {:<16} {:<32} {} step(s)",
            entry.role,
            entry.definition.to_string(),
            entry.object,
            entry.address.to_string(),
            entry.steps
        );
    }
    Ok(())
}

async fn load(
    registry: Arc<DriverRegistry>,
    settings: &BenchSettings,
    path: PathBuf,
    identify: bool,
) -> Result<()> {
    let transport: Arc<dyn Transport> = if settings.transport.simulate {
        Arc::new(SimulatedTransport::new())
    } else {
        Arc::new(
            TcpTransport::new()
                .with_connect_timeout(settings.transport.timeout())
                .with_io_timeout(settings.transport.timeout()),
        )
    };
    let loader = ConfigurationLoader::new(registry, transport).with_options(settings.loader.load_options());

    let bench = loader
        .load_path(&path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))?;

    println!("Loaded {} role(s) from {}", bench.len(), path.display());
    for resolved in bench.iter() {
        let report = resolved.report();
        println!(
            "  {:<16} {:<14} {:<16} {:<32} {} applied, {} failed",
            resolved.role(),
            resolved.definition().to_string(),
            resolved.object(),
            resolved.address().to_string(),
            report.applied,
            report.failures.len()
        );
        for failure in &report.failures {
            println!("      {}", failure);
        }
    }

    if identify {
        for (role, reply) in bench.identify().await {
            match reply {
                Ok(idn) => println!("  {:<16} {}", role, idn),
                Err(e) => println!("  {:<16} <{}>", role, e),
            }
        }
    }

    bench.release().await.context("failed to release bench")?;
    Ok(())
}
