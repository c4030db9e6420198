//! adcrawl main entry point
//!
//! Loads the configuration, wires the error classifier, module registry and
//! browser launcher together, and runs the crawl until SIGINT or SIGTERM.

use adcrawl::browser::HttpLauncher;
use adcrawl::config::load_config_with_hash;
use adcrawl::errors::{notifier_from_config, ErrorClassifier};
use adcrawl::modules::{builtin_factories, ModuleRegistry};
use adcrawl::runner::{load_statistics, print_statistics, CrawlRunner, RunControl, RunSettings};
use adcrawl::storage::{open_storage, Storage};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "ADCRAWL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "adcrawl.toml";

/// adcrawl: an unattended classified-ad crawler
///
/// Rotates through the configured site modules until interrupted. The config
/// file is read from $ADCRAWL_CONFIG (default ./adcrawl.toml).
#[derive(Parser, Debug)]
#[command(name = "adcrawl")]
#[command(version)]
#[command(about = "An unattended classified-ad crawler", long_about = None)]
struct Cli {
    /// Run mode
    #[arg(value_enum, default_value_t = Mode::Cycle)]
    mode: Mode,

    /// Comma-separated module names (default: every configured module)
    #[arg(value_name = "MODULES")]
    modules: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Crawl the queued modules cycle after cycle
    #[value(alias = "rotate")]
    Cycle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging();

    let config_path =
        PathBuf::from(std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into()));
    tracing::info!("Loading configuration from: {}", config_path.display());
    let (config, config_hash) = load_config_with_hash(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    let notifier = notifier_from_config(&config.notifier);
    let errors = Arc::new(ErrorClassifier::from_config(&config.errors, notifier));

    let registry = ModuleRegistry::discover(builtin_factories(&config, Arc::clone(&errors)));
    let launcher = Arc::new(HttpLauncher::new(config.browser.clone()));
    let settings = RunSettings::from_config(&config, config_hash);

    let mut runner = CrawlRunner::new(registry, launcher, Arc::clone(&errors), settings);
    spawn_signal_handler(runner.control());

    let modules = parse_module_list(cli.modules.as_deref());
    match cli.mode {
        Mode::Cycle => runner.start(&modules).await?,
    }

    let storage = match open_storage(&PathBuf::from(&config.storage.database_path)) {
        Ok(storage) => Some(storage),
        Err(e) => {
            tracing::warn!("Statistics without storage totals: {}", e);
            None
        }
    };
    let stats = load_statistics(
        runner.stats(),
        errors.stats(),
        storage.as_ref().map(|s| s as &dyn Storage),
    );
    print_statistics(&stats);

    Ok(())
}

/// Sets up the tracing subscriber; `RUST_LOG` overrides the default filter
fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("adcrawl=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn parse_module_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// Stops the runner on the first SIGINT or SIGTERM
fn spawn_signal_handler(control: RunControl) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        control.stop();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
