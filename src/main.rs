//! Collectkit Binary Entry Point
//!
//! Loads the agent configuration, drives the bundled plugins through their
//! lifecycle and prints exported values the way an agent test run does.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use collectkit::config::parse_duration;
use collectkit::{AgentConfig, ExportContext, ItemKey, ItemValue, PluginError, PluginRegistry, plugins};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fallback polling period for `--watch` when the plugin advertises none.
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Collectkit - exercise collector plugins from the command line
#[derive(Parser, Debug)]
#[command(name = "collectkit", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/agent.yaml",
        env = "COLLECTKIT_CONFIG"
    )]
    config: String,

    /// Export timeout, e.g. '5s' (overrides config file)
    #[arg(long, env = "COLLECTKIT_TIMEOUT", value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Export every registered key without parameters and exit
    #[arg(short, long, conflicts_with = "test")]
    print: bool,

    /// Export one item, e.g. 'pgsql.db.size[,,,app]'
    #[arg(short, long, value_name = "ITEM")]
    test: Option<String>,

    /// Repeat --test at the plugin's interval until Ctrl+C
    #[arg(short, long, requires = "test")]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,collectkit=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(timeout) = cli.timeout {
        config.global.timeout = timeout;
        config.validate().context("invalid --timeout")?;
    }
    tracing::info!(
        timeout = %humantime::format_duration(config.global.timeout),
        plugin_sections = config.plugins.len(),
        "Configuration loaded"
    );

    let mut registry = PluginRegistry::new();
    plugins::register_all(&mut registry).context("failed to register plugins")?;

    if let Err(e) = registry.validate_all(&config.plugins) {
        tracing::warn!(error = %e, "Plugin configuration is invalid, defaults will be used");
    }
    registry.configure_all(&config.global, &config.plugins);
    registry.start_all();

    let result = match (&cli.test, cli.print) {
        (Some(item), _) if cli.watch => watch(&registry, &config, item).await,
        (Some(item), _) => test_item(&registry, &config, item).await,
        (None, true) => {
            print_all(&registry, &config).await;
            Ok(())
        }
        (None, false) => {
            list_metrics(&registry);
            Ok(())
        }
    };

    registry.stop_all();
    tracing::debug!("Plugins stopped");
    result
}

/// Load the configuration file, or use defaults when it does not exist.
fn load_config(path: &str) -> anyhow::Result<AgentConfig> {
    if !Path::new(path).exists() {
        tracing::info!(path, "Configuration file not found, using defaults");
        return Ok(AgentConfig::default());
    }
    tracing::info!(path, "Loading configuration");
    AgentConfig::load(path).with_context(|| format!("failed to load configuration from '{}'", path))
}

fn list_metrics(registry: &PluginRegistry) {
    for metric in registry.metrics() {
        println!("{:<30} {:<20} {}", metric.key, metric.plugin, metric.description);
    }
}

async fn print_all(registry: &PluginRegistry, config: &AgentConfig) {
    for metric in registry.metrics() {
        let ctx = ExportContext::new(config.global.timeout);
        let result = registry.export(&metric.key, &[], &ctx).await;
        println!("{}", render(&metric.key, &result));
    }
}

async fn test_item(registry: &PluginRegistry, config: &AgentConfig, item: &str) -> anyhow::Result<()> {
    let item = ItemKey::parse(item).with_context(|| format!("invalid item key '{}'", item))?;
    let ctx = ExportContext::new(config.global.timeout);
    let result = registry.export(&item.key, &item.params, &ctx).await;
    println!("{}", render(&item.to_string(), &result));
    Ok(())
}

async fn watch(registry: &PluginRegistry, config: &AgentConfig, item: &str) -> anyhow::Result<()> {
    let parsed = ItemKey::parse(item).with_context(|| format!("invalid item key '{}'", item))?;
    let period = registry
        .plugin_for_key(&parsed.key)
        .and_then(|p| p.interval())
        .unwrap_or(DEFAULT_WATCH_INTERVAL);
    tracing::info!(item, period = %humantime::format_duration(period), "Watching item, press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ctx = ExportContext::new(config.global.timeout);
                let result = registry.export(&parsed.key, &parsed.params, &ctx).await;
                println!("{}", render(item, &result));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
                return Ok(());
            }
        }
    }
}

/// Format a result as `key [type|value]`.
///
/// "No data" outcomes are marked `[-|...]` so they stand apart from
/// unsupported items.
fn render(key: &str, result: &Result<ItemValue, PluginError>) -> String {
    match result {
        Ok(value @ ItemValue::Text(_)) => format!("{:<40} [s|{}]", key, value),
        Ok(value @ ItemValue::Integer(_)) => format!("{:<40} [u|{}]", key, value),
        Ok(value @ ItemValue::Float(_)) => format!("{:<40} [d|{}]", key, value),
        Ok(value @ ItemValue::Json(_)) => format!("{:<40} [t|{}]", key, value),
        Err(e) if !e.kind().is_hard_failure() => format!("{:<40} [-|{}]", key, e),
        Err(e) => format!("{:<40} [m|ZBX_NOTSUPPORTED] [{}]", key, e),
    }
}
