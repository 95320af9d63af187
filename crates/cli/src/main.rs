mod config_commands;
mod db_commands;
mod users_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use wabridge_config::{Severity, WabridgeConfig};

#[derive(Parser)]
#[command(name = "wabridge", about = "wabridge: multi-tenant WhatsApp REST gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of wabridge.{toml,yaml,json}).
    #[arg(long, global = true, env = "WABRIDGE_CONFIG")]
    config: Option<PathBuf>,
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Custom data directory (overrides config value).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Tenant management.
    Users {
        #[command(subcommand)]
        action: users_commands::UsersAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Database management (migrate, reset).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the config file, then environment overrides, then CLI flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<WabridgeConfig> {
    let config = match cli.config {
        Some(ref path) => wabridge_config::load_config(path)?,
        None => wabridge_config::discover_and_load(),
    };
    let mut config = wabridge_config::apply_env_overrides(config);
    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref dir) = cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

/// Log semantic diagnostics and refuse to continue on errors.
fn check_config(config: &WabridgeConfig) -> anyhow::Result<()> {
    let diagnostics = wabridge_config::validate_config(config);
    for d in &diagnostics {
        match d.severity {
            Severity::Error => tracing::error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => info!(path = %d.path, "{}", d.message),
        }
    }
    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("configuration has {errors} error(s); run `wabridge config check`");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "wabridge starting");

    match cli.command {
        None | Some(Commands::Gateway) => {
            let config = resolve_config(&cli)?;
            check_config(&config)?;
            wabridge_gateway::start_gateway(config, None).await
        },
        Some(Commands::Users { ref action }) => {
            let config = resolve_config(&cli)?;
            users_commands::handle_users(action, &config).await
        },
        Some(Commands::Config { ref action }) => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
        Some(Commands::Db { ref action }) => {
            let config = resolve_config(&cli)?;
            db_commands::handle_db(action, &config).await
        },
    }
}
