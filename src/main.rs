use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vcam_relay::config::{AppConfig, ConfigStore};
use vcam_relay::manager::OutputManager;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// vcam-relay command line arguments
#[derive(Parser, Debug)]
#[command(name = "vcam-relay")]
#[command(version, about = "Frame relay with virtual camera and browser outputs", long_about = None)]
struct CliArgs {
    /// Data directory holding config.json
    #[arg(
        short = 'd',
        long,
        value_name = "DIR",
        env = "VCAM_RELAY_DATA_DIR",
        default_value = "./.vcam-relay"
    )]
    data_dir: PathBuf,

    /// Relay bind address (overrides stored config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Preferred relay port, 0 for ephemeral (overrides stored config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Output width
    #[arg(long, value_name = "PIXELS")]
    width: Option<u32>,

    /// Output height
    #[arg(long, value_name = "PIXELS")]
    height: Option<u32>,

    /// Output frame rate ceiling
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// Skip the native virtual camera driver
    #[arg(long)]
    no_native: bool,

    /// Persist the command line overrides to config.json
    #[arg(long)]
    save: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting vcam-relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", args.data_dir.display());
    tokio::fs::create_dir_all(&args.data_dir).await?;

    let config_store = ConfigStore::new(&args.data_dir.join("config.json")).await?;
    let config = if args.save {
        config_store
            .update(|config| apply_cli_overrides(config, &args))
            .await?;
        tracing::info!("Saved overrides to {}", config_store.path().display());
        (*config_store.get()).clone()
    } else {
        let mut config = (*config_store.get()).clone();
        apply_cli_overrides(&mut config, &args);
        config.validate()?;
        config
    };

    let manager = OutputManager::new(config);
    manager.start().await?;

    let status = manager.status();
    if let Some(backend) = status.backend {
        tracing::info!("Output backend: {}", backend);
    }
    match manager.endpoints() {
        Some(endpoints) => {
            println!("Viewer page:    {}", endpoints.endpoint_url);
            println!("Viewer socket:  {}", endpoints.ws_url);
            println!(
                "Frame ingest:   http://{}:{}/api/frame",
                endpoint_host(&endpoints.host),
                endpoints.port
            );
        }
        None => println!("Relay not available; writing to the native driver only"),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    manager.stop().await?;
    tracing::info!("Bye");
    Ok(())
}

/// CLI values win over the stored config; persisted only with `--save`
fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(ref address) = args.address {
        config.relay.bind_address = address.clone();
    }
    if let Some(port) = args.port {
        config.relay.preferred_port = port;
    }
    if let Some(width) = args.width {
        config.output.width = width;
    }
    if let Some(height) = args.height {
        config.output.height = height;
    }
    if let Some(fps) = args.fps {
        config.output.fps = fps;
    }
    if args.no_native {
        config.probe.native_enabled = false;
    }
}

fn endpoint_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "vcam_relay=error,tower_http=error",
        LogLevel::Warn => "vcam_relay=warn,tower_http=warn",
        LogLevel::Info => "vcam_relay=info,tower_http=info",
        LogLevel::Verbose => "vcam_relay=debug,tower_http=info",
        LogLevel::Debug => "vcam_relay=debug,tower_http=debug",
        LogLevel::Trace => "vcam_relay=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
