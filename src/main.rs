use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use diffbot_runtime::config::{HTTP_ADDR, RobotConfig};
use diffbot_runtime::runtime::{self, Settings};

/// Drive a two-wheel robot from network commands
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// JSON file with PWM channels, calibration and watchdog timing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the HTTP control page and command endpoints
    #[arg(long, default_value = HTTP_ADDR)]
    http: String,

    /// Run without PWM hardware
    #[arg(long)]
    simulate: bool,

    /// Do not open a zenoh session
    #[arg(long)]
    no_zenoh: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            match RobotConfig::load(path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Config error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => RobotConfig::default(),
    };

    let settings = Settings {
        config,
        http_addr: cli.http,
        simulate: cli.simulate,
        zenoh: !cli.no_zenoh,
    };

    if let Err(e) = runtime::run(settings).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
