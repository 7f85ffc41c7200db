use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use legged_motion_runtime::config::{BackendKind, RuntimeConfig};
use legged_motion_runtime::runtime;

/// Motion controller runtime for a legged robot
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON config file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against the stub backend instead of hardware
    #[arg(long)]
    stub: bool,

    /// Serial device of the motion board
    #[arg(long)]
    device: Option<String>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };
    if args.stub {
        config.backend = BackendKind::Stub;
    }
    if let Some(device) = args.device {
        config.device = device;
    }

    // Bring-up faults are fatal: no point running without actuators or actions
    let (controller, fall) = match runtime::bring_up(&config) {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("Bring-up error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime::run(config, Arc::new(controller), fall).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
