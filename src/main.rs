use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use tello_link::client::{ControlClient, Operation};
use tello_link::{api, spawn_controller, Config};
use tello_link_shared::{MoveDirection, RotateDirection};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tello-link", version, about = "Persistent session manager for a Tello drone")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Own the drone session and serve the HTTP control endpoint
    Serve {
        #[arg(long)]
        listen: Option<IpAddr>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
    /// Send one operation to a running daemon
    Call {
        op: CallOp,
        #[arg(long)]
        direction: Option<String>,
        #[arg(long)]
        distance: Option<u32>,
        #[arg(long)]
        degrees: Option<u32>,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        /// Fail instead of waiting behind other commands
        #[arg(long)]
        nowait: bool,
        #[arg(long, default_value = "cli")]
        caller: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CallOp {
    Health,
    Status,
    Connect,
    Disconnect,
    Battery,
    Takeoff,
    Land,
    Emergency,
    Move,
    Rotate,
    VideoStart,
    VideoStop,
    VideoFrame,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.general.log_level.to_ascii_lowercase()));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { listen, port } => serve(config, listen, port).await,
        Commands::PrintConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Call {
            op,
            direction,
            distance,
            degrees,
            server,
            nowait,
            caller,
        } => {
            let op = build_operation(op, direction.as_deref(), distance, degrees)?;
            let answer = ControlClient::new(server, caller).call(op, nowait).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
            Ok(())
        }
    }
}

async fn serve(mut config: Config, listen: Option<IpAddr>, port: Option<u16>) -> Result<()> {
    if let Some(address) = listen {
        config.listen.address = address;
    }
    if let Some(port) = port {
        config.listen.port = port;
    }

    info!("tello-link starting");
    info!("  drone: {}", config.drone.address);
    info!("  command socket: {}", config.drone.local_bind);

    let controller = spawn_controller(&config);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown requested");
    };
    api::serve(config.listen_addr(), controller.clone(), shutdown).await?;

    if let Err(e) = controller.disconnect("shutdown").await {
        warn!("Disconnect on shutdown failed: {}", e);
    }
    Ok(())
}

fn build_operation(
    op: CallOp,
    direction: Option<&str>,
    distance: Option<u32>,
    degrees: Option<u32>,
) -> Result<Operation> {
    Ok(match op {
        CallOp::Health => Operation::Health,
        CallOp::Status => Operation::Status,
        CallOp::Connect => Operation::Connect,
        CallOp::Disconnect => Operation::Disconnect,
        CallOp::Battery => Operation::Battery,
        CallOp::Takeoff => Operation::Takeoff,
        CallOp::Land => Operation::Land,
        CallOp::Emergency => Operation::Emergency,
        CallOp::VideoStart => Operation::VideoStart,
        CallOp::VideoStop => Operation::VideoStop,
        CallOp::VideoFrame => Operation::VideoFrame,
        CallOp::Move => {
            let (Some(direction), Some(distance_cm)) = (direction, distance) else {
                bail!("move needs --direction and --distance");
            };
            Operation::Move {
                direction: direction.parse::<MoveDirection>()?,
                distance_cm,
            }
        }
        CallOp::Rotate => {
            let (Some(direction), Some(degrees)) = (direction, degrees) else {
                bail!("rotate needs --direction and --degrees");
            };
            Operation::Rotate {
                direction: direction
                    .parse::<RotateDirection>()
                    .context("rotate direction")?,
                degrees,
            }
        }
    })
}
