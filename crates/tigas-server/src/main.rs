//! TIGAS transport server binary

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tigas_server::{run_server, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tigas-server")]
#[command(about = "HTTP/3 origin for DASH segments and the pose control channel")]
struct Args {
    /// Listen address; a bare ":port" binds all interfaces
    #[arg(long, default_value = ":4433", value_parser = parse_listen_addr)]
    addr: SocketAddr,

    /// TLS certificate path (PEM)
    #[arg(long)]
    cert: PathBuf,

    /// TLS private key path (PEM)
    #[arg(long)]
    key: PathBuf,

    /// Static assets path
    #[arg(long = "static", default_value = "../client")]
    static_dir: PathBuf,

    /// DASH segments path
    #[arg(long, default_value = "../artifacts/test_mode")]
    segments: PathBuf,

    /// Movement traces path
    #[arg(long, default_value = "../movement_traces")]
    movement: PathBuf,

    /// Datagram log output path
    #[arg(long = "control-log", default_value = "../artifacts/test_mode/control_messages.bin")]
    control_log: PathBuf,
}

fn parse_listen_addr(value: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    // A bare ":PORT" binds the IPv6 unspecified address, which accepts
    // IPv4 clients too on dual-stack hosts.
    if let Some(port) = value.strip_prefix(':') {
        format!("[::]:{port}").parse()
    } else {
        value.parse()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        addr: args.addr,
        cert_path: args.cert,
        key_path: args.key,
        static_dir: args.static_dir,
        segments_dir: args.segments,
        movement_dir: args.movement,
        control_log: args.control_log,
    };

    tokio::select! {
        result = run_server(config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}
