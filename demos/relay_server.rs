//! Commentary relay server demo
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                  # binds to 0.0.0.0:8787
//!   cargo run --example relay_server localhost        # binds to 127.0.0.1:8787
//!   cargo run --example relay_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! Point AGENT_ENDPOINT at the analysis process, then subscribe with any
//! WebSocket client:
//!
//!   websocat "ws://localhost:8787/live?sourceURL=https://example.com/game.mp4&isLive=true"
//!
//! Chunk payloads are logged and discarded (`LogSink`); wire in real
//! object-storage and metadata-store clients for durable persistence.

use std::net::SocketAddr;
use std::sync::Arc;

use livecast::agent::WsConnector;
use livecast::sink::LogSink;
use livecast::{RelayServer, ServerConfig};

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8787
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "127.0.0.1" -> 127.0.0.1:8787
/// - "0.0.0.0:9000" -> 0.0.0.0:9000
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8787;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: relay_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8787)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  AGENT_ENDPOINT    Analysis process WebSocket URL");
    eprintln!("                    (default: ws://127.0.0.1:8765/analyze)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => "0.0.0.0:8787".parse().unwrap(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("livecast=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let mut config = ServerConfig::default().bind(bind_addr);
    if let Ok(endpoint) = std::env::var("AGENT_ENDPOINT") {
        config = config.agent_endpoint(endpoint);
    }

    println!("Starting commentary relay on {}", config.bind_addr);
    println!();
    println!("=== Subscribe ===");
    println!(
        "websocat \"ws://localhost:{}/live?sourceURL=https://example.com/game.mp4&isLive=true\"",
        config.bind_addr.port()
    );
    println!();
    println!("=== Inspect ===");
    println!("curl http://localhost:{}/streams", config.bind_addr.port());
    println!();

    let connector = Arc::new(WsConnector::new(config.agent_endpoint.clone()));
    let server = RelayServer::new(config, connector, Arc::new(LogSink));

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
