use log::info;
use tessera_relay::{RelayServer, ServerConfig};

/// Environment variable overriding the bind address.
const BIND_ENV: &str = "TESSERA_BIND";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ServerConfig::default();
    if let Some(addr) = std::env::args().nth(1).or_else(|| std::env::var(BIND_ENV).ok()) {
        config.bind_addr = addr;
    }

    info!("Starting tessera relay on ws://{}", config.bind_addr);
    let server = RelayServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
