use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (PARLEY_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("PARLEY_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("parley_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = parley_server::config::ServerConfig::parse();
    tracing::info!("starting chat server on {}", config.listen_addr);
    if config.db_path.is_none() {
        tracing::warn!("running with an in-memory store, state is lost on restart");
    }

    let server = parley_server::server::Server::new(config);
    server.run().await
}
