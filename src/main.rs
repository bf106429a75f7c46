use meshcall::config::RelayConfig;
use meshcall::signaling::{SignalingError, SignalingServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), SignalingError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_env();

    println!("   meshcall signaling relay");
    println!("   Binding to {}", config.bind_addr);
    match &config.allowed_origin {
        Some(origin) => println!("   Allowed origin: {}", origin),
        None => println!("   Allowed origin: any"),
    }
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::bind(config).await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
