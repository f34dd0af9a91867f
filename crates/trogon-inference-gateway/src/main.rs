use trogon_inference_gateway::env::SystemEnv;
use trogon_inference_gateway::{GatewayConfig, serve};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env(&SystemEnv);
    tracing::info!(api_keys = config.api_keys.len(), "Loaded gateway configuration");

    if let Err(e) = serve(config).await {
        tracing::error!(error = %e, "Inference gateway failed");
        std::process::exit(1);
    }
}
