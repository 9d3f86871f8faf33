use oxide_webssh::config::load_config;

#[tokio::main]
async fn main() {
    oxide_webssh::init_logging();

    let config = match load_config().await {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting OxideTerm WebSSH bridge on {}", config.bind_addr());

    if let Err(e) = oxide_webssh::run(config).await {
        tracing::error!("Bridge server failed: {}", e);
        std::process::exit(1);
    }
}
