use clap::Parser;
use netboot_controller::{
    application::startup::init_logging,
    observer::{
        ObserverError,
        config::{ObserverArgs, ObserverConfig},
    },
};
use tracing::error;

#[tokio::main]
async fn main() {
    let args = ObserverArgs::parse();
    let config = match ObserverConfig::from_args(args).map_err(ObserverError::Config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(2);
        }
    };
    if let Err(error) = init_logging(&config.log_filter, config.json_logs) {
        eprintln!("{}", ObserverError::Logging(error.to_string()));
        std::process::exit(1);
    }

    if let Err(error) = observe(config).await {
        error!("observer failed: {error}");
        std::process::exit(1);
    }
}

#[cfg(feature = "bus")]
async fn observe(config: ObserverConfig) -> Result<(), ObserverError> {
    use std::sync::Arc;

    use netboot_controller::{
        interfaces::bus_client::{BusOptions, WsBusClient},
        observer::{
            BusClient, BusError,
            cooldown::Cooldown,
            runner::{self, Reconnect},
        },
    };
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info};

    debug!("version {}", env!("CARGO_PKG_VERSION"));
    let options = BusOptions {
        url: config.bus_url.clone(),
        client_id: format!("netboot-observer-{}", config.controller_id),
        credentials: config.credentials.clone(),
        timeout: config.timeout,
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    info!(
        "observing {} for host controller {}",
        config.bus_url, config.controller_id
    );
    runner::supervise(
        || {
            let options = options.clone();
            async move {
                let (bus, notifications) = WsBusClient::connect(options).await?;
                let bus: Arc<dyn BusClient> = Arc::new(bus);
                Ok::<_, BusError>((bus, notifications))
            }
        },
        config.controller_id.clone(),
        Cooldown::new(config.retry_cooldown),
        Reconnect::default(),
        shutdown,
    )
    .await?;
    Ok(())
}

#[cfg(not(feature = "bus"))]
async fn observe(_config: ObserverConfig) -> Result<(), ObserverError> {
    error!("netboot-observer was built without the bus client");
    std::process::exit(0);
}
