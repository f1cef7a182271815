use anyhow::Result;
use ev_load_balancer::config::Config;
use ev_load_balancer::coordinator::Coordinator;
use ev_load_balancer::logging::{get_logger, init_logging};
use ev_load_balancer::store::EntityStore;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(None).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    let logger = get_logger("main");
    logger.info(&format!("EV load balancer {} starting up", env!("APP_VERSION")));

    // States are pushed in by the host bridge; missing entities at startup are
    // reported but not fatal.
    let store = EntityStore::new();
    if let Err(e) = config.validate_entities(&store).await {
        logger.warn(&format!("Entity check failed: {}", e));
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let coordinator = Arc::new(Coordinator::new(config.clone(), Arc::new(store.clone())));

    #[cfg(feature = "web")]
    let web_task = if config.web.enabled {
        let state = ev_load_balancer::web::AppState {
            coordinator: Arc::clone(&coordinator),
            store: Some(store.clone()),
        };
        let mut rx = stop_rx.clone();
        let shutdown = async move {
            let _ = rx.changed().await;
        };
        let host = config.web.host.clone();
        let port = config.web.port;
        let web_logger = logger.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = ev_load_balancer::web::serve(state, &host, port, shutdown).await {
                web_logger.error(&format!("Web server error: {}", e));
            }
        }))
    } else {
        None
    };
    #[cfg(not(feature = "web"))]
    drop(stop_rx);

    let signal_coordinator = Arc::clone(&coordinator);
    let signal_logger = logger.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_logger.info("Shutdown requested");
            signal_coordinator.request_shutdown();
        }
    });

    let result = Arc::clone(&coordinator).run().await;
    stop_tx.send_replace(true);

    #[cfg(feature = "web")]
    if let Some(task) = web_task {
        let _ = task.await;
    }

    match result {
        Ok(()) => {
            logger.info("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            logger.error(&format!("Coordinator failed with error: {}", e));
            Err(anyhow::anyhow!("Coordinator error: {}", e))
        }
    }
}
