use std::{
    process,
    sync::{Arc, OnceLock},
    time::Duration,
};

use iotcore::{ConnectionBuilder, QoS};
use iotcore_agent::{
    config::Config,
    core::{
        executor::{Executor, Publisher},
        inbound,
    },
    logger::LoggerManager,
    print_error,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Upper bound on the shutdown disconnect before the process exits anyway.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

#[tokio::main]
async fn main() {
    let cfg = config();
    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting iotcore-agent version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.iotcore);

    let device = cfg.iotcore.device().unwrap_or_else(|e| {
        error!("Invalid device configuration: {}", e);
        process::exit(1);
    });
    info!("Device: {}", device.client_id());

    let connection = cfg.iotcore.connection_config(&device).unwrap_or_else(|e| {
        error!("Failed to build connection configuration: {}", e);
        process::exit(1);
    });
    info!("Broker: {}", connection.broker_url);

    let cancel = CancellationToken::new();
    let mut kernel = ConnectionBuilder::new(connection)
        .into_kernel(cancel.clone())
        .with_backoff(cfg.iotcore.backoff());

    kernel.subscribe(device.config_topic(), QoS::AtLeastOnce);
    kernel.subscribe(device.command_topic(), QoS::AtLeastOnce);

    let (inbound_tx, inbound_rx) = mpsc::channel(cfg.agent.inbound_capacity);
    kernel.forward_publishes(inbound_tx);

    let publisher: Arc<dyn Publisher> = Arc::new(kernel.client());
    let executor = Executor::new(
        publisher,
        &device,
        cfg.agent.heartbeat_interval(),
        kernel.subscribe_state(),
        cancel.clone(),
    )
    .with_state_reports(cfg.agent.report_state);

    let mut kernel_task = tokio::spawn(async move { kernel.run().await });
    let listener_task = tokio::spawn(inbound::listen(inbound_rx, device));
    let executor_task = tokio::spawn(executor.run());

    let exit_code = tokio::select! {
        finished = &mut kernel_task => match finished {
            Ok(Ok(())) => {
                info!("Connection closed");
                0
            }
            Ok(Err(e)) => {
                error!("Connection failed: {}", e);
                1
            }
            Err(e) => {
                error!("Connection task panicked: {}", e);
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
            cancel.cancel();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut kernel_task).await {
                Ok(Ok(Err(e))) => error!("Connection ended with error: {}", e),
                Ok(_) => debug!("Connection kernel stopped"),
                Err(_) => {
                    error!("Disconnect timed out after {}s", SHUTDOWN_TIMEOUT.as_secs());
                    kernel_task.abort();
                }
            }
            0
        }
    };

    cancel.cancel();
    let _ = executor_task.await;
    listener_task.abort();

    info!("Shutdown complete");
    process::exit(exit_code);
}
