use rhost_broker::error::BrokerAppError;
use rhost_broker::logger::initialize as LoggerInitialize;
use rhost_broker::shutdown::stop_all_sessions;

use broker_core::auth::AccountAuthenticator;
use broker_core::broker::Broker;
use broker_core::broker::server::start_server;
use broker_core::config::{BrokerConfig, config_dir};
use broker_core::error::CoreError;
use broker_core::locator::ExecutableLocator;
use broker_core::relay::RemoteUriRelay;
use broker_core::session::ThreadDispatchSink;

use common::ErrorLocation;

use std::fs::create_dir_all;
use std::panic::Location;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use tokio::signal::ctrl_c;

const LOG_DIR_NAME: &str = "logs";
const DISPATCH_THREAD_NAME: &str = "rhost-dispatch";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BrokerAppError> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let config_dir = config_dir().ok_or_else(|| BrokerAppError::Startup {
        message: "No config directory available".to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let log_dir = config_dir.join(LOG_DIR_NAME);
    create_dir_all(&log_dir).map_err(|e| BrokerAppError::Startup {
        message: format!("Failed to create log directory: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    // Logger first so config loading is logged
    LoggerInitialize(&log_dir)?;
    info!("Config directory: {}", config_dir.display());

    let config = BrokerConfig::load(&config_dir).map_err(CoreError::from)?;
    let bind_address = config.server.bind_address.clone();
    let port = config.server.port;
    let relay = RemoteUriRelay::new(config.relay_timeout()).map_err(CoreError::from)?;

    let dispatch =
        ThreadDispatchSink::spawn(DISPATCH_THREAD_NAME).map_err(|e| BrokerAppError::Startup {
            message: format!("Failed to start dispatch thread: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;
    let authenticator = Arc::new(AccountAuthenticator::new(&config.auth));
    let locator = ExecutableLocator::for_current_exe().map_err(CoreError::from)?;

    let broker = Broker::new(config, authenticator, locator, Arc::new(dispatch));

    let server = start_server(broker.clone(), relay, &bind_address, port)
        .await
        .map_err(CoreError::from)?;
    info!("Broker ready on http://{}", server.local_addr());

    ctrl_c().await.map_err(|e| BrokerAppError::Startup {
        message: format!("Failed to listen for shutdown signal: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    info!("Shutdown requested");
    let stopped = stop_all_sessions(&broker).await;
    info!("Stopped {stopped} session(s)");
    server.shutdown().await;

    Ok(())
}
