use config::{initialize_state, Configuration};
use log::{error, info};
use std::sync::Arc;

mod config;
mod controller;
mod db;
mod error;
mod models;
mod routes;
mod subscriptions;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for the shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, stopping the store");
}

#[tokio::main]
async fn main() {
    env_logger::init();

    // initialize the env configuration and the storage backend.
    let app_state = Configuration::from_env().and_then(initialize_state);

    // log the error and exit the application if the app_state is not initialized.
    let app_state = match app_state {
        Ok(app_state) => Arc::new(app_state),
        Err(err) => {
            error!("Failed to initialize the app state: {:#}", err);
            std::process::exit(1);
        }
    };

    let bind_address = app_state.configuration.bind_address();
    let store_routes = routes::store_routes(app_state);

    match warp::serve(store_routes).try_bind_with_graceful_shutdown(bind_address, shutdown_signal()) {
        Ok((address, server)) => {
            info!("Store listening on http://{}", address);
            server.await;
        }
        Err(err) => {
            error!("Failed to bind {}: {}", bind_address, err);
            std::process::exit(1);
        }
    }
}
