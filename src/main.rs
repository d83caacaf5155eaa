use std::net::SocketAddr;

use futures::future::join_all;
use thiserror::Error;

use crate::api::server::RouteError;
use crate::util::telemetry;

mod api;
mod db;
mod services;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),

    #[error(transparent)]
    Route(#[from] RouteError),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry_registry = telemetry::Telemetry::new().await?.register();

    tracing::info!("starting main application");

    let (tx_server_ready, rx_server_ready) = tokio::sync::mpsc::unbounded_channel::<SocketAddr>();

    let server_handles = match api::server::start_server(tx_server_ready, rx_server_ready).await {
        Ok(handles) => handles,
        Err(e) => {
            tracing::error!(error = ?e, "unable to start api server");
            telemetry_registry.shutdown();
            return Err(e.into());
        }
    };

    _ = join_all(server_handles).await;

    telemetry_registry.shutdown();
    Ok(())
}
