//! Network surfaces: WebSocket push listener and control socket.

pub mod control;
pub mod protocol;
pub mod ws;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::relay::Relay;
use crate::AppError;

/// Bind both listeners and serve until ctrl-c or a listener fails.
pub async fn run(relay: Arc<Relay>) -> Result<(), AppError> {
    let config = relay.config().clone();
    let push_listener = TcpListener::bind(config.push_addr).await?;
    let control_listener = TcpListener::bind(config.control_addr).await?;

    let mut push_task = tokio::spawn(ws::serve(push_listener, relay.push_channel()));
    let mut control_task = tokio::spawn(control::serve(control_listener, Arc::clone(&relay)));
    let maintenance = relay.spawn_maintenance();

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            signal.map_err(AppError::from)
        }
        joined = &mut push_task => listener_exit("push", joined),
        joined = &mut control_task => listener_exit("control", joined),
    };

    push_task.abort();
    control_task.abort();
    maintenance.abort();
    if !relay.flush().await {
        error!("envelope log has uncommitted writes at shutdown");
    }
    info!("relay stopped");
    result
}

fn listener_exit(
    name: &str,
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(listener = name, "listener failed: {e}");
            Err(e.into())
        }
        Err(e) => Err(AppError::Other(format!("{name} listener task failed: {e}"))),
    }
}
