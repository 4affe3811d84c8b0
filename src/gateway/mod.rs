//! HTTP API gateway
//!
//! Exposes the initiative brains, the dispatcher, the readiness checklist and
//! the hardware scaffolding over JSON. Handlers share one [`AppState`]; every
//! failure leaves as a status code plus a `{"detail": ...}` body.

pub mod auth;
pub mod billing;
pub mod hardware;
pub mod initiatives;
pub mod projects;
pub mod routes;
pub mod state;
pub mod validation;

pub use routes::{handle_rejection, routes};
pub use state::{AppState, SharedState};

use crate::error::{GatewayError, GatewayResult};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tracing::info;

/// Bind the configured address and serve until `shutdown` resolves
pub async fn serve(
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> GatewayResult<()> {
    let host: IpAddr = state.config.server.host.parse().map_err(|_| {
        GatewayError::invalid_input(format!(
            "server.host '{}' is not an IP address",
            state.config.server.host
        ))
    })?;
    let addr = SocketAddr::new(host, state.config.server.port);

    let (bound, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| GatewayError::internal(format!("failed to bind {addr}: {e}")))?;

    info!(address = %bound, "ECOS gateway listening");
    server.await;
    info!("HTTP server stopped");
    Ok(())
}
