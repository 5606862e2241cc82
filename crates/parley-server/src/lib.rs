//! # parley-server
//!
//! HTTP and WebSocket surface for the Parley chat service.
//!
//! ## Routes
//!
//! | route | auth | |
//! |---|---|---|
//! | `GET /health` | - | liveness |
//! | `POST /api/register` | - | create an account, returns a token |
//! | `POST /api/login` | - | returns a token |
//! | `GET /api/rooms` | bearer | list rooms |
//! | `POST /api/rooms` | bearer | create a room |
//! | `GET /api/rooms/:room_id/messages` | bearer | message history |
//! | `GET /ws?token=` | query | realtime events |

pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use state::AppState;

use anyhow::Result;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/rooms", get(api::list_rooms).post(api::create_room))
        .route("/api/rooms/:room_id/messages", get(api::room_messages))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .route("/health", get(api::health))
        .route("/api/register", post(api::register))
        .route("/api/login", post(api::login))
        .route(&state.config.transport.websocket_path, get(handlers::ws_handler))
        .merge(protected)
        .with_state(state)
}

/// Serve on an already-bound listener until the server stops.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Build state from `config`, bind, and serve.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the address cannot be bound.
pub async fn run(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::build(config).await?);
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    serve(listener, state).await
}
