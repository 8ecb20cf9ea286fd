//! Defines routes for the reconciliation node's HTTP surface.
//!
//! ## Structure
//! - **Status endpoints**
//!   - `GET /`           — node identity and state
//!   - `GET /info`       — same body as `/`
//!   - `GET /async_info` — bucket statistics
//!
//! - **Notification endpoints**
//!   - `PUT    /objects` — enqueue object PUT notifications
//!   - `DELETE /objects` — enqueue object DELETE notifications

use std::sync::Arc;

use crate::{
    handlers::{
        async_handlers::{delete_objects, get_async_info, put_objects},
        node_handlers::info,
    },
    services::engine::Engine,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build and return the router for all node routes.
///
/// The router carries shared state (`Arc<Engine>`) to all handlers; handlers
/// only append to the pending queue and read cached state.
pub fn routes() -> Router<Arc<Engine>> {
    Router::new()
        .route("/", get(info))
        .route("/info", get(info))
        .route("/async_info", get(get_async_info))
        .route("/objects", put(put_objects).delete(delete_objects))
}
