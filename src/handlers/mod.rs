//! HTTP surface: notification intake and status views.

pub mod async_handlers;
pub mod node_handlers;
