//! Herald HTTP API.
//!
//! Endpoints:
//! - GET  /health: liveness plus live connection count
//! - POST /api/notifications/dispatch: bulk dispatch from an originating system
//! - GET  /api/notifications: caller's notifications with total and unread counts
//! - GET  /api/notifications/stream: Server-Sent Events push channel
//! - GET  /api/notifications/{id}: single notification
//! - POST /api/notifications/opened: mark a notification opened

pub mod middleware;
pub mod routes;
pub mod state;
