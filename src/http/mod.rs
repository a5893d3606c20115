//! HTTP API server for external control (browser or desktop front end)
//!
//! This module provides a REST API for driving the interview session:
//! - POST /session/connect - Start a session for a role
//! - POST /session/disconnect - Tear the session down
//! - POST /session/text - Send a typed message
//! - GET /session/status - Connection state, volume and last error
//! - GET /session/transcript - Transcript so far
//! - GET /session/stats - Session statistics
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::StatusResponse;
pub use routes::create_router;
pub use state::AppState;
