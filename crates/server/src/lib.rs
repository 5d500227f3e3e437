//! HTTP server for the Tyler ritual archive.
//!
//! This crate provides:
//! - Session resolution from cookies and the access gatekeeper middleware
//! - JSON resource endpoints for sessions, rituals, uploads and members
//! - Minimal server-rendered pages
//! - Seed administrator bootstrap and Prometheus metrics

pub mod auth;
pub mod bootstrap;
pub mod cookies;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use auth::{SessionResolution, TraceId};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
