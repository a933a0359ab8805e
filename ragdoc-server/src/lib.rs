//! HTTP service for question answering over an indexed document collection.
//!
//! Routes:
//! - `POST /ask_stream` streams the plain-text answer payload
//! - `POST /ask` returns the answer and its sources as JSON
//! - `POST /ingest` rebuilds the index from the configured source directory
//! - `GET /health`

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{ServerConfig, app_router, run_server};
pub use state::AppState;
