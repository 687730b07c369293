//! Lumera HTTP API service.
//!
//! This crate exposes the credits/job core over HTTP:
//!
//! - Job submission and status (`/v1/jobs`)
//! - Credit balance, transaction history, and grants (`/v1/credits`)
//! - The provider status webhook (`/webhooks/provider`)
//!
//! All `/v1` routes are service-to-service: callers are the platform's
//! request handlers and background collaborators, authenticated with a
//! shared API key. End-user authentication happens upstream.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for consistency

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
