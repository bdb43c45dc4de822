//! # Torwache
//!
//! Administrative web server core: operator authentication with lockout and
//! forced password reset, session-bound CSRF protection, login rate limiting
//! and a fixed, explicit middleware pipeline.
//!
//! ## Architecture
//!
//! - **Axum** for routing and middleware, **axum-server** for TLS
//! - **SQLx** (SQLite) behind the [`store::UserStore`] and [`store::SessionStore`] traits
//! - **Tokio** runtime, **tracing** for structured logs
//!
//! ## Core Components
//!
//! - [`middleware`]: pipeline stages (`PIPELINE`) and route guards
//! - [`auth`]: account-state machine and password policy
//! - [`session`]: server-side session record
//! - [`routes`]: handlers and the router builder
//! - [`config`]: layered configuration
//! - [`state`]: shared application state

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod store;
pub mod types;
pub mod views;

#[cfg(test)]
mod tests;
