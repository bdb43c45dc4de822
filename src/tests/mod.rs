//! Crate-level tests that need more than one module.
//!
//! - **support**: temporary database, router and a cookie-carrying client
//! - **pipeline_tests**: full request pipeline (login, CSRF, rate limiting, guards)
//! - **auth_tests**: account-state machine against the SQLite store
//! - **db_tests**: schema and store operations
//! - **config_tests**: configuration defaults, validation and layering
//! - **error_tests**: error display and HTTP mapping
//! - **health_api_tests**: probes, metrics and version endpoints

pub mod support;

pub mod config_tests;
pub mod error_tests;
