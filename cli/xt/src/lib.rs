//! xt - develop extensions against a live app.
//!
//! The binary is a thin wrapper over [`commands::Cli`]. The modules are public
//! so integration tests can drive the registry client and the project loader
//! directly.

pub mod auth;
pub mod builder;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod logs;
pub mod output;
pub mod project;
pub mod prompt;
pub mod render;
pub mod store;
