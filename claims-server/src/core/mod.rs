//! Core module - configuration, state and server lifecycle
//!
//! # Module structure
//!
//! - [`Config`] - environment-driven configuration
//! - [`ServerState`] - shared handles to every service
//! - [`Server`] - event loop and background task lifecycle
//! - [`BackgroundTasks`] - task registration and graceful shutdown

pub mod config;
pub mod server;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use server::Server;
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind};
