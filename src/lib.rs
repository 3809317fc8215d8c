//! Configuration file synchronization engine.
//!
//! Keeps configuration files identical across machines: each tracked file is
//! hardlinked into a git working directory, a shared registry in that
//! directory counts how many machines link each file, and a transport
//! commits, pulls and pushes the directory.
//!
//! The public API is organised into these layers:
//!
//! - **[`config`]**: local state (`state.toml`) and the shared registry
//! - **[`resources`]**: hardlink primitives and the state directory lock
//! - **[`transport`]**: the version-control transport and its git implementation
//! - **[`engine`]**: the operations (`add_file`, `remove_file`, `synchronize`, ...)
//! - **[`commands`]**: top-level subcommand orchestration
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod logging;
pub mod resources;
pub mod transport;
