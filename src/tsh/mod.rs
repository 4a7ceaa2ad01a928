//! Teleport SSH client.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Identity, targets and operation requests
//! - `config`: Settings and environment variable resolution
//! - `error`: Error taxonomy and retry classification
//! - `session`: russh client handler
//! - `store`: Persisted local credentials
//! - `auth`: Credential providers and the fallback chain
//! - `client`: SSH connection, retry and proxy hop
//! - `operations`: Connect, upload, download and server listing
//! - `cli`: Command-line parsing
//! - `commands`: Dispatcher tying parsing, chain and operations together

pub mod auth;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod operations;
pub mod session;
pub mod store;
pub mod types;

pub use commands::{DispatchState, Dispatcher};
pub use error::TshError;
