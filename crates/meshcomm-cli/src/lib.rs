//! # meshcomm-cli
//!
//! Command-line interface for a MeshComm node.
//!
//! ## Commands
//!
//! - `meshcomm start` — Join the mesh and serve the web UI
//! - `meshcomm config` — Show the effective configuration
//! - `meshcomm version` — Show version and build info
//! - `meshcomm completions` — Generate shell completions

pub mod commands;

pub use commands::Cli;
