//! # meshcomm-config
//!
//! Configuration for a MeshComm node. Reads `meshcomm.toml`, then applies
//! environment variable overrides; CLI flags are layered on top by the caller.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{ConfigWarning, MeshCommConfig, WarningSeverity};
