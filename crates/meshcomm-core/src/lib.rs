//! # meshcomm-core
//!
//! Shared vocabulary for MeshComm: the chat message model that travels over
//! the gossip mesh, its wire codec, and the unified error type used by every
//! other crate in the workspace.

pub mod error;
pub mod message;

pub use error::{MeshCommError, Result};
pub use message::{Category, Message, UnjoinedPolicy, User, decode_message, encode_message};
