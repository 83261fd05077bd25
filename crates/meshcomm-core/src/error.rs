use thiserror::Error;

use crate::message::Category;

/// Unified error type for MeshComm.
#[derive(Error, Debug)]
pub enum MeshCommError {
    // ── Topic membership ───────────────────────────────────────
    #[error("failed to join topic {topic}: {reason}")]
    Join { topic: String, reason: String },

    #[error("category not joined: {0}")]
    NotJoined(Category),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    // ── Transport ──────────────────────────────────────────────
    #[error("failed to publish to topic {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),

    // ── Payloads ───────────────────────────────────────────────
    #[error("malformed message payload: {0}")]
    Decode(String),

    // ── Config ─────────────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MeshCommError>;
