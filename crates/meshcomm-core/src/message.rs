use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{MeshCommError, Result};

/// Classification of a chat message.
///
/// The set is closed. Each category is also the name of the gossip topic
/// its messages travel on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Emergency,
    General,
    Help,
}

impl Category {
    /// Every category, in the order topics are joined at startup.
    pub const ALL: [Category; 3] = [Category::Emergency, Category::General, Category::Help];

    /// Wire literal, e.g. `"EMERGENCY"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Emergency => "EMERGENCY",
            Category::General => "GENERAL",
            Category::Help => "HELP",
        }
    }

    /// Gossip topic name for this category.
    pub fn topic(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MeshCommError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EMERGENCY" => Ok(Category::Emergency),
            "GENERAL" => Ok(Category::General),
            "HELP" => Ok(Category::Help),
            _ => Err(MeshCommError::UnknownCategory(s.to_string())),
        }
    }
}

/// The local participant, created once per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub nickname: String,
    /// Network host identifier (libp2p peer id).
    #[serde(rename = "nodeId")]
    pub node_id: String,
}

impl User {
    pub fn new(nickname: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            nickname: nickname.into(),
            node_id: node_id.into(),
        }
    }
}

/// A chat message as it travels over the mesh. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub category: Category,
    pub sender: User,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a new message with a fresh id, stamped now.
    pub fn new(content: impl Into<String>, category: Category, sender: User) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            category,
            sender,
            timestamp: Utc::now(),
        }
    }
}

/// Serialize a message into its UTF-8 JSON wire payload.
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode a wire payload. Any failure is reported as [`MeshCommError::Decode`].
pub fn decode_message(data: &[u8]) -> Result<Message> {
    serde_json::from_slice(data).map_err(|e| MeshCommError::Decode(e.to_string()))
}

/// What publishing to a category that was never joined does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnjoinedPolicy {
    /// Succeed without transmitting anything.
    #[default]
    Ignore,
    /// Fail with [`MeshCommError::NotJoined`].
    Reject,
}
