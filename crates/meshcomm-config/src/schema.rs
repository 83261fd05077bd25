use meshcomm_core::UnjoinedPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, maps to `meshcomm.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshCommConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

// ── Node ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Display name attached to every message this node sends.
    pub nickname: String,
    /// TCP port the libp2p host listens on (0 = OS-assigned).
    pub port: u16,
    /// Multiaddrs dialed on startup, e.g. `/ip4/10.0.0.2/tcp/4001/p2p/12D3Koo...`.
    pub bootstrap_peers: Vec<String>,
    /// Enable mDNS for LAN peer discovery.
    pub mdns: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            nickname: "anonymous".into(),
            port: 4001,
            bootstrap_peers: vec![],
            mdns: true,
        }
    }
}

impl NodeConfig {
    /// Multiaddr the host listens on.
    pub fn listen_multiaddr(&self) -> String {
        format!("/ip4/0.0.0.0/tcp/{}", self.port)
    }
}

// ── Network ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Store and announce our own messages locally once they are broadcast.
    pub local_echo: bool,
    /// Behaviour when publishing to a category that was never joined.
    pub unjoined_policy: UnjoinedPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_echo: true,
            unjoined_policy: UnjoinedPolicy::Ignore,
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve the HTTP API at all.
    pub enabled: bool,
    /// HTTP listen address.
    pub listen: String,
    /// Serve the single-page web UI.
    pub web_ui: bool,
    /// Directory holding the built frontend.
    pub static_dir: PathBuf,
    /// Enable CORS (for frontend development servers).
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:8080".into(),
            web_ui: true,
            static_dir: PathBuf::from("frontend/dist"),
            cors: false,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

impl MeshCommConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Nickname ───
        if self.node.nickname.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "node.nickname".into(),
                message: "nickname is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set node.nickname or pass --nickname".into()),
            });
        }

        // ── Bootstrap peers ───
        for (i, addr) in self.node.bootstrap_peers.iter().enumerate() {
            if !addr.starts_with('/') {
                warnings.push(ConfigWarning {
                    field: format!("node.bootstrap_peers[{i}]"),
                    message: format!("'{addr}' is not a multiaddr"),
                    severity: WarningSeverity::Warning,
                    hint: Some("Expected e.g. '/ip4/10.0.0.2/tcp/4001/p2p/<peer id>'".into()),
                });
            }
        }

        // ── Server listen address ───
        if self.server.enabled {
            if self.server.listen.is_empty() {
                warnings.push(ConfigWarning {
                    field: "server.listen".into(),
                    message: "listen address is empty".into(),
                    severity: WarningSeverity::Error,
                    hint: Some("Set to e.g. '127.0.0.1:8080'".into()),
                });
            } else if self.server.listen.starts_with("0.0.0.0") {
                warnings.push(ConfigWarning {
                    field: "server.listen".into(),
                    message: "binding to 0.0.0.0, anyone on the network can post as this node".into(),
                    severity: WarningSeverity::Warning,
                    hint: Some("Use '127.0.0.1:8080' for local-only access".into()),
                });
            }
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
