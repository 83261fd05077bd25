use meshcomm_core::MeshCommError;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::MeshCommConfig;

/// Loads the MeshComm configuration.
pub struct ConfigLoader {
    config: MeshCommConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > MESHCOMM_CONFIG env > ~/.meshcomm/meshcomm.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("MESHCOMM_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".meshcomm")
            .join("meshcomm.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> meshcomm_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            MeshCommConfig::default()
        };

        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(MeshCommError::Config(e)),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Parse a TOML document; `origin` is only used in the error message.
    pub fn parse(raw: &str, origin: &Path) -> meshcomm_core::Result<MeshCommConfig> {
        toml::from_str::<MeshCommConfig>(raw).map_err(|e| {
            MeshCommError::Config(format!("failed to parse {}: {}", origin.display(), e))
        })
    }

    /// A copy of the loaded config.
    pub fn get(&self) -> MeshCommConfig {
        self.config.clone()
    }

    /// Path the config was (or would have been) read from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply MESHCOMM_* overrides. `lookup` returns the value of a variable, if set.
    pub fn apply_env_overrides(
        mut config: MeshCommConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> MeshCommConfig {
        if let Some(v) = lookup("MESHCOMM_NICKNAME") {
            config.node.nickname = v;
        }
        if let Some(v) = lookup("MESHCOMM_PORT") {
            match v.parse::<u16>() {
                Ok(port) => config.node.port = port,
                Err(_) => warn!(value = %v, "ignoring invalid MESHCOMM_PORT"),
            }
        }
        if let Some(v) = lookup("MESHCOMM_SERVER_LISTEN") {
            config.server.listen = v;
        }
        if let Some(v) = lookup("MESHCOMM_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }
}
