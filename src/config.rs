//! Default target for the sender, persisted as `{"HOST": ..., "PORT": ...}`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::transport::Endpoint;

pub const DEFAULT_CONFIG_PATH: &str = "hl7-mllp-tester.json";
pub const DEFAULT_PORT: u16 = 2575;
const LOCAL_HOST: &str = "127.0.0.1";
const DOCKER_HOST: &str = "host.docker.internal";
const DOCKER_MARKER: &str = "/.dockerenv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "HOST", default = "default_host")]
    pub host: String,
    #[serde(rename = "PORT", default = "default_port")]
    pub port: u16,
}

/// Inside a container the listener usually runs on the host machine.
fn default_host() -> String {
    if Path::new(DOCKER_MARKER).exists() {
        DOCKER_HOST.to_string()
    } else {
        LOCAL_HOST.to_string()
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Settings {
    /// Loads settings, falling back to defaults when the file is missing or
    /// cannot be parsed.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(e) => {
                debug!(error = %e, "using default settings");
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        fs::write(path, json).map_err(write_err)?;
        debug!(path = %path.display(), host = %self.host, port = self.port, "saved settings");
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}
