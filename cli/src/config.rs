//! Node configuration
//!
//! Optional TOML file; command-line flags take precedence over file values.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ciphernet_he::EncryptionParameters;
use ciphernet_session::{GcOptions, InputMode, RetrySchedule};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Full node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CipherNetConfig {
    /// Network endpoints
    #[serde(default)]
    pub network: NetworkSettings,

    /// Secure-computation engine settings
    #[serde(default)]
    pub mpc: MpcSettings,

    /// Encryption parameter preset
    #[serde(default)]
    pub params: ParamSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Session address
    pub addr: String,
    /// Dedicated 2PC address
    pub mpc_addr: String,
    /// Peer timeout in seconds; 0 waits indefinitely
    pub peer_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:34000".to_string(),
            mpc_addr: "127.0.0.1:34001".to_string(),
            peer_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpcSettings {
    /// Garbled circuits enabled
    pub enabled: bool,
    /// Boolean-sharing protocol: "yao" or "gmw"
    pub protocol: String,
    /// Circuit word width
    pub bit_length: u32,
    /// Worker threads for mask application
    pub threads: usize,
    /// Gate-reservation hint
    pub reserve_gates: usize,
    /// Security level parameter
    pub security_level: u64,
}

impl Default for MpcSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol: "yao".to_string(),
            bit_length: 64,
            threads: 1,
            reserve_gates: 4096,
            security_level: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSettings {
    /// Named preset: "reference", "medium", or "toy"
    pub preset: String,
}

impl Default for ParamSettings {
    fn default() -> Self {
        Self {
            preset: "reference".to_string(),
        }
    }
}

impl CipherNetConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults when no file is given
    pub fn load_optional(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn peer_timeout(&self) -> Option<Duration> {
        if self.network.peer_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.network.peer_timeout_secs))
        }
    }

    pub fn gc_options(&self) -> anyhow::Result<GcOptions> {
        let protocol = ciphernet_session::MpcProtocol::from_str(&self.mpc.protocol)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(GcOptions {
            enabled: self.mpc.enabled,
            protocol,
            security_level: self.mpc.security_level,
            bit_length: self.mpc.bit_length,
            threads: self.mpc.threads,
            reserve_gates: self.mpc.reserve_gates,
        })
    }

    pub fn parameters(&self) -> Result<EncryptionParameters, ConfigError> {
        preset_parameters(&self.params.preset)
    }
}

pub fn preset_parameters(name: &str) -> Result<EncryptionParameters, ConfigError> {
    match name.to_ascii_lowercase().as_str() {
        "reference" => Ok(EncryptionParameters::reference()),
        "medium" => Ok(EncryptionParameters::medium()),
        "toy" => Ok(EncryptionParameters::toy()),
        other => Err(ConfigError::Invalid(format!(
            "unknown parameter preset '{other}'"
        ))),
    }
}

/// Default retry schedule shared by client commands.
pub fn default_retry() -> RetrySchedule {
    RetrySchedule::default()
}

/// Parse the client input mode flag.
pub fn input_mode(plain: bool) -> InputMode {
    if plain {
        InputMode::Plain
    } else {
        InputMode::Encrypt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CipherNetConfig::default();
        assert_eq!(cfg.network.addr, "127.0.0.1:34000");
        assert!(cfg.mpc.enabled);
        assert_eq!(cfg.params.preset, "reference");
        assert!(cfg.peer_timeout().is_some());
    }

    #[test]
    fn test_preset_lookup() {
        assert!(preset_parameters("reference").is_ok());
        assert!(preset_parameters("toy").is_ok());
        assert!(matches!(
            preset_parameters("huge"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_toml() {
        let cfg: CipherNetConfig = toml::from_str(
            r#"
            [network]
            addr = "0.0.0.0:9000"
            mpc_addr = "0.0.0.0:9001"
            peer_timeout_secs = 0

            [mpc]
            enabled = false
            protocol = "yao"
            bit_length = 64
            threads = 2
            reserve_gates = 1024
            security_level = 128

            [params]
            preset = "toy"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.network.addr, "0.0.0.0:9000");
        assert!(cfg.peer_timeout().is_none());
        assert!(!cfg.mpc.enabled);
        assert_eq!(cfg.params.preset, "toy");
    }
}
