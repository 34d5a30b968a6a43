//! Runtime configuration (`proxygen.toml`)
//!
//! ```toml
//! [codegen]
//! target = "v2:baseline"
//!
//! [debug]
//! dump = true
//! ```
//!
//! Environment variables override the file: `PROXYGEN_TARGET` replaces
//! `codegen.target`, `PROXYGEN_DUMP` replaces `debug.dump`.

use std::path::{Path, PathBuf};

use proxygen_bytecode::{FeatureLevel, FormatVersion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::TargetOverride;

/// Environment variable overriding `codegen.target`
pub const ENV_TARGET: &str = "PROXYGEN_TARGET";
/// Environment variable overriding `debug.dump`
pub const ENV_DUMP: &str = "PROXYGEN_DUMP";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Malformed target string
    #[error("Invalid target '{0}': expected auto, v<N> or v<N>:<level>")]
    InvalidTarget(String),

    /// Target newer than the host supports
    #[error("Requested format {requested} is above the host maximum {host}")]
    AboveHost {
        requested: FormatVersion,
        host: FormatVersion,
    },

    /// Feature level not expressible in the format
    #[error("Feature level {level} is not available in format {version}")]
    LevelTooHigh {
        level: FeatureLevel,
        version: FormatVersion,
    },

    /// Malformed boolean in an environment variable
    #[error("Invalid value '{value}' for {var}: expected a boolean")]
    InvalidBool { var: &'static str, value: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyGenConfig {
    pub codegen: CodegenConfig,
    pub debug: DebugConfig,
}

/// Code generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenConfig {
    /// Target override (default: "auto")
    pub target: String,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            target: "auto".to_string(),
        }
    }
}

/// Diagnostics settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DebugConfig {
    /// Disassemble every generated type into the dump sink
    pub dump: bool,
}

impl ProxyGenConfig {
    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse a config from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ProxyGenConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target_override().map(|_| ())
    }

    /// Apply `PROXYGEN_*` variables from the process environment
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(target) = lookup(ENV_TARGET) {
            self.codegen.target = target;
        }
        if let Some(value) = lookup(ENV_DUMP) {
            self.debug.dump = parse_bool(&value).ok_or(ConfigError::InvalidBool {
                var: ENV_DUMP,
                value,
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// The parsed target override
    pub fn target_override(&self) -> Result<TargetOverride, ConfigError> {
        self.codegen.target.parse()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyGenConfig::default();
        assert_eq!(config.codegen.target, "auto");
        assert!(!config.debug.dump);
        assert_eq!(config.target_override().unwrap(), TargetOverride::Auto);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[codegen]
target = "v2:baseline"

[debug]
dump = true
"#;
        let config = ProxyGenConfig::parse(toml).unwrap();
        assert!(config.debug.dump);
        assert_eq!(
            config.target_override().unwrap(),
            TargetOverride::Exact(FormatVersion::V2, FeatureLevel::Baseline)
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ProxyGenConfig::parse("").unwrap();
        assert_eq!(config, ProxyGenConfig::default());
    }

    #[test]
    fn test_invalid_target_rejected() {
        let err = ProxyGenConfig::parse("[codegen]\ntarget = \"fast\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            ProxyGenConfig::parse("[codegen]\nturbo = true\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = ProxyGenConfig::default()
            .with_overrides(|var| match var {
                ENV_TARGET => Some("v1".to_string()),
                ENV_DUMP => Some("yes".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.codegen.target, "v1");
        assert!(config.debug.dump);
    }

    #[test]
    fn test_env_bad_bool() {
        let err = ProxyGenConfig::default()
            .with_overrides(|var| (var == ENV_DUMP).then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBool { .. }));
    }
}
