//! Target format and feature level selection
//!
//! The selection is made once per runtime: the newest format both the
//! generator and the host understand, unless an override pins it.

use std::fmt;
use std::str::FromStr;

use proxygen_bytecode::{FeatureLevel, FormatVersion};

use crate::config::ConfigError;

/// Requested target, as written in config or `PROXYGEN_TARGET`
///
/// Syntax: `auto`, `v<N>`, or `v<N>:<level>` where level is a number or one
/// of `baseline`, `fused-target`, `guarded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetOverride {
    #[default]
    Auto,
    Format(FormatVersion),
    Exact(FormatVersion, FeatureLevel),
}

impl FromStr for TargetOverride {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();
        if text == "auto" || text.is_empty() {
            return Ok(TargetOverride::Auto);
        }
        let invalid = || ConfigError::InvalidTarget(s.to_string());

        let (version_text, level_text) = match text.split_once(':') {
            Some((v, l)) => (v, Some(l)),
            None => (text.as_str(), None),
        };
        let number = version_text.strip_prefix('v').ok_or_else(invalid)?;
        let version = number
            .parse::<u16>()
            .ok()
            .and_then(FormatVersion::from_u16)
            .ok_or_else(invalid)?;

        match level_text {
            None => Ok(TargetOverride::Format(version)),
            Some(level_text) => {
                let level = parse_level(level_text).ok_or_else(invalid)?;
                if level > version.max_feature_level() {
                    return Err(ConfigError::LevelTooHigh { level, version });
                }
                Ok(TargetOverride::Exact(version, level))
            }
        }
    }
}

fn parse_level(text: &str) -> Option<FeatureLevel> {
    match text {
        "baseline" => Some(FeatureLevel::Baseline),
        "fused-target" | "fused" => Some(FeatureLevel::FusedTarget),
        "guarded" => Some(FeatureLevel::Guarded),
        other => other.parse::<u8>().ok().and_then(FeatureLevel::from_u8),
    }
}

impl fmt::Display for TargetOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOverride::Auto => f.write_str("auto"),
            TargetOverride::Format(v) => write!(f, "{}", v),
            TargetOverride::Exact(v, l) => write!(f, "{}:{}", v, l),
        }
    }
}

/// The format and feature level every generated type of a runtime uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSelection {
    pub format: FormatVersion,
    pub level: FeatureLevel,
    /// Host maximum at the time of selection
    pub host_max: FormatVersion,
    pub overridden: bool,
}

impl fmt::Display for TargetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "format {} / level {} (host max {}{})",
            self.format,
            self.level,
            self.host_max,
            if self.overridden { ", overridden" } else { "" }
        )
    }
}

/// Pick the target for a host
pub fn select(
    host_max: FormatVersion,
    requested: TargetOverride,
) -> Result<TargetSelection, ConfigError> {
    let (format, level, overridden) = match requested {
        TargetOverride::Auto => {
            let format = host_max.min(FormatVersion::LATEST);
            (format, format.max_feature_level(), false)
        }
        TargetOverride::Format(format) => (format, format.max_feature_level(), true),
        TargetOverride::Exact(format, level) => (format, level, true),
    };
    if format > host_max {
        return Err(ConfigError::AboveHost {
            requested: format,
            host: host_max,
        });
    }
    if level > format.max_feature_level() {
        return Err(ConfigError::LevelTooHigh {
            level,
            version: format,
        });
    }
    Ok(TargetSelection {
        format,
        level,
        host_max,
        overridden,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_override() {
        assert_eq!("auto".parse::<TargetOverride>().unwrap(), TargetOverride::Auto);
        assert_eq!(
            "v2".parse::<TargetOverride>().unwrap(),
            TargetOverride::Format(FormatVersion::V2)
        );
        assert_eq!(
            "V3:baseline".parse::<TargetOverride>().unwrap(),
            TargetOverride::Exact(FormatVersion::V3, FeatureLevel::Baseline)
        );
        assert_eq!(
            "v2:2".parse::<TargetOverride>().unwrap(),
            TargetOverride::Exact(FormatVersion::V2, FeatureLevel::FusedTarget)
        );
    }

    #[test]
    fn test_parse_override_rejects() {
        assert!("v9".parse::<TargetOverride>().is_err());
        assert!("3".parse::<TargetOverride>().is_err());
        assert!("v1:turbo".parse::<TargetOverride>().is_err());
        assert!(matches!(
            "v1:guarded".parse::<TargetOverride>(),
            Err(ConfigError::LevelTooHigh { .. })
        ));
    }

    #[test]
    fn test_auto_picks_newest_common() {
        let sel = select(FormatVersion::V2, TargetOverride::Auto).unwrap();
        assert_eq!(sel.format, FormatVersion::V2);
        assert_eq!(sel.level, FeatureLevel::FusedTarget);
        assert!(!sel.overridden);

        let sel = select(FormatVersion::V3, TargetOverride::Auto).unwrap();
        assert_eq!(sel.level, FeatureLevel::Guarded);
    }

    #[test]
    fn test_override_below_host() {
        let sel = select(
            FormatVersion::V3,
            TargetOverride::Exact(FormatVersion::V3, FeatureLevel::Baseline),
        )
        .unwrap();
        assert_eq!(sel.format, FormatVersion::V3);
        assert_eq!(sel.level, FeatureLevel::Baseline);
        assert!(sel.overridden);
    }

    #[test]
    fn test_override_above_host_is_error() {
        assert!(matches!(
            select(FormatVersion::V1, TargetOverride::Format(FormatVersion::V2)),
            Err(ConfigError::AboveHost { .. })
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        let o = TargetOverride::Exact(FormatVersion::V2, FeatureLevel::Baseline);
        assert_eq!(o.to_string(), "v2:baseline");
        assert_eq!(o.to_string().parse::<TargetOverride>().unwrap(), o);
    }
}
