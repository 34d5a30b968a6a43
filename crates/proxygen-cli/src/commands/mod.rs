//! Subcommand implementations

pub mod demo;
pub mod dump;
pub mod mappings;
pub mod targets;
pub mod templates;

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use proxygen_bytecode::FormatVersion;
use proxygen_engine::{ProxyGenConfig, ProxyRuntime};

/// Options shared by every subcommand
pub struct Options {
    pub config: Option<PathBuf>,
    pub target: Option<String>,
    pub host_max: u16,
}

impl Options {
    /// Config file, then `PROXYGEN_*` variables, then `--target`
    pub fn load_config(&self) -> anyhow::Result<ProxyGenConfig> {
        let config = match &self.config {
            Some(path) => ProxyGenConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProxyGenConfig::default(),
        };
        let mut config = config.with_env()?;
        if let Some(target) = &self.target {
            config.codegen.target = target.clone();
            config.validate()?;
        }
        log::debug!("config: target={}, dump={}", config.codegen.target, config.debug.dump);
        Ok(config)
    }

    pub fn host_max(&self) -> anyhow::Result<FormatVersion> {
        FormatVersion::from_u16(self.host_max)
            .ok_or_else(|| anyhow!("unknown format version {}", self.host_max))
    }

    /// Runtime over the demo host with every demo template declared
    pub fn runtime(&self) -> anyhow::Result<ProxyRuntime> {
        let runtime = ProxyRuntime::with_config(crate::demo::registry(self.host_max()?)?, self.load_config()?)?;
        for template in crate::demo::templates()? {
            let template = runtime.declare(template)?;
            log::debug!("declared template {}", template.id());
        }
        Ok(runtime)
    }
}
