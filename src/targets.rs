//! Target list loading
//!
//! Targets come from an optional TOML file plus repeated `--target` flags:
//!
//! ```toml
//! [defaults]
//! port = 443
//! timeout = 10
//!
//! [[targets]]
//! hostname = "bmc01.example.com"
//! timeout = 5
//!
//! [targets.labels]
//! target = "bmc01"
//! ```

use crate::tls::{DEFAULT_PORT, DEFAULT_TIMEOUT_SECONDS, ProbeTarget};
use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

/// Label identifying a target when the configuration does not set one
pub const TARGET_LABEL: &str = "target";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetFile {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetEntry {
    pub hostname: String,
    pub port: Option<u16>,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl TargetFile {
    /// Read and parse a target file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read target file {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("invalid target file {}", path.display()))
    }

    /// # Errors
    ///
    /// Returns an error if `content` is not a valid target file
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply the defaults to every entry
    #[must_use]
    pub fn into_targets(self) -> Vec<ProbeTarget> {
        let defaults = self.defaults;
        self.targets
            .into_iter()
            .map(|entry| ProbeTarget {
                hostname: entry.hostname,
                port: entry.port.unwrap_or(defaults.port),
                timeout_seconds: entry.timeout.unwrap_or(defaults.timeout),
                labels: entry.labels,
            })
            .collect()
    }
}

/// Label a target with its `host:port`, unless already set
#[must_use]
pub fn with_target_label(target: ProbeTarget) -> ProbeTarget {
    if target.labels.contains_key(TARGET_LABEL) {
        return target;
    }
    let address = target.address();
    target.with_label(TARGET_LABEL, address)
}

/// Build and validate the full target list
///
/// # Errors
///
/// Returns an error if the file cannot be loaded, a target is invalid, or no
/// target is configured at all
pub async fn collect(config: Option<&Path>, flags: Vec<ProbeTarget>) -> Result<Vec<ProbeTarget>> {
    let mut targets = match config {
        Some(path) => {
            let targets = TargetFile::load(path).await?.into_targets();
            info!("loaded {} target(s) from {}", targets.len(), path.display());
            targets
        }
        None => Vec::new(),
    };

    targets.extend(flags);
    let targets: Vec<ProbeTarget> = targets.into_iter().map(with_target_label).collect();

    validate(&targets)?;

    for target in &targets {
        debug!("target {target}: timeout {}s", target.timeout_seconds);
    }

    Ok(targets)
}

/// # Errors
///
/// Returns an error if the list is empty, a target is invalid, or two targets
/// carry the same labels and would overwrite each other's series
pub fn validate(targets: &[ProbeTarget]) -> Result<()> {
    if targets.is_empty() {
        bail!("no targets configured, use --target or --config");
    }

    let mut seen: HashMap<&BTreeMap<String, String>, &ProbeTarget> = HashMap::new();

    for target in targets {
        target
            .validate()
            .with_context(|| format!("invalid target {}", target.address()))?;

        if let Some(first) = seen.insert(&target.labels, target) {
            bail!(
                "targets {} and {} have identical labels, set a distinct '{TARGET_LABEL}' label",
                first.address(),
                target.address()
            );
        }
    }

    Ok(())
}
