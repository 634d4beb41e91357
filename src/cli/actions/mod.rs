mod run;

use crate::tls::ProbeTarget;
use std::{net::IpAddr, path::PathBuf};

/// Where targets and trust anchors come from, shared by every action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub ca_file: PathBuf,
    pub config: Option<PathBuf>,
    pub targets: Vec<ProbeTarget>,
    pub concurrency: usize,
}

/// Action enum representing each possible command
#[derive(Debug)]
pub enum Action {
    Serve {
        settings: ProbeSettings,
        listen: Option<IpAddr>,
        port: u16,
    },
    Once {
        settings: ProbeSettings,
    },
}

impl Action {
    /// Execute the action
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails to execute
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
