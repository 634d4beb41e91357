use anyhow::{Result, bail};
use rustls::pki_types::ServerName;
use std::{collections::BTreeMap, fmt, net::IpAddr, str::FromStr};

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// A single endpoint to probe, immutable for the duration of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Used for the TCP connection and as the SNI server name
    pub hostname: String,
    pub port: u16,
    pub timeout_seconds: u64,
    /// Extra identifying labels, these win over the base certificate labels
    pub labels: BTreeMap<String, String>,
}

impl ProbeTarget {
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_PORT,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `host:port`, with brackets around IPv6 literals
    #[must_use]
    pub fn address(&self) -> String {
        if self.hostname.parse::<std::net::Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// Reject targets that could never be probed or exported
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname is not a valid server name, the port or
    /// timeout is zero, or a label key is not a valid Prometheus label name
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            bail!("target hostname cannot be empty");
        }

        if self.hostname.parse::<IpAddr>().is_err()
            && ServerName::try_from(self.hostname.as_str()).is_err()
        {
            bail!("invalid target hostname: {}", self.hostname);
        }

        if self.port == 0 {
            bail!("invalid port 0 for target {}", self.hostname);
        }

        if self.timeout_seconds == 0 {
            bail!("timeout must be at least 1 second for target {}", self.hostname);
        }

        for key in self.labels.keys() {
            if !is_valid_label_name(key) {
                bail!("invalid label name '{key}' for target {}", self.hostname);
            }
        }

        Ok(())
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.labels.get("target") {
            Some(id) => write!(f, "{id} ({})", self.address()),
            None => f.write_str(&self.address()),
        }
    }
}

impl FromStr for ProbeTarget {
    type Err = String;

    /// Accepts `host`, `host:port`, `[v6]:port` or a bare IPv6 literal
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty target".to_string());
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("Invalid target: {s}"))?;
            let target = Self::new(host);
            return match tail.strip_prefix(':') {
                Some(port) => Ok(target.with_port(parse_port(port, s)?)),
                None if tail.is_empty() => Ok(target),
                None => Err(format!("Invalid target: {s}")),
            };
        }

        if s.parse::<std::net::Ipv6Addr>().is_ok() {
            return Ok(Self::new(s));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => Ok(Self::new(host).with_port(parse_port(port, s)?)),
            None => Ok(Self::new(s)),
        }
    }
}

fn parse_port(port: &str, target: &str) -> Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("Invalid port in target: {target}"))
}

/// Prometheus label names: `[a-zA-Z_][a-zA-Z0-9_]*`, `__` prefix is reserved
#[must_use]
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}
