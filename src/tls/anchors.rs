use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use rustls::{RootCertStore, pki_types::CertificateDer};
use rustls_pemfile::certs;
use std::{io::Cursor, path::Path, sync::Arc};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Organization CA loaded in addition to the platform roots
pub const DEFAULT_CA_FILE: &str = "/usr/local/share/ca-certificates/SAPNetCA_G2.crt";

/// Read-only trust anchors shared by every probe
///
/// Built once at startup from the bundled Mozilla roots plus one supplemental
/// PEM file, then handed to probes behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TrustAnchors {
    roots: Arc<RootCertStore>,
    supplemental: Vec<String>,
}

impl TrustAnchors {
    /// Only the bundled platform roots
    #[must_use]
    pub fn platform_only() -> Self {
        Self {
            roots: Arc::new(platform_roots()),
            supplemental: Vec::new(),
        }
    }

    /// Platform roots plus every certificate in `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or holds no usable
    /// certificate
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read trust anchor file {}", path.display()))?;

        let anchors = Self::from_pem(&data)
            .with_context(|| format!("invalid trust anchor file {}", path.display()))?;

        info!(
            "loaded {} platform roots and {} anchor(s) from {}",
            anchors.roots.len().saturating_sub(anchors.supplemental.len()),
            anchors.supplemental.len(),
            path.display()
        );
        for name in anchors.supplemental_names() {
            info!("trust anchor issuer name: {name}");
        }

        Ok(anchors)
    }

    /// Platform roots plus the PEM certificates in `pem`
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM is malformed, empty, or a certificate is
    /// rejected as a trust anchor
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(pem);
        let parsed = certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("invalid certificate PEM: {e}"))?;

        if parsed.is_empty() {
            anyhow::bail!("no certificates found");
        }

        Self::with_additional(parsed)
    }

    /// Platform roots plus already decoded certificates
    ///
    /// # Errors
    ///
    /// Returns an error if a certificate is rejected as a trust anchor
    pub fn with_additional(extra: Vec<CertificateDer<'static>>) -> Result<Self> {
        let mut roots = platform_roots();
        let mut supplemental = Vec::with_capacity(extra.len());

        for cert in extra {
            supplemental.push(anchor_name(&cert));
            roots
                .add(cert)
                .map_err(|e| anyhow!("certificate is not a usable trust anchor: {e}"))?;
        }

        Ok(Self {
            roots: Arc::new(roots),
            supplemental,
        })
    }

    #[must_use]
    pub fn roots(&self) -> Arc<RootCertStore> {
        debug!("using {} trust anchors", self.roots.len());
        Arc::clone(&self.roots)
    }

    /// Subject common names of the supplemental anchors
    #[must_use]
    pub fn supplemental_names(&self) -> &[String] {
        &self.supplemental
    }
}

fn platform_roots() -> RootCertStore {
    webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect()
}

fn anchor_name(cert: &CertificateDer<'_>) -> String {
    X509Certificate::from_der(cert.as_ref())
        .ok()
        .and_then(|(_, parsed)| {
            parsed
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| "n/a".to_string())
}
