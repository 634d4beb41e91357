use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

/// Attributes of a peer certificate needed to derive the health signals
///
/// A record only exists for certificates with a subject common name, so
/// `Certificate` and `Inconclusive` outcomes always carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub subject_common_name: String,
    pub issuer_common_name: Option<String>,
    /// `None` only for records built without a parsed validity period
    pub not_after: Option<DateTime<Utc>>,
}

impl CertificateRecord {
    #[must_use]
    pub fn new(subject_common_name: impl Into<String>) -> Self {
        Self {
            subject_common_name: subject_common_name.into(),
            issuer_common_name: None,
            not_after: None,
        }
    }

    #[must_use]
    pub fn issued_by(mut self, issuer_common_name: impl Into<String>) -> Self {
        self.issuer_common_name = Some(issuer_common_name.into());
        self
    }

    #[must_use]
    pub const fn expiring(mut self, not_after: DateTime<Utc>) -> Self {
        self.not_after = Some(not_after);
        self
    }

    /// Extract the record from a DER-encoded certificate
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed or has no subject
    /// common name
    pub fn from_der(cert_der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| anyhow!("failed to parse certificate: {e}"))?;

        let subject_common_name = common_name(cert.subject())
            .ok_or_else(|| anyhow!("certificate subject has no common name"))?;

        let raw = cert.validity().not_after.to_datetime();
        let not_after = DateTime::<Utc>::from_timestamp(raw.unix_timestamp(), raw.nanosecond());

        Ok(Self {
            subject_common_name,
            issuer_common_name: common_name(cert.issuer()),
            not_after,
        })
    }
}

fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(ToString::to_string)
}

/// Subject and issuer DNs are byte-identical
pub(crate) fn is_self_issued(cert: &X509Certificate<'_>) -> bool {
    cert.subject().as_raw() == cert.issuer().as_raw()
}
