use super::{TrustAnchors, metadata::is_self_issued};
use anyhow::{Result, anyhow};
use log::debug;
use rustls::{
    CertificateError, DigitallySignedStruct, Error as TlsError, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};
use x509_parser::prelude::{FromDer, X509Certificate};

/// How chain verification of the peer certificate ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Chain verified against the trust anchors, hostname ignored
    Trusted,
    /// The leaf is self-issued and no anchor vouches for it
    SelfSigned,
    /// The leaf's issuer could not be found among presented or trusted certs
    IssuerUnavailable,
    /// Any other verification failure
    Rejected(String),
}

/// Verdict plus the leaf certificate it was reached for
#[derive(Debug, Clone)]
pub struct CapturedVerdict {
    pub verdict: Verdict,
    pub leaf: CertificateDer<'static>,
}

/// A certificate verifier that classifies verification failures instead of
/// only reporting them.
///
/// Chain validation is delegated to rustls's `WebPkiServerVerifier`; the
/// hostname check is skipped because the hostname match is reported as its own
/// signal. The verdict and the leaf are captured for the probe to inspect
/// after the handshake, and every verdict other than `Trusted` still fails the
/// handshake.
#[derive(Clone)]
pub struct ClassifyingVerifier {
    captured: Arc<Mutex<Option<CapturedVerdict>>>,
    inner_verifier: Arc<WebPkiServerVerifier>,
}

impl fmt::Debug for ClassifyingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifyingVerifier")
            .field("captured", &self.captured)
            .field("inner_verifier", &"WebPkiServerVerifier")
            .finish()
    }
}

impl ClassifyingVerifier {
    /// Create a verifier over the shared trust anchors
    ///
    /// # Errors
    ///
    /// Returns an error if the `WebPKI` verifier cannot be built
    pub fn new(anchors: &TrustAnchors) -> Result<Self> {
        let inner_verifier = WebPkiServerVerifier::builder(anchors.roots())
            .build()
            .map_err(|e| anyhow!("failed to build WebPKI verifier: {e}"))?;

        Ok(Self {
            captured: Arc::new(Mutex::new(None)),
            inner_verifier,
        })
    }

    /// Take the captured verdict, `None` if the handshake never reached
    /// certificate verification
    #[must_use]
    pub fn take_captured(&self) -> Option<CapturedVerdict> {
        self.captured.lock().ok()?.take()
    }

    fn record(&self, verdict: Verdict, leaf: &CertificateDer<'_>) {
        if let Ok(mut captured) = self.captured.lock() {
            *captured = Some(CapturedVerdict {
                verdict,
                leaf: leaf.clone().into_owned(),
            });
        }
    }

    fn verify_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<(), TlsError> {
        self.inner_verifier
            .verify_server_cert(end_entity, intermediates, server_name, &[], now)
            .map(|_| ())
    }
}

/// Map a chain verification error to a verdict
///
/// This is the only place that looks at rustls errors, everything else works
/// with `Verdict`.
#[must_use]
pub fn classify(
    error: &TlsError,
    leaf: &X509Certificate<'_>,
    intermediates: &[X509Certificate<'_>],
) -> Verdict {
    match error {
        TlsError::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
        ) => Verdict::Trusted,
        TlsError::InvalidCertificate(CertificateError::UnknownIssuer) => {
            if is_self_issued(leaf) {
                Verdict::SelfSigned
            } else if intermediates.last().is_some_and(is_self_issued) {
                Verdict::Rejected("self-signed certificate in certificate chain".to_string())
            } else {
                Verdict::IssuerUnavailable
            }
        }
        other => Verdict::Rejected(other.to_string()),
    }
}

/// A not-yet-valid leaf is not retried and ends up `Rejected`
fn is_expiry_error(error: &TlsError) -> bool {
    matches!(
        error,
        TlsError::InvalidCertificate(
            CertificateError::Expired | CertificateError::ExpiredContext { .. }
        )
    )
}

/// An instant halfway through the leaf's validity period
fn within_validity(leaf: &X509Certificate<'_>) -> Option<UnixTime> {
    let not_before = leaf.validity().not_before.timestamp();
    let not_after = leaf.validity().not_after.timestamp();
    let midpoint = not_before.checked_add(not_after.checked_sub(not_before)? / 2)?;
    let secs = u64::try_from(midpoint).ok()?;
    Some(UnixTime::since_unix_epoch(Duration::from_secs(secs)))
}

impl ServerCertVerifier for ClassifyingVerifier {
    /// Verify the chain and capture a verdict
    ///
    /// Expiry is not a verification failure here: the chain is checked again
    /// at an instant inside the leaf's validity period so that an expired but
    /// otherwise trusted certificate still reports its (negative) days.
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let Ok((_, leaf)) = X509Certificate::from_der(end_entity.as_ref()) else {
            let error = TlsError::InvalidCertificate(CertificateError::BadEncoding);
            self.record(Verdict::Rejected(error.to_string()), end_entity);
            return Err(error);
        };

        let mut result = self.verify_chain(end_entity, intermediates, server_name, now);
        let retry_at = match &result {
            Err(error) if is_expiry_error(error) => within_validity(&leaf),
            _ => None,
        };
        if let Some(instant) = retry_at {
            debug!("certificate for {server_name:?} has expired");
            result = self.verify_chain(end_entity, intermediates, server_name, instant);
        }

        let verdict = match &result {
            Ok(()) => Verdict::Trusted,
            Err(error) => {
                let parsed: Vec<X509Certificate<'_>> = intermediates
                    .iter()
                    .filter_map(|der| X509Certificate::from_der(der.as_ref()).ok())
                    .map(|(_, cert)| cert)
                    .collect();
                debug!("certificate verification error for {server_name:?}: {error}");
                classify(error, &leaf, &parsed)
            }
        };

        self.record(verdict.clone(), end_entity);

        match result {
            Err(error) if verdict != Verdict::Trusted => Err(error),
            _ => Ok(ServerCertVerified::assertion()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner_verifier
            .verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner_verifier
            .verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner_verifier.supported_verify_schemes()
    }
}
