use super::{
    CertificateRecord, ProbeTarget, TrustAnchors,
    verifier::{CapturedVerdict, ClassifyingVerifier, Verdict},
};
use anyhow::{Result, anyhow};
use log::{debug, warn};
use rustls::{ClientConfig, pki_types::ServerName};
use std::{
    net::IpAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tokio_rustls::{TlsConnector, client::TlsStream};

static CRYPTO_PROVIDER_INIT: OnceLock<()> = OnceLock::new();

/// Ensure the rustls crypto provider is initialized
///
/// This should be called before any TLS operations. It's safe to call
/// multiple times as initialization only happens once.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.get_or_init(|| {
        if let Err(err) = rustls::crypto::ring::default_provider().install_default() {
            // another provider was installed first, rustls will use that one
            debug!("ring crypto provider not installed: {err:?}");
        }
    });
}

/// Result of one probe
///
/// Probing a dead or misconfigured host is an expected result, so every
/// failure is a variant here rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The chain verified, hostname not considered
    Certificate(CertificateRecord),
    /// The peer presented a self-issued certificate no anchor vouches for
    SelfSigned,
    /// The issuer of the leaf could not be obtained, the leaf still could
    Inconclusive(CertificateRecord),
    /// Connecting or the handshake failed or exceeded the timeout
    Unreachable,
    /// Any other TLS failure, no certificate available
    Unverifiable,
}

impl ProbeOutcome {
    /// The certificate carried by this outcome, if any
    #[must_use]
    pub const fn certificate(&self) -> Option<&CertificateRecord> {
        match self {
            Self::Certificate(record) | Self::Inconclusive(record) => Some(record),
            Self::SelfSigned | Self::Unreachable | Self::Unverifiable => None,
        }
    }

    /// Short name used for metric labels and log lines
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Certificate(_) => "certificate",
            Self::SelfSigned => "self_signed",
            Self::Inconclusive(_) => "inconclusive",
            Self::Unreachable => "unreachable",
            Self::Unverifiable => "unverifiable",
        }
    }
}

/// Connect to the target, run a TLS handshake and classify the peer
/// certificate.
///
/// The connect and the handshake together are bounded by the target's
/// timeout. The connection is closed before returning on every path.
pub async fn probe(target: &ProbeTarget, anchors: &TrustAnchors) -> ProbeOutcome {
    debug!("target {target}: collecting certificate");

    ensure_crypto_provider();

    let verifier = match ClassifyingVerifier::new(anchors) {
        Ok(verifier) => verifier,
        Err(e) => {
            debug!("target {target}: {e:#}");
            return ProbeOutcome::Unverifiable;
        }
    };

    let limit = Duration::from_secs(target.timeout_seconds);
    let outcome = match timeout(limit, handshake(target, &verifier)).await {
        Ok(Ok(mut stream)) => {
            let outcome = from_session(target, &stream);
            // close_notify, failures here do not change the result
            let _ = stream.shutdown().await;
            outcome
        }
        Ok(Err(HandshakeFailure::Connect(e))) => {
            debug!("target {target}: connection failed: {e:#}");
            ProbeOutcome::Unreachable
        }
        Ok(Err(HandshakeFailure::Tls(e))) => {
            debug!("target {target}: TLS handshake failed: {e:#}");
            from_captured(target, verifier.take_captured())
        }
        Err(_) => {
            debug!("target {target}: timeout after {}s", target.timeout_seconds);
            ProbeOutcome::Unreachable
        }
    };

    debug!("target {target}: outcome {}", outcome.kind());
    outcome
}

enum HandshakeFailure {
    Connect(anyhow::Error),
    Tls(anyhow::Error),
}

async fn handshake(
    target: &ProbeTarget,
    verifier: &ClassifyingVerifier,
) -> Result<TlsStream<TcpStream>, HandshakeFailure> {
    let connector = build_tls_connector(verifier.clone());
    let server_name = server_name_from_host(&target.hostname).map_err(HandshakeFailure::Tls)?;

    let stream = TcpStream::connect((target.hostname.as_str(), target.port))
        .await
        .map_err(|e| HandshakeFailure::Connect(anyhow!("{}: {e}", target.address())))?;

    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| HandshakeFailure::Tls(e.into()))
}

/// Each probe gets its own client configuration; only the roots are shared
fn build_tls_connector(verifier: ClassifyingVerifier) -> TlsConnector {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

fn server_name_from_host(host: &str) -> Result<ServerName<'static>> {
    host.parse::<IpAddr>().map_or_else(
        |_| {
            ServerName::try_from(host.to_string())
                .map_err(|_| anyhow!("invalid server name: {host}"))
        },
        |ip| Ok(ServerName::from(ip).to_owned()),
    )
}

fn from_session(target: &ProbeTarget, stream: &TlsStream<TcpStream>) -> ProbeOutcome {
    let (_, connection) = stream.get_ref();
    let Some(leaf) = connection.peer_certificates().and_then(<[_]>::first) else {
        debug!("target {target}: no peer certificate");
        return ProbeOutcome::Unverifiable;
    };

    // a leaf without a subject CN (SAN-only) has no record and exports no series
    match CertificateRecord::from_der(leaf.as_ref()) {
        Ok(record) => ProbeOutcome::Certificate(record),
        Err(e) => {
            warn!("target {target}: certificate not exported: {e:#}");
            ProbeOutcome::Unverifiable
        }
    }
}

fn from_captured(target: &ProbeTarget, captured: Option<CapturedVerdict>) -> ProbeOutcome {
    let Some(CapturedVerdict { verdict, leaf }) = captured else {
        // failed before certificate verification
        return ProbeOutcome::Unverifiable;
    };

    match verdict {
        Verdict::SelfSigned => ProbeOutcome::SelfSigned,
        Verdict::IssuerUnavailable => match CertificateRecord::from_der(leaf.as_ref()) {
            Ok(record) => ProbeOutcome::Inconclusive(record),
            Err(e) => {
                warn!("target {target}: certificate not exported: {e:#}");
                ProbeOutcome::Unverifiable
            }
        },
        Verdict::Rejected(reason) => {
            debug!("target {target}: verify message: {reason}");
            ProbeOutcome::Unverifiable
        }
        // the handshake failed after the chain was accepted
        Verdict::Trusted => ProbeOutcome::Unverifiable,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use rustls::pki_types::CertificateDer;

    #[test]
    fn test_crypto_provider_init() {
        // Should not panic
        ensure_crypto_provider();
        ensure_crypto_provider(); // Second call should be idempotent
    }

    #[test]
    fn test_server_name_from_hostname() {
        assert!(server_name_from_host("example.com").is_ok());
        assert!(server_name_from_host("bmc01.example.com").is_ok());
    }

    #[test]
    fn test_server_name_from_ip() {
        assert!(server_name_from_host("127.0.0.1").is_ok());
        assert!(server_name_from_host("::1").is_ok());
    }

    #[test]
    fn test_server_name_invalid() {
        assert!(server_name_from_host("").is_err());
        assert!(server_name_from_host("invalid host name with spaces").is_err());
    }

    #[test]
    fn test_outcome_certificate() {
        let record = CertificateRecord::new("bmc01");
        assert_eq!(
            ProbeOutcome::Certificate(record.clone()).certificate(),
            Some(&record)
        );
        assert_eq!(
            ProbeOutcome::Inconclusive(record.clone()).certificate(),
            Some(&record)
        );
        assert!(ProbeOutcome::SelfSigned.certificate().is_none());
        assert!(ProbeOutcome::Unreachable.certificate().is_none());
        assert!(ProbeOutcome::Unverifiable.certificate().is_none());
    }

    #[test]
    fn test_outcome_kind() {
        assert_eq!(ProbeOutcome::SelfSigned.kind(), "self_signed");
        assert_eq!(ProbeOutcome::Unreachable.kind(), "unreachable");
        assert_eq!(
            ProbeOutcome::Inconclusive(CertificateRecord::new("x")).kind(),
            "inconclusive"
        );
    }

    #[test]
    fn test_from_captured_without_verdict() {
        let target = ProbeTarget::new("bmc01");
        assert_eq!(from_captured(&target, None), ProbeOutcome::Unverifiable);
    }

    #[test]
    fn test_from_captured_verdicts() {
        let target = ProbeTarget::new("bmc01");
        let leaf = CertificateDer::from(vec![0x30, 0x00]);

        let captured = |verdict| {
            Some(CapturedVerdict {
                verdict,
                leaf: leaf.clone(),
            })
        };

        assert_eq!(
            from_captured(&target, captured(Verdict::SelfSigned)),
            ProbeOutcome::SelfSigned
        );
        assert_eq!(
            from_captured(&target, captured(Verdict::Rejected("bad signature".into()))),
            ProbeOutcome::Unverifiable
        );
        // an unparsable leaf cannot back an inconclusive outcome
        assert_eq!(
            from_captured(&target, captured(Verdict::IssuerUnavailable)),
            ProbeOutcome::Unverifiable
        );
    }

    #[tokio::test]
    async fn test_probe_refused_is_unreachable() {
        // bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let target = ProbeTarget::new("127.0.0.1").with_port(port).with_timeout(2);

        let outcome = probe(&target, &TrustAnchors::platform_only()).await;
        assert_eq!(outcome, ProbeOutcome::Unreachable);
    }
}
