#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use certpulse::tls::{ProbeTarget, TrustAnchors, ensure_crypto_provider};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
};
use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
};
use std::{net::SocketAddr, sync::Arc};
use time::{Duration, OffsetDateTime};
use tokio::{io::AsyncReadExt, net::TcpListener, task::JoinHandle};
use tokio_rustls::TlsAcceptor;

pub const HOSTNAME: &str = "localhost";

/// A generated certificate and its key
pub struct Issued {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl Issued {
    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }
}

fn params(common_name: &str, ca: bool) -> CertificateParams {
    let mut params = if ca {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
    } else {
        CertificateParams::new(vec![common_name.to_string()]).unwrap()
    };
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params
}

pub fn root_ca(common_name: &str) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = params(common_name, true).self_signed(&key).unwrap();
    Issued { cert, key }
}

pub fn intermediate_ca(common_name: &str, issuer: &Issued) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = params(common_name, true)
        .signed_by(&key, &issuer.cert, &issuer.key)
        .unwrap();
    Issued { cert, key }
}

/// Leaf for `common_name`, valid from yesterday until `valid_for` from now
pub fn leaf(common_name: &str, issuer: &Issued, valid_for: Duration) -> Issued {
    let now = OffsetDateTime::now_utc();
    let mut params = params(common_name, false);
    params.not_before = now - Duration::days(1);
    params.not_after = now + valid_for;

    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Issued { cert, key }
}

/// Leaf whose validity ended a year ago
pub fn expired_leaf(common_name: &str, issuer: &Issued) -> Issued {
    let now = OffsetDateTime::now_utc();
    let mut params = params(common_name, false);
    params.not_before = now - Duration::days(730);
    params.not_after = now - Duration::days(365);

    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Issued { cert, key }
}

/// Leaf whose validity starts a month from now
pub fn future_leaf(common_name: &str, issuer: &Issued) -> Issued {
    let now = OffsetDateTime::now_utc();
    let mut params = params(common_name, false);
    params.not_before = now + Duration::days(30);
    params.not_after = now + Duration::days(400);

    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Issued { cert, key }
}

pub fn self_signed_leaf(common_name: &str, valid_for: Duration) -> Issued {
    let now = OffsetDateTime::now_utc();
    let mut params = params(common_name, false);
    params.not_before = now - Duration::days(1);
    params.not_after = now + valid_for;

    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

/// Platform roots plus the given certificates
pub fn anchors(trusted: &[&Issued]) -> TrustAnchors {
    let pem: String = trusted.iter().map(|issued| issued.cert.pem()).collect();
    TrustAnchors::from_pem(pem.as_bytes()).unwrap()
}

/// A TLS server on an ephemeral loopback port presenting `chain`
pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// `chain` starts with the leaf, `key` belongs to the leaf
    pub async fn start(chain: Vec<CertificateDer<'static>>, key: &KeyPair) -> Self {
        ensure_crypto_provider();

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    // the client rejecting the certificate is expected in some tests
                    if let Ok(mut tls) = acceptor.accept(stream).await {
                        let mut buf = [0u8; 64];
                        let _ = tls.read(&mut buf).await;
                    }
                });
            }
        });

        Self { addr, handle }
    }

    /// Target for `hostname` pointing at this server
    pub fn target(&self, hostname: &str) -> ProbeTarget {
        ProbeTarget::new(hostname)
            .with_port(self.addr.port())
            .with_timeout(5)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Accepts TCP connections but never answers the TLS handshake
pub struct SilentServer {
    pub addr: SocketAddr,
    _listener: TcpListener,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self {
            addr,
            _listener: listener,
        }
    }

    pub fn target(&self) -> ProbeTarget {
        ProbeTarget::new("127.0.0.1")
            .with_port(self.addr.port())
            .with_timeout(1)
    }
}
