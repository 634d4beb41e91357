//! TLS certificate probing
//!
//! This module connects to a TLS endpoint, verifies the presented chain
//! against the shared trust anchors and classifies the result.
//!
//! # Module Organization
//!
//! - `anchors` - Platform roots plus the supplemental CA file
//! - `metadata` - Certificate attributes extracted from the leaf
//! - `probe` - TCP connect, handshake and outcome classification
//! - `target` - The endpoint to probe
//! - `verifier` - Classifying certificate verifier
//!
//! # Example
//!
//! ```rust,ignore
//! use certpulse::tls::{ProbeTarget, TrustAnchors, probe};
//!
//! let anchors = TrustAnchors::load(Path::new(DEFAULT_CA_FILE)).await?;
//! let target = ProbeTarget::new("bmc01.example.com").with_label("target", "bmc01");
//!
//! let outcome = probe(&target, &anchors).await;
//! ```

pub mod anchors;
pub mod metadata;
pub mod probe;
pub mod target;
pub mod verifier;

// Re-export commonly used types
pub use anchors::{DEFAULT_CA_FILE, TrustAnchors};
pub use metadata::CertificateRecord;
pub use probe::{ProbeOutcome, ensure_crypto_provider, probe};
pub use target::{DEFAULT_PORT, DEFAULT_TIMEOUT_SECONDS, ProbeTarget};
pub use verifier::{CapturedVerdict, ClassifyingVerifier, Verdict};
