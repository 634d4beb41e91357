//! Health signals derived from a probe outcome
//!
//! Evaluation is a pure function of one outcome and its target. `None` means
//! there is nothing to report for this cycle, which is different from a sample
//! with zero values.

use crate::tls::{CertificateRecord, ProbeOutcome, ProbeTarget};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Subject of a known default/test certificate, always flagged as self-signed
pub const PLACEHOLDER_SUBJECT: &str = "www.example.org";
/// Issuer label for `SelfSigned` outcomes
pub const SELF_SIGNED_ISSUER: &str = "self-signed";
/// Label value when an attribute is not available
pub const UNKNOWN_LABEL: &str = "n/a";

pub const LABEL_ISSUER: &str = "issuer";
pub const LABEL_SUBJECT: &str = "subject";
pub const LABEL_NOT_AFTER: &str = "not_after";

const NOT_AFTER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SECONDS_PER_DAY: i64 = 86_400;

/// The four gauges published per probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HealthSignals {
    pub is_valid: bool,
    pub has_valid_hostname: bool,
    /// Whole days until expiry, negative once expired
    pub days_valid: i64,
    pub is_self_signed: bool,
}

impl HealthSignals {
    /// `(isvalid, valid_hostname, valid_days, selfsigned)` as gauge values
    #[must_use]
    pub fn gauge_values(&self) -> (i64, i64, i64, i64) {
        (
            i64::from(self.is_valid),
            i64::from(self.has_valid_hostname),
            self.days_valid,
            i64::from(self.is_self_signed),
        )
    }
}

/// Signals plus the label set they are published with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub signals: HealthSignals,
    pub labels: BTreeMap<String, String>,
}

/// Where the expiry used for `days_valid` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// `notAfter` from the certificate
    Certificate(DateTime<Utc>),
    /// No `notAfter`, the current time is used and `days_valid` becomes 0
    Now(DateTime<Utc>),
}

impl Expiry {
    #[must_use]
    pub fn resolve(record: &CertificateRecord, now: DateTime<Utc>) -> Self {
        record.not_after.map_or(Self::Now(now), Self::Certificate)
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Certificate(at) | Self::Now(at) => *at,
        }
    }
}

/// Evaluate against the current time
#[must_use]
pub fn evaluate(outcome: &ProbeOutcome, target: &ProbeTarget) -> Option<Evaluation> {
    evaluate_at(outcome, target, Utc::now())
}

/// Evaluate an outcome as of `now`
///
/// * `Unreachable` / `Unverifiable` produce no sample
/// * `SelfSigned` reports self-signed, invalid, zero days, issuer `self-signed`
/// * otherwise the certificate attributes decide every signal
///
/// Caller labels are merged last and win on key collision.
#[must_use]
pub fn evaluate_at(
    outcome: &ProbeOutcome,
    target: &ProbeTarget,
    now: DateTime<Utc>,
) -> Option<Evaluation> {
    let mut labels = base_labels();

    let signals = match outcome {
        ProbeOutcome::Unreachable | ProbeOutcome::Unverifiable => return None,
        ProbeOutcome::SelfSigned => {
            labels.insert(LABEL_ISSUER.to_string(), SELF_SIGNED_ISSUER.to_string());
            HealthSignals {
                is_self_signed: true,
                ..HealthSignals::default()
            }
        }
        ProbeOutcome::Certificate(record) | ProbeOutcome::Inconclusive(record) => {
            let expiry = Expiry::resolve(record, now).timestamp();

            labels.insert(
                LABEL_ISSUER.to_string(),
                record
                    .issuer_common_name
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            );
            labels.insert(
                LABEL_SUBJECT.to_string(),
                record.subject_common_name.clone(),
            );
            labels.insert(
                LABEL_NOT_AFTER.to_string(),
                expiry.format(NOT_AFTER_FORMAT).to_string(),
            );

            signals_for(record, &target.hostname, days_between(now, expiry))
        }
    };

    labels.extend(target.labels.clone());

    Some(Evaluation { signals, labels })
}

fn base_labels() -> BTreeMap<String, String> {
    [LABEL_ISSUER, LABEL_SUBJECT, LABEL_NOT_AFTER]
        .into_iter()
        .map(|key| (key.to_string(), UNKNOWN_LABEL.to_string()))
        .collect()
}

fn signals_for(record: &CertificateRecord, hostname: &str, days_valid: i64) -> HealthSignals {
    let subject = record.subject_common_name.as_str();

    let is_self_signed = record.issuer_common_name.as_deref() == Some(subject)
        || subject == PLACEHOLDER_SUBJECT;
    let has_valid_hostname = subject == hostname;

    HealthSignals {
        is_valid: days_valid > 0 && has_valid_hostname,
        has_valid_hostname,
        days_valid,
        is_self_signed,
    }
}

/// Whole days from `now` to `expiry`, rounded towards negative infinity
fn days_between(now: DateTime<Utc>, expiry: DateTime<Utc>) -> i64 {
    (expiry - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    fn target() -> ProbeTarget {
        ProbeTarget::new("bmc01.example.com")
    }

    fn record(subject: &str, issuer: &str, days: i64) -> CertificateRecord {
        CertificateRecord::new(subject)
            .issued_by(issuer)
            .expiring(now() + Duration::days(days))
    }

    fn eval(outcome: &ProbeOutcome) -> Evaluation {
        evaluate_at(outcome, &target(), now()).unwrap()
    }

    #[test]
    fn test_valid_certificate() {
        let outcome =
            ProbeOutcome::Certificate(record("bmc01.example.com", "Example Issuing CA", 30));
        let evaluation = eval(&outcome);

        assert_eq!(
            evaluation.signals,
            HealthSignals {
                is_valid: true,
                has_valid_hostname: true,
                days_valid: 30,
                is_self_signed: false,
            }
        );
        assert_eq!(evaluation.labels["issuer"], "Example Issuing CA");
        assert_eq!(evaluation.labels["subject"], "bmc01.example.com");
        assert_eq!(evaluation.labels["not_after"], "2026-11-14 12:00:00");
    }

    #[test]
    fn test_no_sample_without_certificate() {
        assert!(evaluate_at(&ProbeOutcome::Unreachable, &target(), now()).is_none());
        assert!(evaluate_at(&ProbeOutcome::Unverifiable, &target(), now()).is_none());
    }

    #[test]
    fn test_self_signed_outcome() {
        let evaluation = eval(&ProbeOutcome::SelfSigned);

        assert!(evaluation.signals.is_self_signed);
        assert!(!evaluation.signals.is_valid);
        assert!(!evaluation.signals.has_valid_hostname);
        assert_eq!(evaluation.signals.days_valid, 0);
        assert_eq!(evaluation.labels["issuer"], "self-signed");
        assert_eq!(evaluation.labels["subject"], "n/a");
        assert_eq!(evaluation.labels["not_after"], "n/a");
    }

    #[test]
    fn test_issuer_equals_subject_is_self_signed_and_still_valid() {
        let outcome =
            ProbeOutcome::Certificate(record("bmc01.example.com", "bmc01.example.com", 400));
        let signals = eval(&outcome).signals;

        assert!(signals.is_self_signed);
        assert!(signals.is_valid);
        assert!(signals.has_valid_hostname);
        assert_eq!(signals.days_valid, 400);
    }

    #[test]
    fn test_issuer_equals_subject_hostname_mismatch() {
        let outcome = ProbeOutcome::Certificate(record("bmc02", "bmc02", 400));
        let signals = eval(&outcome).signals;

        assert!(signals.is_self_signed);
        assert!(!signals.has_valid_hostname);
        assert!(!signals.is_valid);
    }

    #[test]
    fn test_placeholder_subject_is_self_signed() {
        let outcome = ProbeOutcome::Certificate(record(PLACEHOLDER_SUBJECT, "Some CA", 10));
        assert!(eval(&outcome).signals.is_self_signed);
    }

    #[test]
    fn test_expired_certificate() {
        let outcome = ProbeOutcome::Certificate(record("bmc01.example.com", "Example CA", -3));
        let signals = eval(&outcome).signals;

        assert_eq!(signals.days_valid, -3);
        assert!(signals.has_valid_hostname);
        assert!(!signals.is_valid);
    }

    #[test]
    fn test_partial_days_round_down() {
        let expires = now() + Duration::days(29) + Duration::hours(23);
        let outcome = ProbeOutcome::Certificate(
            CertificateRecord::new("bmc01.example.com").expiring(expires),
        );
        assert_eq!(eval(&outcome).signals.days_valid, 29);

        // one hour past expiry is already day -1
        let expired = now() - Duration::hours(1);
        let outcome = ProbeOutcome::Certificate(
            CertificateRecord::new("bmc01.example.com").expiring(expired),
        );
        assert_eq!(eval(&outcome).signals.days_valid, -1);
    }

    #[test]
    fn test_expires_today_is_not_valid() {
        let outcome = ProbeOutcome::Certificate(
            CertificateRecord::new("bmc01.example.com").expiring(now() + Duration::hours(5)),
        );
        let signals = eval(&outcome).signals;
        assert_eq!(signals.days_valid, 0);
        assert!(!signals.is_valid);
    }

    #[test]
    fn test_missing_not_after_falls_back_to_now() {
        let record = CertificateRecord::new("bmc01.example.com").issued_by("Example CA");
        assert_eq!(
            Expiry::resolve(&record, now()),
            Expiry::Now(now())
        );

        let evaluation = eval(&ProbeOutcome::Certificate(record));
        assert_eq!(evaluation.signals.days_valid, 0);
        assert!(!evaluation.signals.is_valid);
        assert!(evaluation.signals.has_valid_hostname);
        assert_eq!(evaluation.labels["not_after"], "2026-10-15 12:00:00");
    }

    #[test]
    fn test_missing_issuer_common_name() {
        let outcome = ProbeOutcome::Certificate(
            CertificateRecord::new("bmc01.example.com").expiring(now() + Duration::days(5)),
        );
        let evaluation = eval(&outcome);
        assert_eq!(evaluation.labels["issuer"], "n/a");
        assert!(!evaluation.signals.is_self_signed);
    }

    #[test]
    fn test_inconclusive_is_evaluated_like_certificate() {
        let record = record("bmc01.example.com", "Example Intermediate", 90);
        assert_eq!(
            eval(&ProbeOutcome::Inconclusive(record.clone())),
            eval(&ProbeOutcome::Certificate(record))
        );
    }

    #[test]
    fn test_hostname_match_is_exact() {
        for subject in ["BMC01.example.com", "*.example.com", "bmc01.example.com."] {
            let outcome = ProbeOutcome::Certificate(record(subject, "Example CA", 30));
            let signals = eval(&outcome).signals;
            assert!(!signals.has_valid_hostname, "{subject}");
            assert!(!signals.is_valid, "{subject}");
        }
    }

    #[test]
    fn test_caller_labels_win() {
        let target = target()
            .with_label("issuer", "custom")
            .with_label("target", "bmc01");

        let evaluation = evaluate_at(&ProbeOutcome::SelfSigned, &target, now()).unwrap();
        assert_eq!(evaluation.labels["issuer"], "custom");
        assert_eq!(evaluation.labels["target"], "bmc01");
        assert_eq!(evaluation.labels["subject"], "n/a");

        let outcome = ProbeOutcome::Certificate(record("bmc01.example.com", "Example CA", 30));
        let evaluation = evaluate_at(&outcome, &target, now()).unwrap();
        assert_eq!(evaluation.labels["issuer"], "custom");
        assert_eq!(evaluation.labels.len(), 4);
    }

    #[test]
    fn test_gauge_values() {
        let signals = HealthSignals {
            is_valid: false,
            has_valid_hostname: true,
            days_valid: -12,
            is_self_signed: true,
        };
        assert_eq!(signals.gauge_values(), (0, 1, -12, 1));
    }

    #[test]
    fn test_evaluate_uses_current_time() {
        let outcome = ProbeOutcome::Certificate(
            CertificateRecord::new("bmc01.example.com")
                .issued_by("Example CA")
                .expiring(Utc::now() + Duration::days(10) + Duration::hours(1)),
        );
        let evaluation = evaluate(&outcome, &target()).unwrap();
        assert_eq!(evaluation.signals.days_valid, 10);
        assert!(evaluation.signals.is_valid);
    }

    #[test]
    fn test_evaluation_serializes() {
        let evaluation = eval(&ProbeOutcome::SelfSigned);
        let json = serde_json::to_string(&evaluation).unwrap();
        assert!(json.contains("\"is_self_signed\":true"));
        assert!(json.contains("\"issuer\":\"self-signed\""));
    }
}
