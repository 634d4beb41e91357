use crate::evaluate::Evaluation;
use anyhow::{Context, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    opts, register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry,
};
use std::{collections::BTreeSet, sync::LazyLock};

pub const IS_VALID: &str = "redfish_certificate_isvalid";
pub const VALID_HOSTNAME: &str = "redfish_certificate_valid_hostname";
pub const VALID_DAYS: &str = "redfish_certificate_valid_days";
pub const SELF_SIGNED: &str = "redfish_certificate_selfsigned";

/// Exporter self metrics, kept for the lifetime of the process
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

trait ResultExt<T> {
    fn or_exit(self, context: &str) -> T;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_exit(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                eprintln!("failed to initialize metric ({context}): {err}");
                std::process::exit(1);
            }
        }
    }
}

pub static PROBE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram_with_registry!(
        HistogramOpts::new(
            "certpulse_probe_duration_seconds",
            "Duration of a single certificate probe in seconds"
        ),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static PROBE_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!(
            "certpulse_probe_outcomes_total",
            "Total certificate probes by outcome"
        ),
        &["outcome"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static SCRAPES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter_with_registry!(
        opts!("certpulse_scrapes_total", "Total metric scrapes served"),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

/// The four certificate gauge families for one scrape
///
/// Built from scratch on every scrape, so a target that stops producing a
/// sample disappears instead of repeating its last value.
pub struct CertificateGauges {
    registry: Registry,
    is_valid: IntGaugeVec,
    valid_hostname: IntGaugeVec,
    valid_days: IntGaugeVec,
    self_signed: IntGaugeVec,
}

impl CertificateGauges {
    /// Register the gauge families and set one sample per evaluation
    ///
    /// Label names are the union over all evaluations, a label an
    /// evaluation does not carry is exported as the empty string.
    ///
    /// # Errors
    ///
    /// Returns an error if a label name is not a valid prometheus label
    pub fn from_evaluations(evaluations: &[Evaluation]) -> Result<Self> {
        let label_names: Vec<&str> = evaluations
            .iter()
            .flat_map(|evaluation| evaluation.labels.keys().map(String::as_str))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let registry = Registry::new();
        let gauge = |name: &str, help: &str| -> Result<IntGaugeVec> {
            let vec = IntGaugeVec::new(Opts::new(name, help), &label_names)
                .with_context(|| format!("could not create {name}"))?;
            registry
                .register(Box::new(vec.clone()))
                .with_context(|| format!("could not register {name}"))?;
            Ok(vec)
        };

        let gauges = Self {
            is_valid: gauge(IS_VALID, "Redfish Server Monitoring certificate is valid")?,
            valid_hostname: gauge(
                VALID_HOSTNAME,
                "Redfish Server Monitoring certificate has valid hostname",
            )?,
            valid_days: gauge(
                VALID_DAYS,
                "Redfish Server Monitoring certificate valid for days",
            )?,
            self_signed: gauge(
                SELF_SIGNED,
                "Redfish Server Monitoring certificate is self-signed",
            )?,
            registry,
        };

        for evaluation in evaluations {
            let values: Vec<&str> = label_names
                .iter()
                .map(|name| evaluation.labels.get(*name).map_or("", String::as_str))
                .collect();
            let (is_valid, valid_hostname, valid_days, self_signed) =
                evaluation.signals.gauge_values();

            gauges.is_valid.with_label_values(&values).set(is_valid);
            gauges
                .valid_hostname
                .with_label_values(&values)
                .set(valid_hostname);
            gauges.valid_days.with_label_values(&values).set(valid_days);
            gauges.self_signed.with_label_values(&values).set(self_signed);
        }

        Ok(gauges)
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Encode the given registries for HTTP export
///
/// # Errors
///
/// Returns an error if metrics encoding fails
pub fn encode_metrics(registries: &[&Registry]) -> Result<Vec<u8>, String> {
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();

    let families: Vec<_> = registries
        .iter()
        .flat_map(|registry| registry.gather())
        .collect();

    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| format!("could not encode metrics: {e}"))?;

    Ok(buffer)
}
