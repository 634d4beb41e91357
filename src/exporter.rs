use crate::{
    evaluate::{Evaluation, evaluate},
    metrics::{
        CertificateGauges, PROBE_DURATION, PROBE_OUTCOMES, REGISTRY, SCRAPES, encode_metrics,
    },
    tls::{ProbeOutcome, ProbeTarget, TrustAnchors, probe},
};
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use futures::{StreamExt, stream};
use log::{error, info, warn};
use serde::Serialize;
use std::{net::IpAddr, sync::Arc};
use tokio::net::TcpListener;

pub const DEFAULT_PORT: u16 = 9220;
pub const DEFAULT_CONCURRENCY: usize = 8;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Probe result for one target in one cycle
#[derive(Debug, Clone)]
pub struct Sample {
    pub target: ProbeTarget,
    pub outcome: ProbeOutcome,
    pub evaluation: Option<Evaluation>,
}

/// One line of `--once` output
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub target: String,
    pub outcome: &'static str,
    pub sample: Option<&'a Evaluation>,
}

impl<'a> From<&'a Sample> for Report<'a> {
    fn from(sample: &'a Sample) -> Self {
        Self {
            target: sample.target.address(),
            outcome: sample.outcome.kind(),
            sample: sample.evaluation.as_ref(),
        }
    }
}

/// Probes every configured target on demand
#[derive(Debug)]
pub struct Exporter {
    targets: Vec<ProbeTarget>,
    anchors: TrustAnchors,
    concurrency: usize,
}

impl Exporter {
    #[must_use]
    pub fn new(targets: Vec<ProbeTarget>, anchors: TrustAnchors, concurrency: usize) -> Self {
        Self {
            targets,
            anchors,
            concurrency: concurrency.max(1),
        }
    }

    #[must_use]
    pub fn targets(&self) -> &[ProbeTarget] {
        &self.targets
    }

    /// Probe and evaluate every target, in configuration order
    pub async fn collect(&self) -> Vec<Sample> {
        let anchors = self.anchors.clone();
        let probes = self.targets.clone().into_iter().enumerate().map(move |(index, target)| {
            let anchors = anchors.clone();
            async move {
                let timer = PROBE_DURATION.start_timer();
                let outcome = probe(&target, &anchors).await;
                timer.observe_duration();

                PROBE_OUTCOMES.with_label_values(&[outcome.kind()]).inc();

                let evaluation = evaluate(&outcome, &target);
                (
                    index,
                    Sample {
                        target,
                        outcome,
                        evaluation,
                    },
                )
            }
        });

        let mut samples: Vec<(usize, Sample)> = stream::iter(probes)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        samples.sort_by_key(|(index, _)| *index);
        samples.into_iter().map(|(_, sample)| sample).collect()
    }

    /// Probe all targets and encode the gauges plus self metrics
    ///
    /// # Errors
    ///
    /// Returns an error if the gauges cannot be built or encoded
    pub async fn render(&self) -> Result<Vec<u8>> {
        SCRAPES.inc();

        let evaluations: Vec<Evaluation> = self
            .collect()
            .await
            .into_iter()
            .filter_map(|sample| sample.evaluation)
            .collect();

        let gauges = CertificateGauges::from_evaluations(&evaluations)?;

        encode_metrics(&[gauges.registry(), &REGISTRY]).map_err(anyhow::Error::msg)
    }

    /// Probe all targets once and return one JSON document per target
    ///
    /// # Errors
    ///
    /// Returns an error if a report cannot be serialized
    pub async fn report(&self) -> Result<Vec<String>> {
        self.collect()
            .await
            .iter()
            .map(|sample| {
                serde_json::to_string(&Report::from(sample)).context("could not serialize report")
            })
            .collect()
    }
}

pub fn router(exporter: Arc<Exporter>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(exporter)
}

async fn metrics_handler(State(exporter): State<Arc<Exporter>>) -> impl IntoResponse {
    match exporter.render().await {
        Ok(buffer) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], buffer),
        Err(e) => {
            error!("could not render metrics: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, TEXT_FORMAT)],
                Vec::new(),
            )
        }
    }
}

/// Bind the listener, `[::]` first and `0.0.0.0` if IPv6 is unavailable
///
/// # Errors
///
/// Returns an error if no address can be bound
pub async fn bind(listen: Option<IpAddr>, port: u16) -> Result<(TcpListener, String)> {
    match listen {
        Some(addr) => {
            let socket_addr = match addr {
                IpAddr::V4(v4) => format!("{v4}:{port}"),
                IpAddr::V6(v6) => format!("[{v6}]:{port}"),
            };
            let listener = TcpListener::bind(&socket_addr)
                .await
                .with_context(|| format!("failed to bind {socket_addr}"))?;
            Ok((listener, socket_addr))
        }
        None => {
            if let Ok(listener) = TcpListener::bind(format!("[::]:{port}")).await {
                Ok((listener, format!("[::]:{port}")))
            } else {
                warn!("IPv6 unavailable, falling back to IPv4");
                let socket_addr = format!("0.0.0.0:{port}");
                let listener = TcpListener::bind(&socket_addr)
                    .await
                    .with_context(|| format!("failed to bind {socket_addr}"))?;
                Ok((listener, socket_addr))
            }
        }
    }
}

/// Serve `/metrics` until interrupted
///
/// # Errors
///
/// Returns an error if the service fails to bind or stops unexpectedly
pub async fn start(exporter: Exporter, listen: Option<IpAddr>, port: u16) -> Result<()> {
    let (listener, bind_addr) = bind(listen, port).await?;

    info!(
        "listening on {bind_addr}, {} target(s), concurrency {}",
        exporter.targets().len(),
        exporter.concurrency
    );

    axum::serve(listener, router(Arc::new(exporter)).into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
            }
        })
        .await
        .context("metrics server stopped")
}
