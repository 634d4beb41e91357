//! Probe TLS endpoints and export certificate health as Prometheus gauges
//!
//! Each scrape connects to every configured target, verifies the presented
//! chain against the platform roots plus one supplemental CA file and reports
//! four gauges per target:
//!
//! - `redfish_certificate_isvalid`
//! - `redfish_certificate_valid_hostname`
//! - `redfish_certificate_valid_days`
//! - `redfish_certificate_selfsigned`

pub mod cli;
pub mod evaluate;
pub mod exporter;
pub mod metrics;
pub mod targets;
pub mod tls;
