//! Prometheus metric definitions for the speedtest exporter
//!
//! The exporter does not keep metrics in a global registry. Each scrape
//! produces a fresh list of [`Observation`]s which is encoded into a
//! throw-away registry, so nothing from a previous run can leak into the
//! next exposition.

use crate::error::{ExporterError, Result};
use crate::types::{Server, UserInfo};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

pub const NAMESPACE: &str = "speedtest";

/// Label schema shared by the latency, upload and download gauges.
pub const SERVER_LABELS: [&str; 10] = [
    "user_lat",
    "user_lon",
    "user_ip",
    "user_isp",
    "server_lat",
    "server_lon",
    "server_id",
    "server_name",
    "server_country",
    "distance",
];

/// Static description of one exported gauge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

impl MetricDesc {
    /// Fully qualified metric name, e.g. `speedtest_up`.
    pub fn fq_name(&self) -> String {
        format!("{}_{}", NAMESPACE, self.name)
    }
}

pub const UP: MetricDesc = MetricDesc {
    name: "up",
    help: "Whether the last speedtest was successful",
    labels: &[],
};

pub const SCRAPE_DURATION: MetricDesc = MetricDesc {
    name: "scrape_duration_seconds",
    help: "Duration of the last speedtest scrape in seconds",
    labels: &[],
};

pub const LATENCY: MetricDesc = MetricDesc {
    name: "latency_seconds",
    help: "Measured latency in seconds from the last speedtest",
    labels: &SERVER_LABELS,
};

pub const UPLOAD: MetricDesc = MetricDesc {
    name: "upload_speed_bytes_per_second",
    help: "Upload speed in bytes per second from the last speedtest",
    labels: &SERVER_LABELS,
};

pub const DOWNLOAD: MetricDesc = MetricDesc {
    name: "download_speed_bytes_per_second",
    help: "Download speed in bytes per second from the last speedtest",
    labels: &SERVER_LABELS,
};

/// The gauges a scrape can emit, in describe order.
pub const DESCRIPTORS: [&MetricDesc; 5] = [&UP, &SCRAPE_DURATION, &LATENCY, &UPLOAD, &DOWNLOAD];

/// One labelled data point of a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub desc: &'static MetricDesc,
    pub labels: Vec<String>,
    pub value: f64,
}

impl Observation {
    pub fn new(desc: &'static MetricDesc, value: f64) -> Self {
        Self {
            desc,
            labels: Vec::new(),
            value,
        }
    }

    pub fn with_labels(desc: &'static MetricDesc, labels: Vec<String>, value: f64) -> Self {
        Self {
            desc,
            labels,
            value,
        }
    }

    /// Value of a label by name, if the metric carries it.
    #[cfg(test)]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.desc
            .labels
            .iter()
            .position(|l| *l == name)
            .and_then(|idx| self.labels.get(idx))
            .map(String::as_str)
    }
}

/// Label values for [`SERVER_LABELS`], in the same order.
pub fn label_values(user: &UserInfo, server: &Server) -> Vec<String> {
    vec![
        user.lat.clone(),
        user.lon.clone(),
        user.ip.clone(),
        user.isp.clone(),
        server.lat.clone(),
        server.lon.clone(),
        server.id.clone(),
        server.name.clone(),
        server.country.clone(),
        format!("{:.0}", server.distance),
    ]
}

/// Encode observations to the Prometheus text exposition format
pub fn encode(observations: &[Observation]) -> Result<String> {
    let registry = Registry::new();

    for desc in DESCRIPTORS {
        let points: Vec<&Observation> = observations
            .iter()
            .filter(|o| o.desc == desc)
            .collect();
        if points.is_empty() {
            continue;
        }

        let opts = Opts::new(desc.name, desc.help).namespace(NAMESPACE);
        if desc.labels.is_empty() {
            let gauge = Gauge::with_opts(opts)?;
            for point in &points {
                gauge.set(point.value);
            }
            registry.register(Box::new(gauge))?;
        } else {
            let gauge = GaugeVec::new(opts, desc.labels)?;
            for point in &points {
                let values: Vec<&str> = point.labels.iter().map(String::as_str).collect();
                gauge
                    .get_metric_with_label_values(values.as_slice())?
                    .set(point.value);
            }
            registry.register(Box::new(gauge))?;
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| ExporterError::Custom(format!("exposition is not UTF-8: {}", e)))
}

/// Content type of [`encode`]'s output.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserInfo {
        UserInfo {
            ip: "1.2.3.4".to_string(),
            lat: "40.7128".to_string(),
            lon: "-74.0060".to_string(),
            isp: "TestISP".to_string(),
        }
    }

    fn server() -> Server {
        Server {
            lat: "34.0522".to_string(),
            lon: "-118.2437".to_string(),
            distance: 123.456,
            ..Server::new("100", "TestServer", "US")
        }
    }

    #[test]
    fn test_label_values_order() {
        let values = label_values(&user(), &server());
        assert_eq!(
            values,
            vec![
                "40.7128",
                "-74.0060",
                "1.2.3.4",
                "TestISP",
                "34.0522",
                "-118.2437",
                "100",
                "TestServer",
                "US",
                "123",
            ]
        );
    }

    #[test]
    fn test_distance_is_rounded() {
        let mut s = server();
        s.distance = 0.6;
        assert_eq!(label_values(&user(), &s)[9], "1");
    }

    #[test]
    fn test_descriptor_names() {
        let names: Vec<String> = DESCRIPTORS.iter().map(|d| d.fq_name()).collect();
        assert_eq!(
            names,
            vec![
                "speedtest_up",
                "speedtest_scrape_duration_seconds",
                "speedtest_latency_seconds",
                "speedtest_upload_speed_bytes_per_second",
                "speedtest_download_speed_bytes_per_second",
            ]
        );
    }

    #[test]
    fn test_observation_label_lookup() {
        let obs = Observation::with_labels(&LATENCY, label_values(&user(), &server()), 0.01);
        assert_eq!(obs.label("server_id"), Some("100"));
        assert_eq!(obs.label("distance"), Some("123"));
        assert_eq!(obs.label("nope"), None);
        assert_eq!(Observation::new(&UP, 1.0).label("server_id"), None);
    }

    #[test]
    fn test_encode() -> Result<()> {
        let observations = vec![
            Observation::with_labels(&DOWNLOAD, label_values(&user(), &server()), 1e8),
            Observation::new(&UP, 1.0),
            Observation::new(&SCRAPE_DURATION, 2.5),
        ];
        let text = encode(&observations)?;

        assert!(text.contains("# TYPE speedtest_up gauge"));
        assert!(text.contains("speedtest_up 1"));
        assert!(text.contains("speedtest_scrape_duration_seconds 2.5"));
        assert!(text.contains("speedtest_download_speed_bytes_per_second{"));
        assert!(text.contains("server_id=\"100\""));
        assert!(text.contains("distance=\"123\""));
        // absent stages are not described either
        assert!(!text.contains("speedtest_latency_seconds"));
        assert!(!text.contains("speedtest_upload_speed_bytes_per_second"));
        Ok(())
    }
}
