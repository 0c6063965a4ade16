// SPDX-License-Identifier: Apache-2.0

//! Structured enrichment of accepted lines. Gateway access lines gain
//! geo labels for the requesting IP and a severity level derived from
//! the HTTP status code; every other job carries only its job label.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use tracing::info;

use crate::geoip::GeoLookup;

/// Job whose lines are combined-log-format access lines.
pub const GATEWAY_JOB: &str = "gateway";

/// One enriched line ready for delivery. The timestamp is the
/// wall-clock time of enrichment, not the log's own timestamp; the
/// backend orders by ingestion time.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub job: String,
    pub line: String,
    pub timestamp_ns: i64,
    pub labels: BTreeMap<String, String>,
}

// Patterns are literals; compilation cannot fail at runtime.
#[allow(clippy::unwrap_used)]
fn status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^(?P<ip>\S+)\s+-\s+-\s+\[[^\]]+\]\s+"[^"]+"\s+(?P<status>\d{3})\s"#).unwrap()
    })
}

#[allow(clippy::unwrap_used)]
fn ip_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{1,3}(?:\.\d{1,3}){3})").unwrap())
}

/// Extracts the HTTP status code from a combined-log-format access
/// line, or `None` if the line does not look like one.
pub fn extract_status_code(line: &str) -> Option<u16> {
    status_pattern()
        .captures(line)?
        .name("status")?
        .as_str()
        .parse()
        .ok()
}

/// Maps an HTTP status code to a severity label, used for color coding
/// in the backend's panels.
pub fn map_status_to_level(code: u16) -> Option<&'static str> {
    match code {
        200..=298 | 304 => Some("info"),
        300 | 301 | 307 | 308 => Some("warn"),
        400..=599 => Some("error"),
        _ => None,
    }
}

/// Extracts a leading dotted-decimal IPv4 address.
pub fn extract_ip(line: &str) -> Option<IpAddr> {
    ip_pattern().captures(line)?.get(1)?.as_str().parse().ok()
}

/// Builds the delivery record for one accepted line.
pub fn enrich(job: &str, line: &str, geo: &dyn GeoLookup) -> LogRecord {
    let mut labels = BTreeMap::new();
    labels.insert("job".to_string(), job.to_string());

    if job == GATEWAY_JOB {
        if let Some(ip) = extract_ip(line) {
            match geo.lookup(ip) {
                Some(info) => {
                    labels.insert("lat".to_string(), info.latitude.to_string());
                    labels.insert("lon".to_string(), info.longitude.to_string());
                    labels.insert("country".to_string(), info.country);
                }
                // The line is still pushed, just without geo labels.
                None => info!(job, %ip, "no geo data for request IP"),
            }
        }
        if let Some(level) = extract_status_code(line).and_then(map_status_to_level) {
            labels.insert("level".to_string(), level.to_string());
        }
    }

    LogRecord {
        job: job.to_string(),
        line: line.to_string(),
        timestamp_ns: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoip::{GeoInfo, NoopLookup};
    use tracing_test::traced_test;

    struct FakeGeo;

    impl GeoLookup for FakeGeo {
        fn lookup(&self, ip: IpAddr) -> Option<GeoInfo> {
            if ip == "8.8.8.8".parse::<IpAddr>().unwrap() {
                Some(GeoInfo {
                    latitude: 37.751,
                    longitude: -97.822,
                    country: "US".to_string(),
                })
            } else {
                None
            }
        }
    }

    const ACCESS_LINE: &str =
        r#"8.8.8.8 - - [10/Oct/2023:13:55:36 +0000] "GET / HTTP/1.1" 200 612 "-" "curl/8.0""#;

    #[test]
    fn status_code_extraction() {
        assert_eq!(extract_status_code(ACCESS_LINE), Some(200));
        assert_eq!(extract_status_code("not an access line"), None);
        assert_eq!(
            extract_status_code(r#"1.2.3.4 - - [x] "POST /api HTTP/1.1" 503 0"#),
            Some(503)
        );
    }

    #[test]
    fn status_to_level_mapping() {
        assert_eq!(map_status_to_level(200), Some("info"));
        assert_eq!(map_status_to_level(298), Some("info"));
        assert_eq!(map_status_to_level(304), Some("info"));
        assert_eq!(map_status_to_level(301), Some("warn"));
        assert_eq!(map_status_to_level(308), Some("warn"));
        assert_eq!(map_status_to_level(500), Some("error"));
        assert_eq!(map_status_to_level(404), Some("error"));
        assert_eq!(map_status_to_level(150), None);
        assert_eq!(map_status_to_level(299), None);
        assert_eq!(map_status_to_level(600), None);
    }

    #[test]
    fn ip_extraction() {
        assert_eq!(extract_ip(ACCESS_LINE), Some("8.8.8.8".parse().unwrap()));
        assert_eq!(extract_ip("no leading ip 8.8.8.8"), None);
        // Dotted decimal that is not a valid address yields nothing.
        assert_eq!(extract_ip("999.1.1.1 - - rest"), None);
    }

    #[test]
    fn gateway_line_gains_geo_and_level_labels() {
        let record = enrich(GATEWAY_JOB, ACCESS_LINE, &FakeGeo);
        assert_eq!(record.labels.get("job").unwrap(), "gateway");
        assert_eq!(record.labels.get("level").unwrap(), "info");
        assert_eq!(record.labels.get("country").unwrap(), "US");
        assert_eq!(record.labels.get("lat").unwrap(), "37.751");
        assert_eq!(record.labels.get("lon").unwrap(), "-97.822");
        assert!(record.timestamp_ns > 0);
    }

    #[test]
    fn gateway_line_without_geo_data_is_still_labeled() {
        let line = r#"10.0.0.1 - - [10/Oct/2023:13:55:36 +0000] "GET /x HTTP/1.1" 301 0"#;
        let record = enrich(GATEWAY_JOB, line, &FakeGeo);
        assert_eq!(record.labels.get("level").unwrap(), "warn");
        assert!(!record.labels.contains_key("country"));
        assert!(!record.labels.contains_key("lat"));
    }

    #[traced_test]
    #[test]
    fn geo_miss_is_visible_in_the_logs() {
        let line = r#"10.0.0.1 - - [10/Oct/2023:13:55:36 +0000] "GET /x HTTP/1.1" 200 0"#;
        enrich(GATEWAY_JOB, line, &FakeGeo);
        assert!(logs_contain("no geo data for request IP"));
    }

    #[test]
    fn non_gateway_jobs_carry_only_the_job_label() {
        let record = enrich("syslog", "May  1 11:30:00 host kernel: hi", &NoopLookup);
        assert_eq!(record.labels.len(), 1);
        assert_eq!(record.labels.get("job").unwrap(), "syslog");
        assert_eq!(record.line, "May  1 11:30:00 host kernel: hi");
    }
}
