// SPDX-License-Identifier: Apache-2.0

//! Environment-driven agent configuration and the static source table.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::enrich::GATEWAY_JOB;
use crate::loki::{RetryStrategy, PUSH_PATH};
use crate::recency::DEFAULT_MAX_AGE;

const DEFAULT_LOKI_URL: &str = "http://loki:3100";
const DEFAULT_STATE_DIR: &str = "/var/lib/lokitail";
const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 10;

/// Where a source's lines come from.
#[derive(Debug, Clone)]
pub enum SourceLocation {
    /// A growing log file polled at a fixed interval.
    File(PathBuf),
    /// A long-running command whose stdout is a continuous log stream.
    Command(String),
}

/// Data-driven per-source line predicate.
#[derive(Debug, Clone)]
pub enum LineFilter {
    /// Keep only lines matching the pattern.
    Keep(Regex),
    /// Drop lines matching the pattern.
    Drop(Regex),
}

impl LineFilter {
    pub fn accepts(&self, line: &str) -> bool {
        match self {
            LineFilter::Keep(pattern) => pattern.is_match(line),
            LineFilter::Drop(pattern) => !pattern.is_match(line),
        }
    }
}

/// One configured log source. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Job label attached to every line from this source; also keys
    /// the recency-format table.
    pub job: String,
    pub location: SourceLocation,
    pub filter: Option<LineFilter>,
    pub poll_interval: Duration,
}

#[derive(Debug)]
pub struct Config {
    /// Full push endpoint URL.
    pub push_url: String,
    pub state_dir: PathBuf,
    /// GeoLite2-City database; geo enrichment is disabled when unset.
    pub geoip_db: Option<PathBuf>,
    pub max_age: Duration,
    pub push_timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub sources: Vec<SourceConfig>,
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let base_url = env::var("LOKI_URL").unwrap_or_else(|_| DEFAULT_LOKI_URL.to_string());

        // LOKI_PUSH_URL will primarily be used for integration tests;
        // overrides the entire push endpoint URL.
        let push_url = env::var("LOKI_PUSH_URL")
            .unwrap_or_else(|_| format!("{}{}", base_url.trim_end_matches('/'), PUSH_PATH));

        let state_dir =
            PathBuf::from(env::var("STATE_DIR").unwrap_or_else(|_| DEFAULT_STATE_DIR.to_string()));

        let geoip_db = env::var("GEOIP_DB").ok().map(PathBuf::from);

        let max_age = env::var("MAX_AGE_HOURS")
            .ok()
            .and_then(|hours| hours.parse::<u64>().ok())
            .map(|hours| Duration::from_secs(hours * 3600))
            .unwrap_or(DEFAULT_MAX_AGE);

        let push_timeout = env::var("PUSH_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_PUSH_TIMEOUT_SECS));

        let filtered_ip = env::var("FILTERED_IP").ok();
        if let Some(ip) = &filtered_ip {
            if ip.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "FILTERED_IP is set but empty, agent will not start"
                )
                .into());
            }
        }
        let sources = Self::default_sources(filtered_ip.as_deref()).map_err(|e| {
            anyhow::anyhow!("Invalid FILTERED_IP pattern, agent will not start. Error: {e}")
        })?;

        Ok(Config {
            push_url,
            state_dir,
            geoip_db,
            max_age,
            push_timeout,
            retry_strategy: RetryStrategy::LinearBackoff(3, 500),
            sources,
        })
    }

    /// The compiled-in source table. When `filtered_ip` is set (for
    /// instance, the operator's own address), gateway and fail2ban
    /// lines mentioning it are dropped before classification.
    pub fn default_sources(
        filtered_ip: Option<&str>,
    ) -> Result<Vec<SourceConfig>, regex::Error> {
        let ip_filter = filtered_ip
            .map(|ip| Regex::new(&regex::escape(ip)).map(LineFilter::Drop))
            .transpose()?;

        Ok(vec![
            SourceConfig {
                job: "syslog".to_string(),
                location: SourceLocation::File(PathBuf::from("/var/log/syslog")),
                filter: None,
                poll_interval: Duration::from_secs(10),
            },
            SourceConfig {
                job: "auth".to_string(),
                location: SourceLocation::File(PathBuf::from("/var/log/auth.log")),
                filter: None,
                poll_interval: Duration::from_secs(10),
            },
            SourceConfig {
                job: "dpkg".to_string(),
                location: SourceLocation::File(PathBuf::from("/var/log/dpkg.log")),
                filter: None,
                poll_interval: Duration::from_secs(10),
            },
            SourceConfig {
                job: "fail2ban".to_string(),
                location: SourceLocation::File(PathBuf::from("/var/log/fail2ban.log")),
                filter: ip_filter.clone(),
                poll_interval: Duration::from_secs(10),
            },
            SourceConfig {
                job: GATEWAY_JOB.to_string(),
                location: SourceLocation::File(PathBuf::from("/host_home/gateway_logs.log")),
                filter: ip_filter,
                poll_interval: Duration::from_secs(5),
            },
        ])
    }
}
