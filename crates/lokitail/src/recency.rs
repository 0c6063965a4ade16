// SPDX-License-Identifier: Apache-2.0

//! Timestamp-recency filtering. Each job maps to a (pattern, format)
//! pair in a lookup table, so supporting a new log format is a data
//! change. Everything ambiguous fails open: losing logs to format
//! drift is worse than pushing a stale line.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;
use tracing::debug;

/// Lines older than this are dropped.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

struct TimestampFormat {
    pattern: Regex,
    format: &'static str,
    /// Syslog-style formats carry no year; the current one is assumed.
    infer_year: bool,
    /// The format carries its own UTC offset.
    zoned: bool,
}

// Patterns are literals; compilation cannot fail at runtime.
#[allow(clippy::unwrap_used)]
fn formats() -> &'static HashMap<&'static str, TimestampFormat> {
    static FORMATS: OnceLock<HashMap<&'static str, TimestampFormat>> = OnceLock::new();
    FORMATS.get_or_init(|| {
        let syslog_style = || TimestampFormat {
            pattern: Regex::new(r"^(?P<ts>[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})").unwrap(),
            format: "%b %d %H:%M:%S",
            infer_year: true,
            zoned: false,
        };
        let dated_style = || TimestampFormat {
            pattern: Regex::new(r"^(?P<ts>\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})").unwrap(),
            format: "%Y-%m-%d %H:%M:%S",
            infer_year: false,
            zoned: false,
        };
        HashMap::from([
            ("syslog", syslog_style()),
            ("auth", syslog_style()),
            ("dpkg", dated_style()),
            ("fail2ban", dated_style()),
            (
                // Combined-log-format access lines, bracketed timestamp.
                "gateway",
                TimestampFormat {
                    pattern: Regex::new(r"\[(?P<ts>[^\]]+)\]").unwrap(),
                    format: "%d/%b/%Y:%H:%M:%S %z",
                    infer_year: false,
                    zoned: true,
                },
            ),
        ])
    })
}

/// Checks whether `line` from `job` is younger than `max_age` as of
/// `now`. Jobs without a registered format, lines without a
/// recognizable timestamp, and unparseable timestamps are all treated
/// as recent.
pub fn is_recent(job: &str, line: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
    let Some(format) = formats().get(job) else {
        return true;
    };
    let Some(ts) = format
        .pattern
        .captures(line)
        .and_then(|captures| captures.name("ts"))
    else {
        return true;
    };
    let Some(log_time) = parse_timestamp(ts.as_str(), format, now) else {
        debug!(job, "unparseable timestamp {:?}; keeping line", ts.as_str());
        return true;
    };
    let age = now.signed_duration_since(log_time);
    age < TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX)
}

fn parse_timestamp(
    ts: &str,
    format: &TimestampFormat,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if format.zoned {
        DateTime::parse_from_str(ts, format.format)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    } else if format.infer_year {
        let with_year = format!("{} {ts}", now.year());
        let fmt = format!("%Y {}", format.format);
        NaiveDateTime::parse_from_str(&with_year, &fmt)
            .ok()
            .map(|t| t.and_utc())
    } else {
        NaiveDateTime::parse_from_str(ts, format.format)
            .ok()
            .map(|t| t.and_utc())
    }
}
