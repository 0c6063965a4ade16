// SPDX-License-Identifier: Apache-2.0

//! IP geolocation behind a trait so the enrichment stage can be tested
//! against a fake and the agent can run without a database on disk.

use std::net::IpAddr;
use std::path::Path;

use tracing::{info, warn};

/// Geographic data attached to gateway lines.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInfo {
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
}

/// Read-only IP geolocation, safe for concurrent lookups.
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Option<GeoInfo>;
}

/// MaxMind GeoLite2-City database reader, opened once at startup and
/// shared across pipelines.
pub struct MaxMindLookup {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindLookup {
    pub fn open(path: &Path) -> Result<Self, maxminddb::MaxMindDBError> {
        Ok(MaxMindLookup {
            reader: maxminddb::Reader::open_readfile(path)?,
        })
    }
}

impl GeoLookup for MaxMindLookup {
    fn lookup(&self, ip: IpAddr) -> Option<GeoInfo> {
        let city: maxminddb::geoip2::City = match self.reader.lookup(ip) {
            Ok(city) => city,
            Err(maxminddb::MaxMindDBError::AddressNotFoundError(_)) => {
                info!(%ip, "address not in the geo database");
                return None;
            }
            Err(e) => {
                warn!(%ip, "geo lookup failed: {e}");
                return None;
            }
        };
        let location = city.location?;
        Some(GeoInfo {
            latitude: location.latitude?,
            longitude: location.longitude?,
            country: city
                .country
                .and_then(|country| country.iso_code)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// Lookup used when no database is configured; every query misses and
/// gateway lines are pushed without geo labels.
pub struct NoopLookup;

impl GeoLookup for NoopLookup {
    fn lookup(&self, _ip: IpAddr) -> Option<GeoInfo> {
        None
    }
}
