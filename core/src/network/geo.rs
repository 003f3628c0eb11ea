use std::net::IpAddr;
use std::path::Path;
use serde::{Deserialize, Serialize};
use maxminddb::{MaxMindDBError, Reader};
use thiserror::Error;
use super::address::NetworkAddress;
use crate::{GeoTraceError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
}

impl GeoLocation {
    pub fn describe(&self) -> String {
        format!(
            "Country: {}, City: {}, Latitude: {}, Longitude: {}",
            self.country_name.as_deref().unwrap_or("Unknown"),
            self.city.as_deref().unwrap_or("Unknown"),
            format_coordinate(self.latitude),
            format_coordinate(self.longitude),
        )
    }

    pub fn summary(&self) -> String {
        let parts: Vec<&str> = [&self.city, &self.region, &self.country_name]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .collect();

        if parts.is_empty() {
            "Unknown location".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn format_coordinate(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.6}", v),
        None => "Unknown".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupResult {
    Located(GeoLocation),
    NotFound,
    Error { reason: String },
}

impl LookupResult {
    pub fn describe(&self, address: NetworkAddress) -> String {
        match self {
            LookupResult::Located(location) => location.describe(),
            LookupResult::NotFound => format!("GeoIP lookup failed for IP: {}", address),
            LookupResult::Error { reason } => format!("GeoIP lookup error for IP: {} ({})", address, reason),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("address not found in database")]
    NotFound,

    #[error("database query failed: {0}")]
    Database(String),
}

/// An opened geolocation database.
pub trait LocationLookup {
    fn query(&self, address: NetworkAddress) -> std::result::Result<GeoLocation, QueryError>;
}

/// GeoIP2/GeoLite2 City database loaded into memory.
pub struct MaxMindDatabase {
    reader: Reader<Vec<u8>>,
}

impl MaxMindDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path)
            .map_err(|e| GeoTraceError::DatabaseOpen(format!("{}: {}", path.display(), e)))?;

        log::info!(
            "Loaded {} database ({} build {})",
            reader.metadata.database_type,
            path.display(),
            reader.metadata.build_epoch
        );

        Ok(Self { reader })
    }
}

impl LocationLookup for MaxMindDatabase {
    fn query(&self, address: NetworkAddress) -> std::result::Result<GeoLocation, QueryError> {
        let city_data = self
            .reader
            .lookup::<maxminddb::geoip2::City>(IpAddr::V4(address.to_ipv4()))
            .map_err(|e| match e {
                MaxMindDBError::AddressNotFoundError(_) => QueryError::NotFound,
                other => QueryError::Database(other.to_string()),
            })?;

        let mut location = GeoLocation::default();

        if let Some(country) = city_data.country {
            location.country_code = country.iso_code.map(|s| s.to_string());
            if let Some(names) = country.names {
                location.country_name = names.get("en").map(|s| s.to_string());
            }
        }

        if let Some(subdivisions) = city_data.subdivisions {
            if let Some(names) = subdivisions.first().and_then(|s| s.names.as_ref()) {
                location.region = names.get("en").map(|s| s.to_string());
            }
        }

        if let Some(names) = city_data.city.and_then(|city| city.names) {
            location.city = names.get("en").map(|s| s.to_string());
        }

        if let Some(geo_location) = city_data.location {
            location.latitude = geo_location.latitude;
            location.longitude = geo_location.longitude;
            location.timezone = geo_location.time_zone.map(|s| s.to_string());
        }

        Ok(location)
    }
}

/// Owns the database handle for one run. Dropping the resolver releases it.
pub struct GeolocationResolver<D: LocationLookup> {
    database: D,
    lookups: u64,
}

impl GeolocationResolver<MaxMindDatabase> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(MaxMindDatabase::open(path)?))
    }
}

impl<D: LocationLookup> GeolocationResolver<D> {
    pub fn new(database: D) -> Self {
        Self { database, lookups: 0 }
    }

    pub fn resolve(&mut self, address: NetworkAddress) -> LookupResult {
        self.lookups += 1;
        match self.database.query(address) {
            Ok(location) => {
                log::debug!("{} located: {}", address, location.summary());
                LookupResult::Located(location)
            }
            Err(QueryError::NotFound) => {
                log::warn!("GeoIP lookup failed for IP: {}", address);
                LookupResult::NotFound
            }
            Err(QueryError::Database(reason)) => {
                log::error!("GeoIP lookup error for IP: {}: {}", address, reason);
                LookupResult::Error { reason }
            }
        }
    }

    pub fn lookups(&self) -> u64 {
        self.lookups
    }
}

impl<D: LocationLookup> Drop for GeolocationResolver<D> {
    fn drop(&mut self) {
        log::debug!("Releasing geolocation database after {} lookups", self.lookups);
    }
}
