//! GeoIP lookup seam

use std::collections::BTreeMap;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub city: String,
}

/// Resolves an IP to a location
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: &str) -> Option<GeoLocation>;
}

/// Resolver used when no GeoIP database is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownGeoResolver;

impl GeoResolver for UnknownGeoResolver {
    fn resolve(&self, _ip: &str) -> Option<GeoLocation> {
        None
    }
}

/// Fixed table, handy for private ranges and tests
#[derive(Debug, Default, Clone)]
pub struct StaticGeoResolver {
    entries: BTreeMap<String, GeoLocation>,
}

impl StaticGeoResolver {
    pub fn with(mut self, ip: impl Into<String>, country: impl Into<String>, city: impl Into<String>) -> Self {
        self.entries.insert(
            ip.into(),
            GeoLocation {
                country: country.into(),
                city: city.into(),
            },
        );
        self
    }
}

impl GeoResolver for StaticGeoResolver {
    fn resolve(&self, ip: &str) -> Option<GeoLocation> {
        self.entries.get(ip).cloned()
    }
}

/// Resolve or fall back to `Unknown`
pub fn resolve_or_unknown(resolver: &dyn GeoResolver, ip: &str) -> GeoLocation {
    resolver.resolve(ip).unwrap_or_else(|| GeoLocation {
        country: UNKNOWN.to_string(),
        city: UNKNOWN.to_string(),
    })
}
