//! Best-effort geolocation.
//!
//! Locations come from an ordered chain of providers: a precise
//! device-reported fix when one is configured, then two IP geolocation
//! services. When every provider fails the locator answers with a fixed
//! default coordinate, so record creation never blocks on location.

pub mod ip;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::LocationSettings;

pub use ip::{IpApiProvider, IpInfoProvider};

/// Default coordinate used when no provider answers (New Delhi).
pub const DEFAULT_LATITUDE: f64 = 28.6139;
pub const DEFAULT_LONGITUDE: f64 = 77.2090;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let coordinate = Self {
            latitude,
            longitude,
        };
        coordinate.validate()?;
        Ok(coordinate)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(anyhow!("latitude {} out of range", self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(anyhow!("longitude {} out of range", self.longitude));
        }
        Ok(())
    }
}

impl Default for Coordinate {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// One tier of the location chain.
pub trait LocationProvider: Send {
    fn name(&self) -> &'static str;

    fn locate(&mut self) -> Result<Coordinate>;
}

/// Precise device-reported fix supplied by the operator.
pub struct FixedLocation {
    coordinate: Coordinate,
}

impl FixedLocation {
    pub fn new(coordinate: Coordinate) -> Self {
        Self { coordinate }
    }
}

impl LocationProvider for FixedLocation {
    fn name(&self) -> &'static str {
        "device"
    }

    fn locate(&mut self) -> Result<Coordinate> {
        Ok(self.coordinate)
    }
}

/// A resolved location and the tier that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Located {
    pub coordinate: Coordinate,
    pub source: &'static str,
}

pub struct GeoLocator {
    providers: Vec<Box<dyn LocationProvider>>,
    fallback: Coordinate,
    cache_ttl: Option<Duration>,
    cached: Option<(Located, Instant)>,
}

impl GeoLocator {
    pub fn new(providers: Vec<Box<dyn LocationProvider>>, fallback: Coordinate) -> Self {
        Self {
            providers,
            fallback,
            cache_ttl: None,
            cached: None,
        }
    }

    /// Chain in order: configured fix, ipinfo.io, ip-api.com, then the default.
    pub fn from_settings(settings: &LocationSettings) -> Self {
        let mut providers: Vec<Box<dyn LocationProvider>> = Vec::new();
        if let Some(fix) = settings.fix {
            providers.push(Box::new(FixedLocation::new(fix)));
        }
        if settings.ip_lookup {
            providers.push(Box::new(IpInfoProvider::new(settings.timeout)));
            providers.push(Box::new(IpApiProvider::new(settings.timeout)));
        }
        Self::new(providers, settings.default).with_cache_ttl(settings.cache_ttl)
    }

    /// Reuse a successful fix for `ttl` before asking the providers again.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self
    }

    pub fn fallback(&self) -> Coordinate {
        self.fallback
    }

    /// Walk the provider chain; `None` when every tier failed.
    pub fn try_locate(&mut self) -> Option<Located> {
        if let (Some(ttl), Some((located, at))) = (self.cache_ttl, self.cached) {
            if at.elapsed() < ttl {
                return Some(located);
            }
        }

        for provider in self.providers.iter_mut() {
            let result = provider.locate().and_then(|c| c.validate().map(|_| c));
            match result {
                Ok(coordinate) => {
                    let located = Located {
                        coordinate,
                        source: provider.name(),
                    };
                    log::debug!("location from {}: {}", located.source, coordinate);
                    if self.cache_ttl.is_some() {
                        self.cached = Some((located, Instant::now()));
                    }
                    return Some(located);
                }
                Err(e) => {
                    log::warn!("location provider {} failed: {:#}", provider.name(), e);
                }
            }
        }
        None
    }

    /// Always answers: falls back to the default coordinate.
    pub fn locate(&mut self) -> Located {
        self.try_locate().unwrap_or_else(|| {
            log::warn!(
                "no location provider answered; using default {}",
                self.fallback
            );
            Located {
                coordinate: self.fallback,
                source: "default",
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Failing;

    impl LocationProvider for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn locate(&mut self) -> Result<Coordinate> {
            Err(anyhow!("service unreachable"))
        }
    }

    struct Counting {
        coordinate: Coordinate,
        calls: Arc<AtomicUsize>,
    }

    impl LocationProvider for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn locate(&mut self) -> Result<Coordinate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.coordinate)
        }
    }

    #[test]
    fn first_answering_provider_wins() -> Result<()> {
        let fix = Coordinate::new(12.9716, 77.5946)?;
        let mut locator = GeoLocator::new(
            vec![Box::new(Failing), Box::new(FixedLocation::new(fix))],
            Coordinate::default(),
        );
        let located = locator.locate();
        assert_eq!(located.coordinate, fix);
        assert_eq!(located.source, "device");
        Ok(())
    }

    #[test]
    fn falls_back_to_default_when_all_fail() {
        let mut locator = GeoLocator::new(vec![Box::new(Failing), Box::new(Failing)], Coordinate::default());
        assert!(locator.try_locate().is_none());
        let located = locator.locate();
        assert_eq!(located.source, "default");
        assert_eq!(located.coordinate.latitude, DEFAULT_LATITUDE);
        assert_eq!(located.coordinate.longitude, DEFAULT_LONGITUDE);
    }

    #[test]
    fn out_of_range_answers_count_as_failures() {
        let bogus = Coordinate {
            latitude: 123.0,
            longitude: 0.0,
        };
        let mut locator =
            GeoLocator::new(vec![Box::new(FixedLocation::new(bogus))], Coordinate::default());
        assert_eq!(locator.locate().source, "default");
    }

    #[test]
    fn settings_without_fix_or_lookup_use_default() {
        let settings = LocationSettings {
            ip_lookup: false,
            ..LocationSettings::default()
        };
        let mut locator = GeoLocator::from_settings(&settings);
        assert!(locator.try_locate().is_none());
        assert_eq!(locator.locate().coordinate, Coordinate::default());
    }

    #[test]
    fn settings_fix_comes_first() -> Result<()> {
        let fix = Coordinate::new(-33.8688, 151.2093)?;
        let settings = LocationSettings {
            fix: Some(fix),
            ..LocationSettings::default()
        };
        let mut locator = GeoLocator::from_settings(&settings);
        let located = locator.locate();
        assert_eq!(located.source, "device");
        assert_eq!(located.coordinate, fix);
        Ok(())
    }

    #[test]
    fn cache_reuses_fix_within_ttl() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Counting {
            coordinate: Coordinate::new(1.0, 2.0)?,
            calls: calls.clone(),
        };
        let mut locator = GeoLocator::new(vec![Box::new(provider)], Coordinate::default())
            .with_cache_ttl(Duration::from_secs(300));
        locator.locate();
        locator.locate();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn without_cache_every_call_asks_again() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Counting {
            coordinate: Coordinate::new(1.0, 2.0)?,
            calls: calls.clone(),
        };
        let mut locator = GeoLocator::new(vec![Box::new(provider)], Coordinate::default());
        locator.locate();
        locator.locate();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
