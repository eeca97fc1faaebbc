//! IP-based geolocation providers.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use super::{Coordinate, LocationProvider};

pub const IPINFO_URL: &str = "https://ipinfo.io/json";
pub const IP_API_URL: &str = "http://ip-api.com/json/";

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

fn fetch(agent: &ureq::Agent, url: &str) -> Result<String> {
    agent
        .get(url)
        .call()
        .with_context(|| format!("request {}", url))?
        .into_string()
        .with_context(|| format!("read response from {}", url))
}

/// ipinfo.io lookup: `{"loc": "lat,lon", ...}`.
pub struct IpInfoProvider {
    agent: ureq::Agent,
    url: String,
}

impl IpInfoProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            url: IPINFO_URL.to_string(),
        }
    }
}

impl LocationProvider for IpInfoProvider {
    fn name(&self) -> &'static str {
        "ipinfo"
    }

    fn locate(&mut self) -> Result<Coordinate> {
        parse_ipinfo(&fetch(&self.agent, &self.url)?)
    }
}

#[derive(Deserialize)]
struct IpInfoResponse {
    loc: Option<String>,
}

pub fn parse_ipinfo(body: &str) -> Result<Coordinate> {
    let response: IpInfoResponse = serde_json::from_str(body).context("invalid ipinfo response")?;
    let loc = response
        .loc
        .ok_or_else(|| anyhow!("ipinfo response has no 'loc' field"))?;
    let (lat, lon) = loc
        .split_once(',')
        .ok_or_else(|| anyhow!("ipinfo 'loc' is not 'lat,lon': {}", loc))?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .with_context(|| format!("bad ipinfo latitude '{}'", lat))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .with_context(|| format!("bad ipinfo longitude '{}'", lon))?;
    Coordinate::new(latitude, longitude)
}

/// ip-api.com lookup: `{"status": "success", "lat": .., "lon": ..}`.
pub struct IpApiProvider {
    agent: ureq::Agent,
    url: String,
}

impl IpApiProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            url: IP_API_URL.to_string(),
        }
    }
}

impl LocationProvider for IpApiProvider {
    fn name(&self) -> &'static str {
        "ip-api"
    }

    fn locate(&mut self) -> Result<Coordinate> {
        parse_ip_api(&fetch(&self.agent, &self.url)?)
    }
}

#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

pub fn parse_ip_api(body: &str) -> Result<Coordinate> {
    let response: IpApiResponse = serde_json::from_str(body).context("invalid ip-api response")?;
    if response.status != "success" {
        return Err(anyhow!(
            "ip-api lookup failed: {}",
            response.message.unwrap_or(response.status)
        ));
    }
    match (response.lat, response.lon) {
        (Some(lat), Some(lon)) => Coordinate::new(lat, lon),
        _ => Err(anyhow!("ip-api response is missing lat/lon")),
    }
}
