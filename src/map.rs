//! Map rendering for the pothole dataset.
//!
//! The page is self-contained HTML. Leaflet and Leaflet.markercluster are
//! loaded from a CDN; the points are embedded as JSON.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::geo::Coordinate;
use crate::store::{COL_AREA, COL_LATITUDE, COL_LONGITUDE, COL_SEVERITY, COL_TIMESTAMP};

const LEAFLET_VERSION: &str = "1.9.4";
const MARKERCLUSTER_VERSION: &str = "1.5.3";
const USER_RADIUS_M: u32 = 100;

/// One row of the dataset as the map sees it. Severity is kept verbatim so
/// unexpected values still render (in the fallback color).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_px: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MapOptions {
    pub zoom: u8,
    pub title: String,
    /// Center used when there is neither a user location nor any point.
    pub fallback_center: Coordinate,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            zoom: 13,
            title: "Pothole Map".to_string(),
            fallback_center: Coordinate::default(),
        }
    }
}

pub fn severity_color_name(severity: &str) -> &'static str {
    match severity {
        "Low" => "green",
        "Medium" => "orange",
        "High" => "red",
        _ => "blue",
    }
}

/// Read the dataset for display. Never writes to `path`.
///
/// Only `Latitude`, `Longitude` and `Severity` are required; area and
/// timestamp are shown when present.
pub fn load_map_points(path: &Path) -> Result<Vec<MapPoint>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("dataset {} not found", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let required = [COL_LATITUDE, COL_LONGITUDE, COL_SEVERITY];
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| column(name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(anyhow!(
            "dataset {} must contain columns {} (missing: {})",
            path.display(),
            required.join(", "),
            missing.join(", ")
        ));
    }
    let lat_idx = column(COL_LATITUDE).unwrap_or_default();
    let lon_idx = column(COL_LONGITUDE).unwrap_or_default();
    let severity_idx = column(COL_SEVERITY).unwrap_or_default();
    let area_idx = column(COL_AREA);
    let timestamp_idx = column(COL_TIMESTAMP);

    let mut points = Vec::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("failed to read {}", path.display()))?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let coordinate = |idx: usize, name: &str| -> Result<f64> {
            let raw = row.get(idx).unwrap_or("");
            raw.parse::<f64>()
                .map_err(|_| anyhow!("{} line {}: bad {} '{}'", path.display(), line, name, raw))
        };
        let latitude = coordinate(lat_idx, COL_LATITUDE)?;
        let longitude = coordinate(lon_idx, COL_LONGITUDE)?;
        let optional = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        points.push(MapPoint {
            latitude,
            longitude,
            severity: row.get(severity_idx).unwrap_or("").to_string(),
            area_px: optional(area_idx).and_then(|area| area.parse().ok()),
            timestamp: optional(timestamp_idx),
        });
    }
    log::info!("loaded {} pothole record(s) from {}", points.len(), path.display());
    Ok(points)
}

/// Center on the user, else the mean of the points, else the fallback.
pub fn map_center(points: &[MapPoint], user: Option<Coordinate>, fallback: Coordinate) -> Coordinate {
    if let Some(user) = user {
        return user;
    }
    if points.is_empty() {
        return fallback;
    }
    let n = points.len() as f64;
    Coordinate {
        latitude: points.iter().map(|p| p.latitude).sum::<f64>() / n,
        longitude: points.iter().map(|p| p.longitude).sum::<f64>() / n,
    }
}

pub fn render_html(
    points: &[MapPoint],
    user: Option<Coordinate>,
    options: &MapOptions,
) -> Result<String> {
    let center = map_center(points, user, options.fallback_center);
    let markers: Vec<Value> = points
        .iter()
        .map(|p| {
            json!({
                "lat": p.latitude,
                "lon": p.longitude,
                "severity": p.severity,
                "color": severity_color_name(&p.severity),
                "area": p.area_px,
                "timestamp": p.timestamp,
            })
        })
        .collect();
    let data = json!({
        "center": [center.latitude, center.longitude],
        "zoom": options.zoom,
        "markers": markers,
        "user": user.map(|u| json!([u.latitude, u.longitude])),
        "userRadius": USER_RADIUS_M,
    });
    let data = script_safe(&serde_json::to_string(&data)?);
    let title = html_escape(&options.title);

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<link rel="stylesheet" href="https://unpkg.com/leaflet@{leaflet}/dist/leaflet.css">
<link rel="stylesheet" href="https://unpkg.com/leaflet.markercluster@{cluster}/dist/MarkerCluster.css">
<link rel="stylesheet" href="https://unpkg.com/leaflet.markercluster@{cluster}/dist/MarkerCluster.Default.css">
<script src="https://unpkg.com/leaflet@{leaflet}/dist/leaflet.js"></script>
<script src="https://unpkg.com/leaflet.markercluster@{cluster}/dist/leaflet.markercluster.js"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
const data = {data};
const esc = (v) => String(v).replace(/[&<>"']/g, (c) => ({{"&": "&amp;", "<": "&lt;", ">": "&gt;", '"': "&quot;", "'": "&#39;"}})[c]);
const map = L.map("map").setView(data.center, data.zoom);
L.tileLayer("https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png", {{
  maxZoom: 19,
  attribution: "&copy; OpenStreetMap contributors"
}}).addTo(map);
const cluster = L.markerClusterGroup();
data.markers.forEach((m, idx) => {{
  let popup = `<b>Pothole #${{idx + 1}}</b><br>Latitude: ${{esc(m.lat)}}<br>Longitude: ${{esc(m.lon)}}<br>Severity: ${{esc(m.severity)}}`;
  if (m.area !== null) popup += `<br>Area: ${{esc(m.area)}} pixels`;
  if (m.timestamp !== null) popup += `<br>Detected on: ${{esc(m.timestamp)}}`;
  L.circleMarker([m.lat, m.lon], {{ radius: 9, color: m.color, fillColor: m.color, fillOpacity: 0.8 }})
    .bindPopup(popup, {{ maxWidth: 300 }})
    .addTo(cluster);
}});
map.addLayer(cluster);
if (data.user) {{
  L.marker(data.user).bindPopup("Your Current Location").addTo(map);
  L.circle(data.user, {{ radius: data.userRadius, color: "blue", fill: true, fillOpacity: 0.2 }})
    .bindPopup("Your Location (" + data.userRadius + "m radius)")
    .addTo(map);
}}
</script>
</body>
</html>
"#,
        title = title,
        leaflet = LEAFLET_VERSION,
        cluster = MARKERCLUSTER_VERSION,
        data = data,
    ))
}

/// GeoJSON `FeatureCollection`; coordinates are `[longitude, latitude]`.
pub fn to_geojson(points: &[MapPoint]) -> Value {
    let features: Vec<Value> = points
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            let mut properties = json!({
                "id": idx + 1,
                "severity": p.severity,
                "color": severity_color_name(&p.severity),
            });
            if let Some(area) = p.area_px {
                properties["area_px"] = json!(area);
            }
            if let Some(ts) = &p.timestamp {
                properties["timestamp"] = json!(ts);
            }
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [p.longitude, p.latitude],
                },
                "properties": properties,
            })
        })
        .collect();
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

// JSON embedded in a <script> block must not close it early.
fn script_safe(json: &str) -> String {
    json.replace("</", "<\\/")
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64, severity: &str) -> MapPoint {
        MapPoint {
            latitude: lat,
            longitude: lon,
            severity: severity.to_string(),
            area_px: None,
            timestamp: None,
        }
    }

    #[test]
    fn colors_follow_severity() {
        assert_eq!(severity_color_name("Low"), "green");
        assert_eq!(severity_color_name("Medium"), "orange");
        assert_eq!(severity_color_name("High"), "red");
        assert_eq!(severity_color_name("Severe"), "blue");
    }

    #[test]
    fn center_prefers_user_then_mean_then_fallback() {
        let points = vec![point(10.0, 20.0, "Low"), point(12.0, 22.0, "High")];
        let user = Coordinate {
            latitude: 1.0,
            longitude: 2.0,
        };
        let fallback = Coordinate::default();
        assert_eq!(map_center(&points, Some(user), fallback), user);
        assert_eq!(
            map_center(&points, None, fallback),
            Coordinate {
                latitude: 11.0,
                longitude: 21.0
            }
        );
        assert_eq!(map_center(&[], None, fallback), fallback);
    }

    #[test]
    fn embedded_data_cannot_close_the_script() -> Result<()> {
        let points = vec![point(1.0, 2.0, "</script><script>alert(1)")];
        let html = render_html(&points, None, &MapOptions::default())?;
        assert!(!html.contains("</script><script>alert"));
        assert!(html.contains("<\\/script>"));
        Ok(())
    }

    #[test]
    fn user_marker_is_optional() -> Result<()> {
        let html = render_html(&[], None, &MapOptions::default())?;
        assert!(html.contains("\"user\":null"));
        let user = Coordinate {
            latitude: 3.5,
            longitude: 4.5,
        };
        let html = render_html(&[], Some(user), &MapOptions::default())?;
        assert!(html.contains("\"user\":[3.5,4.5]"));
        assert!(html.contains("\"userRadius\":100"));
        Ok(())
    }

    #[test]
    fn geojson_uses_lon_lat_order() {
        let mut p = point(28.6, 77.2, "High");
        p.area_px = Some(10_000.0);
        let geojson = to_geojson(&[p]);
        assert_eq!(geojson["type"], "FeatureCollection");
        let feature = &geojson["features"][0];
        assert_eq!(feature["geometry"]["coordinates"], json!([77.2, 28.6]));
        assert_eq!(feature["properties"]["severity"], "High");
        assert_eq!(feature["properties"]["area_px"], json!(10_000.0));
        assert!(feature["properties"].get("timestamp").is_none());
    }
}
