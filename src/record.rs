//! The persisted unit: one geotagged pothole observation.

use chrono::{NaiveDateTime, Timelike};
use std::fmt;

use crate::detect::Detection;
use crate::geo::Coordinate;
use crate::severity::Severity;

/// Wall-clock format used in the dataset and on the map.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Immutable once assembled. `area_px` is `None` only for rows migrated from
/// the legacy four-column layout that never recorded an area.
#[derive(Clone, Debug, PartialEq)]
pub struct PotholeRecord {
    latitude: f64,
    longitude: f64,
    area_px: Option<u64>,
    severity: Severity,
    timestamp: NaiveDateTime,
}

impl PotholeRecord {
    pub(crate) fn from_parts(
        latitude: f64,
        longitude: f64,
        area_px: Option<u64>,
        severity: Severity,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            latitude,
            longitude,
            area_px,
            severity,
            timestamp: truncate_to_seconds(timestamp),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn area_px(&self) -> Option<u64> {
        self.area_px
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl fmt::Display for PotholeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {:.6},{:.6} ",
            self.severity, self.latitude, self.longitude
        )?;
        match self.area_px {
            Some(area) => write!(f, "area={}px ", area)?,
            None => write!(f, "area=? ")?,
        }
        write!(f, "{}", self.timestamp.format(TIMESTAMP_FORMAT))
    }
}

/// Combine a detection with its severity, location and capture time.
///
/// Pure: the caller has already classified the detection, so the record's
/// severity always reflects the thresholds in force when it was created.
pub fn assemble(
    detection: &Detection,
    severity: Severity,
    location: Coordinate,
    captured_at: NaiveDateTime,
) -> PotholeRecord {
    PotholeRecord::from_parts(
        location.latitude,
        location.longitude,
        Some(detection.bbox.area()),
        severity,
        captured_at,
    )
}

pub fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use chrono::NaiveDate;

    fn detection(width: u32, height: u32) -> Detection {
        Detection {
            bbox: BoundingBox::new(10, 20, width, height),
            confidence: 0.9,
            class_id: 0,
            label: "pothole".to_string(),
            frame_width: 640,
            frame_height: 480,
        }
    }

    fn at(h: u32, m: u32, s: u32, milli: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_milli_opt(h, m, s, milli))
            .expect("valid timestamp")
    }

    #[test]
    fn assembles_area_from_box_pixels() {
        let location = Coordinate::new(18.5204, 73.8567).expect("coordinate");
        let record = assemble(&detection(100, 100), Severity::High, location, at(9, 15, 0, 0));
        assert_eq!(record.area_px(), Some(10_000));
        assert_eq!(record.severity(), Severity::High);
        assert_eq!(record.latitude(), 18.5204);
        assert_eq!(record.longitude(), 73.8567);
    }

    #[test]
    fn timestamp_is_truncated_to_seconds() {
        let record = assemble(
            &detection(5, 5),
            Severity::Low,
            Coordinate::default(),
            at(23, 59, 58, 999),
        );
        assert_eq!(record.timestamp(), at(23, 59, 58, 0));
    }

    #[test]
    fn assembly_is_deterministic() {
        let location = Coordinate::default();
        let a = assemble(&detection(30, 40), Severity::Medium, location, at(1, 2, 3, 0));
        let b = assemble(&detection(30, 40), Severity::Medium, location, at(1, 2, 3, 0));
        assert_eq!(a, b);
    }

    #[test]
    fn display_is_compact() {
        let record = assemble(
            &detection(10, 10),
            Severity::Low,
            Coordinate::default(),
            at(7, 8, 9, 0),
        );
        assert_eq!(
            record.to_string(),
            "Low at 28.613900,77.209000 area=100px 2024-03-09 07:08:09"
        );
    }
}
