//! Severity classification.
//!
//! A detection's severity is the ratio of its box area to the area of the
//! frame it was detected in, bucketed by two fixed thresholds:
//!
//! - `ratio <= low` is `Low`
//! - `low < ratio <= high` is `Medium`
//! - `ratio > high` is `High`
//!
//! Both boundaries resolve to the lower tier. The same rule applies to every
//! run kind (image, video, camera).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_LOW_THRESHOLD: f64 = 0.007;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.02;

/// Ordinal severity of a detected pothole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Low" => Ok(Severity::Low),
            "Medium" => Ok(Severity::Medium),
            "High" => Ok(Severity::High),
            other => Err(anyhow!(
                "unknown severity '{}'; expected Low, Medium or High",
                other
            )),
        }
    }
}

/// Area-ratio thresholds separating the severity tiers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeverityThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: DEFAULT_LOW_THRESHOLD,
            high: DEFAULT_HIGH_THRESHOLD,
        }
    }
}

impl SeverityThresholds {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        let thresholds = Self { low, high };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.low.is_finite() || !self.high.is_finite() {
            return Err(anyhow!("severity thresholds must be finite"));
        }
        if !(0.0 < self.low && self.low < self.high && self.high < 1.0) {
            return Err(anyhow!(
                "severity thresholds must satisfy 0 < low < high < 1 (low={}, high={})",
                self.low,
                self.high
            ));
        }
        Ok(())
    }

    /// Classify a detection of `detection_area` px² inside a frame of
    /// `frame_area` px². The frame area must be non-zero.
    pub fn classify(&self, detection_area: u64, frame_area: u64) -> Result<Severity> {
        if frame_area == 0 {
            return Err(anyhow!("cannot classify severity against an empty frame"));
        }
        let ratio = detection_area as f64 / frame_area as f64;
        Ok(self.classify_ratio(ratio))
    }

    pub fn classify_ratio(&self, ratio: f64) -> Severity {
        if ratio > self.high {
            Severity::High
        } else if ratio > self.low {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}
