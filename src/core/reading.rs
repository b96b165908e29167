//! Describes a synthetic sensor reading.

use std::ops::RangeInclusive;

use chrono::SubsecRound;
use rand::Rng;
use serde::Serializer;

use crate::prelude::*;

/// UTC, second precision, literal `Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const ICE_THICKNESS_CM: RangeInclusive<f64> = 5.0..=50.0;
pub const SURFACE_TEMPERATURE_C: RangeInclusive<f64> = -10.0..=5.0;
pub const SNOW_ACCUMULATION_CM: RangeInclusive<f64> = 0.0..=20.0;
pub const EXTERNAL_TEMPERATURE_C: RangeInclusive<f64> = -20.0..=10.0;

/// A single snapshot of all the site sensors.
///
/// Every field is drawn independently on each call to [`Reading::generate`],
/// nothing is carried over from the previous reading.
///
/// The serialized field names are the ones the telemetry consumers already rely on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    location: String,

    #[serde(rename = "iceThickness")]
    ice_thickness_cm: f64,

    #[serde(rename = "surfaceTemperature")]
    surface_temperature_c: f64,

    #[serde(rename = "snowAccumulation")]
    snow_accumulation_cm: f64,

    #[serde(rename = "externalTemperature")]
    external_temperature_c: f64,

    #[serde(serialize_with = "serialize_timestamp")]
    timestamp: DateTime<Utc>,
}

impl Reading {
    /// Samples a new reading for the location, timestamped with the current time.
    pub fn generate<R: Rng + ?Sized>(location: &str, rng: &mut R) -> Self {
        Self {
            location: location.to_string(),
            ice_thickness_cm: round(rng.gen_range(ICE_THICKNESS_CM), 2),
            surface_temperature_c: round(rng.gen_range(SURFACE_TEMPERATURE_C), 1),
            snow_accumulation_cm: round(rng.gen_range(SNOW_ACCUMULATION_CM), 1),
            external_temperature_c: round(rng.gen_range(EXTERNAL_TEMPERATURE_C), 1),
            timestamp: Utc::now().trunc_subsecs(0),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn ice_thickness_cm(&self) -> f64 {
        self.ice_thickness_cm
    }

    pub fn surface_temperature_c(&self) -> f64 {
        self.surface_temperature_c
    }

    pub fn snow_accumulation_cm(&self) -> f64 {
        self.snow_accumulation_cm
    }

    pub fn external_temperature_c(&self) -> f64 {
        self.external_temperature_c
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Timestamp rendered with [`TIMESTAMP_FORMAT`].
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Rounds half away from zero. Adding zero turns `-0.0` into `0.0`.
fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor + 0.0
}

fn serialize_timestamp<S: Serializer>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
}
