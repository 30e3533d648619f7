//! Typed schema for one sampler document.
//!
//! `powermetrics -f plist` writes one property-list document per sampling
//! interval. Only the fields the pipeline reads are modelled; everything
//! else is ignored. Fields that differ between sampler versions are
//! `Option`s or default to empty, fields the pipeline cannot work without
//! are required so a document missing them fails to decode.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, de};

/// One decoded sampler document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecord {
    /// Sampler-assigned timestamp. Integer timestamps are kept as-is, plist
    /// dates become Unix milliseconds.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
    pub thermal_pressure: String,
    pub processor: ProcessorSection,
    pub gpu: GpuSection,
}

/// `processor` dictionary: clusters and energy counters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessorSection {
    pub clusters: Vec<RawCluster>,
    pub ane_energy: f64,
    pub cpu_energy: f64,
    pub combined_power: f64,
    /// GPU rail as reported by the processor sampler (older builds).
    #[serde(default)]
    pub gpu_energy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawCluster {
    pub name: String,
    pub freq_hz: f64,
    pub idle_ratio: f64,
    #[serde(default)]
    pub cpus: Vec<RawCore>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawCore {
    pub cpu: u32,
    pub freq_hz: f64,
    pub idle_ratio: f64,
}

/// `gpu` dictionary. Every field is optional across sampler versions.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct GpuSection {
    /// Hz on older builds, MHz on newer ones.
    #[serde(default)]
    pub freq_hz: Option<f64>,
    #[serde(default)]
    pub idle_ratio: Option<f64>,
    /// GPU rail as reported by the GPU sampler (newer builds).
    #[serde(default)]
    pub gpu_energy: Option<f64>,
    /// Frequency residency table.
    #[serde(default)]
    pub dvfm_states: Vec<DvfmState>,
}

/// One row of the GPU frequency residency table.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct DvfmState {
    /// MHz.
    #[serde(default)]
    pub freq: f64,
    #[serde(default)]
    pub used_ratio: f64,
}

/// Why a fragment could not be turned into a [`RawRecord`].
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("plist decode failed: {0}")]
    Decode(#[from] plist::Error),
    #[error("record has no CPU clusters")]
    NoClusters,
}

impl RawRecord {
    /// Decode one plist document and check it carries what the normalizer needs.
    pub fn from_plist_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let record: RawRecord = plist::from_bytes(bytes)?;
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<(), RecordError> {
        if self.processor.clusters.is_empty() {
            return Err(RecordError::NoClusters);
        }
        Ok(())
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match plist::Value::deserialize(deserializer)? {
        plist::Value::Integer(i) => i
            .as_signed()
            .or_else(|| i.as_unsigned().map(|u| u.min(i64::MAX as u64) as i64))
            .ok_or_else(|| de::Error::custom("timestamp out of range")),
        plist::Value::Real(f) if f.is_finite() => Ok(f as i64),
        plist::Value::Date(date) => {
            let at: SystemTime = date.into();
            let millis = match at.duration_since(UNIX_EPOCH) {
                Ok(d) => d.as_millis() as i64,
                Err(e) => -(e.duration().as_millis() as i64),
            };
            Ok(millis)
        }
        other => Err(de::Error::custom(format!(
            "unsupported timestamp value: {other:?}"
        ))),
    }
}
