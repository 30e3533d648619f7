//! Pipeline configuration.
//!
//! Every field has a default so a JSON config file only needs to name the
//! values it changes. The CLI loads an optional file and then applies its
//! flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Smallest sampling interval handed to the sampler.
pub const MIN_SAMPLE_INTERVAL_MS: u64 = 100;
/// Ticks between proactive sampler restarts.
pub const DEFAULT_RESTART_INTERVAL: u32 = 300;
/// Trailing window read from the sampler output on every poll.
pub const DEFAULT_READ_WINDOW_BYTES: usize = 50_000;
/// Shortest pause between two ticks of the ingestion loop.
pub const MIN_TICK_DELAY: Duration = Duration::from_millis(50);

/// How the sampler obtains the privileges it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    /// Wrap the sampler in `sudo -n` unless already running as root.
    #[default]
    Sudo,
    /// Run the sampler as the current user.
    Direct,
}

/// Sampler subprocess settings, passed verbatim to its command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub program: String,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub interval_ms: u64,
    pub nice: i32,
    pub samplers: Vec<String>,
    pub elevation: Elevation,
    pub stop_grace_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            program: "powermetrics".to_string(),
            output_dir: PathBuf::from("/tmp"),
            file_prefix: "powertap_powermetrics".to_string(),
            interval_ms: 1000,
            nice: 10,
            samplers: vec![
                "cpu_power".to_string(),
                "gpu_power".to_string(),
                "thermal".to_string(),
            ],
            elevation: Elevation::Sudo,
            stop_grace_ms: 3000,
        }
    }
}

impl SamplerConfig {
    /// Sampling interval after the minimum clamp.
    pub fn effective_interval_ms(&self) -> u64 {
        self.interval_ms.max(MIN_SAMPLE_INTERVAL_MS)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Settings for the whole ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub sampler: SamplerConfig,
    pub read_window_bytes: usize,
    /// Moving-average window for the power rails, in seconds.
    pub averaging_window_secs: f64,
    /// Counted ticks between proactive sampler restarts.
    pub restart_interval: u32,
    pub first_sample_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            read_window_bytes: DEFAULT_READ_WINDOW_BYTES,
            averaging_window_secs: 30.0,
            restart_interval: DEFAULT_RESTART_INTERVAL,
            first_sample_backoff_ms: 100,
        }
    }
}

impl IngestConfig {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| IngestError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| IngestError::Config(format!("{}: {e}", path.display())))
    }

    /// Check ranges and apply clamps, returning the config the pipeline runs with.
    pub fn validated(mut self) -> Result<Self> {
        if !self.averaging_window_secs.is_finite() || self.averaging_window_secs < 0.0 {
            return Err(IngestError::Config(format!(
                "averaging window must be a non-negative number of seconds, got {}",
                self.averaging_window_secs
            )));
        }
        if self.read_window_bytes == 0 {
            return Err(IngestError::Config(
                "read window must be at least one byte".to_string(),
            ));
        }
        if self.sampler.program.trim().is_empty() {
            return Err(IngestError::Config("sampler program is empty".to_string()));
        }
        if self.sampler.file_prefix.is_empty() {
            return Err(IngestError::Config("output file prefix is empty".to_string()));
        }
        self.sampler.interval_ms = self.sampler.effective_interval_ms();
        if self.restart_interval == 0 {
            self.restart_interval = DEFAULT_RESTART_INTERVAL;
        }
        Ok(self)
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampler.effective_interval_ms())
    }

    /// Ring-buffer capacity for the moving averages (at least 1).
    pub fn buffer_capacity(&self) -> usize {
        let interval = self.sampling_interval().as_secs_f64();
        let slots = (self.averaging_window_secs / interval).floor();
        if slots.is_finite() && slots >= 1.0 {
            slots as usize
        } else {
            1
        }
    }

    /// Pause between ticks, paced to the sampling interval.
    pub fn tick_delay(&self) -> Duration {
        self.sampling_interval().max(MIN_TICK_DELAY)
    }

    pub fn first_sample_backoff(&self) -> Duration {
        Duration::from_millis(self.first_sample_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = IngestConfig::default();
        assert_eq!(cfg.read_window_bytes, 50_000);
        assert_eq!(cfg.restart_interval, 300);
        assert_eq!(cfg.sampler.interval_ms, 1000);
        assert_eq!(cfg.sampler.nice, 10);
        assert_eq!(cfg.sampler.elevation, Elevation::Sudo);
        assert_eq!(cfg.buffer_capacity(), 30);
    }

    #[test]
    fn test_interval_clamped_to_minimum() {
        let mut cfg = IngestConfig::default();
        cfg.sampler.interval_ms = 20;
        let cfg = cfg.validated().unwrap();
        assert_eq!(cfg.sampler.interval_ms, MIN_SAMPLE_INTERVAL_MS);
        assert_eq!(cfg.tick_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_buffer_capacity_never_zero() {
        let mut cfg = IngestConfig::default();
        cfg.averaging_window_secs = 0.2;
        cfg.sampler.interval_ms = 1000;
        assert_eq!(cfg.buffer_capacity(), 1);

        cfg.averaging_window_secs = 5.0;
        cfg.sampler.interval_ms = 500;
        assert_eq!(cfg.buffer_capacity(), 10);
    }

    #[test]
    fn test_zero_restart_interval_uses_default() {
        let cfg = IngestConfig {
            restart_interval: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validated().unwrap().restart_interval, DEFAULT_RESTART_INTERVAL);
    }

    #[test]
    fn test_rejects_bad_window() {
        let cfg = IngestConfig {
            averaging_window_secs: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(cfg.validated(), Err(IngestError::Config(_))));

        let cfg = IngestConfig {
            read_window_bytes: 0,
            ..Default::default()
        };
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("powertap.json");
        std::fs::write(
            &path,
            r#"{ "restart_interval": 42, "sampler": { "nice": 5, "elevation": "direct" } }"#,
        )
        .unwrap();

        let cfg = IngestConfig::from_json_path(&path).unwrap();
        assert_eq!(cfg.restart_interval, 42);
        assert_eq!(cfg.sampler.nice, 5);
        assert_eq!(cfg.sampler.elevation, Elevation::Direct);
        assert_eq!(cfg.sampler.program, "powermetrics");
        assert_eq!(cfg.read_window_bytes, DEFAULT_READ_WINDOW_BYTES);
    }

    #[test]
    fn test_missing_config_file() {
        let err = IngestConfig::from_json_path(Path::new("/nonexistent/powertap.json"))
            .unwrap_err();
        assert!(matches!(err, IngestError::ConfigFile { .. }));
    }
}
