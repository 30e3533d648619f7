pub mod info;
pub mod monitor;
pub mod stream;

use std::path::Path;

use powertap_core::{Elevation, IngestConfig, IngestError};

/// Sampling flags as given on the command line.
#[derive(Debug, Default)]
pub struct SamplingOptions<'a> {
    pub interval_secs: Option<f64>,
    pub avg_secs: Option<f64>,
    pub max_count: Option<u32>,
    pub nice: Option<i32>,
    pub no_sudo: bool,
    pub config_path: Option<&'a str>,
}

/// Apply command-line overrides on top of `base` and validate the result.
pub fn apply_overrides(
    mut base: IngestConfig,
    opts: &SamplingOptions<'_>,
) -> Result<IngestConfig, IngestError> {
    if let Some(secs) = opts.interval_secs {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(IngestError::Config(format!(
                "--interval must be a positive number of seconds, got {secs}"
            )));
        }
        base.sampler.interval_ms = (secs * 1000.0).round() as u64;
    }
    if let Some(avg) = opts.avg_secs {
        base.averaging_window_secs = avg;
    }
    if let Some(count) = opts.max_count {
        base.restart_interval = count;
    }
    if let Some(nice) = opts.nice {
        base.sampler.nice = nice;
    }
    if opts.no_sudo {
        base.sampler.elevation = Elevation::Direct;
    }
    base.validated()
}

/// Build the pipeline config from `--config` and the flags, exiting on error.
pub fn ingest_config(opts: &SamplingOptions<'_>) -> IngestConfig {
    let base = match opts.config_path {
        Some(path) => match IngestConfig::from_json_path(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        None => IngestConfig::default(),
    };
    match apply_overrides(base, opts) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
