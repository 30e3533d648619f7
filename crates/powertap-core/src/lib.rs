//! # powertap-core
//!
//! Live power and utilization telemetry for Apple Silicon, ingested from
//! `powermetrics`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use powertap_core::{
//!     DisplayMetrics, IngestConfig, IngestionLoop, MetricsSink, SamplerProcess,
//!     detect_soc_info, ensure_privileges,
//! };
//!
//! struct Print;
//! impl MetricsSink for Print {
//!     fn publish(&mut self, m: DisplayMetrics) -> bool {
//!         println!("{:.2} W package", m.package_power.current);
//!         true
//!     }
//! }
//!
//! let config = IngestConfig::default().validated()?;
//! ensure_privileges(&config.sampler)?;
//! let sampler = SamplerProcess::new(config.sampler.clone());
//! let mut ingest = IngestionLoop::new(config, sampler, detect_soc_info());
//! ingest.run(&AtomicBool::new(true), &mut Print)?;
//! # Ok::<(), powertap_core::IngestError>(())
//! ```
//!
//! ## Architecture
//!
//! Sampler subprocess → output file → RecordReader → MetricNormalizer →
//! RollingAggregator → [`MetricsSink`]
//!
//! - [`SamplerProcess`] owns `powermetrics`: start, periodic restart,
//!   SIGTERM-then-SIGKILL stop, orphan sweep, output-file cleanup.
//! - [`RecordReader`] tails the NUL-separated plist stream within a fixed
//!   byte window and falls back past torn writes.
//! - [`MetricNormalizer`] folds every chip topology and sampler version into
//!   one [`CanonicalSnapshot`].
//! - [`RollingAggregator`] keeps bounded moving averages and peaks and drops
//!   anything not newer than the last accepted sample.
//! - [`IngestionLoop`] drives them on the sampling cadence.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod ingest;
pub mod inventory;
pub mod normalize;
pub mod reader;
pub mod record;
pub mod sampler;
pub mod specs;

pub use aggregate::{DisplayMetrics, RailStats, RingBuffer, RollingAggregator};
pub use config::{Elevation, IngestConfig, SamplerConfig};
pub use error::{IngestError, Result};
pub use ingest::{IngestionLoop, LoopState, MetricsSink, sleep_while_running};
pub use inventory::{MemoryUsage, SocInfo, detect_memory_usage, detect_soc_info};
pub use normalize::{
    Activity, CanonicalSnapshot, ClusterRole, CpuMetrics, GpuMetrics, MetricNormalizer,
    PowerMetrics, ThermalState,
};
pub use reader::{ReadOutcome, RecordReader};
pub use record::RawRecord;
pub use sampler::{Sampler, SamplerHandle, SamplerProcess, ensure_privileges, is_root};
pub use specs::ChipSpec;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
