//! The ingestion loop: sampler → reader → normalizer → aggregator → sink.
//!
//! This is the only component with timing concerns. It is strictly
//! sequential; cancellation is observed between ticks and during sleeps,
//! and an in-flight tick always completes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::aggregate::{DisplayMetrics, RollingAggregator};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::inventory::SocInfo;
use crate::normalize::MetricNormalizer;
use crate::reader::{ReadOutcome, RecordReader};
use crate::sampler::{Sampler, needs_sudo};
use crate::specs::{self, ChipSpec};

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Receives the loop's output.
pub trait MetricsSink {
    /// Called once, before the first metrics, with the static topology.
    fn topology(&mut self, _soc: &SocInfo) {}

    /// Called for every accepted sample. Returning `false` stops the loop.
    fn publish(&mut self, metrics: DisplayMetrics) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    WaitingForFirstSample,
    Running,
    Stopped,
}

/// Sleep for `total`, waking every few milliseconds to check `running`.
///
/// Returns `false` if `running` was cleared before the time was up.
pub fn sleep_while_running(total: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

pub struct IngestionLoop<S: Sampler> {
    config: IngestConfig,
    sampler: S,
    soc: SocInfo,
    reader: RecordReader,
    normalizer: MetricNormalizer,
    aggregator: RollingAggregator,
    state: LoopState,
    output: Option<PathBuf>,
    counted_ticks: u32,
}

impl<S: Sampler> IngestionLoop<S> {
    /// Build a loop for an already validated config.
    pub fn new(config: IngestConfig, sampler: S, soc: SocInfo) -> Self {
        let spec = specs::lookup(&soc.chip_name);
        if spec.is_default() {
            log::info!("no power table for {:?}, using defaults", soc.chip_name);
        }
        Self {
            reader: RecordReader::new(config.read_window_bytes),
            normalizer: MetricNormalizer::new(spec, config.sampling_interval()),
            aggregator: RollingAggregator::new(config.buffer_capacity()),
            config,
            sampler,
            soc,
            state: LoopState::Starting,
            output: None,
            counted_ticks: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn chip_spec(&self) -> &ChipSpec {
        self.normalizer.spec()
    }

    pub fn soc(&self) -> &SocInfo {
        &self.soc
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut S {
        &mut self.sampler
    }

    /// Ticks that read a record since the last restart.
    pub fn counted_ticks(&self) -> u32 {
        self.counted_ticks
    }

    /// Launch the sampler. Callers that need the terminal afterwards (the
    /// dashboard) call this first so `sudo` can still prompt.
    pub fn start(&mut self) -> Result<()> {
        if self.state != LoopState::Starting {
            return Ok(());
        }
        match self.sampler.start() {
            Ok(path) => {
                self.output = Some(path);
                self.state = LoopState::WaitingForFirstSample;
                Ok(())
            }
            Err(e) => {
                self.shutdown();
                Err(e)
            }
        }
    }

    /// Drive the loop until `running` is cleared, the sink asks to stop, or
    /// startup fails. The sampler is stopped on every path out.
    pub fn run(&mut self, running: &AtomicBool, sink: &mut impl MetricsSink) -> Result<()> {
        self.start()?;
        sink.topology(&self.soc);

        let result = self.drive(running, sink);
        self.shutdown();
        result
    }

    fn drive(&mut self, running: &AtomicBool, sink: &mut impl MetricsSink) -> Result<()> {
        let backoff = self.config.first_sample_backoff();
        while self.state == LoopState::WaitingForFirstSample {
            if !running.load(Ordering::SeqCst) {
                return Ok(());
            }
            if !self.wait_step(sink)? {
                return Ok(());
            }
            if self.state == LoopState::WaitingForFirstSample {
                sleep_while_running(backoff, running);
            }
        }

        let delay = self.config.tick_delay();
        while running.load(Ordering::SeqCst) {
            if !self.tick(sink)? {
                break;
            }
            sleep_while_running(delay, running);
        }
        Ok(())
    }

    /// One poll while waiting for the first record. Returns `false` if the
    /// sink asked to stop.
    pub fn wait_step(&mut self, sink: &mut impl MetricsSink) -> Result<bool> {
        let outcome = match &self.output {
            Some(path) => self.reader.read_latest(path),
            None => ReadOutcome::NotReady,
        };

        if let ReadOutcome::Ready(record) = outcome {
            log::info!("first sample received");
            self.state = LoopState::Running;
            let snapshot = self.normalizer.normalize(&record);
            return Ok(match self.aggregator.observe(&snapshot) {
                Some(metrics) => sink.publish(metrics),
                None => true,
            });
        }

        if let Some(status) = self.sampler.exit_status() {
            let err = if needs_sudo(self.config.sampler.elevation) {
                IngestError::Privilege(format!(
                    "{} exited with {status} before producing output (sudo may have refused)",
                    self.config.sampler.program
                ))
            } else {
                IngestError::SamplerExited { status }
            };
            return Err(err);
        }
        log::trace!("waiting for first sample");
        Ok(true)
    }

    /// One steady-state tick. Returns `false` if the sink asked to stop.
    pub fn tick(&mut self, sink: &mut impl MetricsSink) -> Result<bool> {
        let needs_restart = if self.output.is_none() {
            true
        } else if self.counted_ticks >= self.config.restart_interval {
            log::debug!("{} ticks since last start", self.counted_ticks);
            true
        } else if let Some(status) = self.sampler.exit_status() {
            log::warn!("sampler exited unexpectedly ({status}), restarting");
            true
        } else {
            false
        };

        if needs_restart {
            match self.sampler.restart() {
                Ok(path) => {
                    self.output = Some(path);
                    self.counted_ticks = 0;
                }
                Err(e) => {
                    // No sampler is running now; the next tick tries again.
                    log::warn!("sampler restart failed: {e}");
                    self.output = None;
                    return Ok(true);
                }
            }
        }

        let Some(path) = &self.output else {
            return Ok(true);
        };
        match self.reader.read_latest(path) {
            ReadOutcome::Ready(record) => {
                self.counted_ticks += 1;
                let snapshot = self.normalizer.normalize(&record);
                if let Some(metrics) = self.aggregator.observe(&snapshot) {
                    return Ok(sink.publish(metrics));
                }
            }
            ReadOutcome::NotReady => log::debug!("sampler output not ready"),
            ReadOutcome::DecodeFailure => log::debug!("no decodable record this tick"),
        }
        Ok(true)
    }

    /// Stop the sampler and remove its output.
    pub fn shutdown(&mut self) {
        if self.state != LoopState::Stopped {
            self.sampler.stop();
            self.output = None;
            self.state = LoopState::Stopped;
        }
    }
}
