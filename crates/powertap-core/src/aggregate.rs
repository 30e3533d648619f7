//! Rolling averages and peaks for the power rails.
//!
//! Memory is bounded by the ring-buffer capacity fixed at construction. A
//! snapshot is only accepted if its timestamp is newer than the last one, so
//! re-reading the same record twice never double-counts it.

use std::collections::VecDeque;

use serde::Serialize;

use crate::normalize::{CanonicalSnapshot, CpuMetrics, GpuMetrics, ThermalState};

/// Fixed-capacity FIFO of wattages. The oldest value is evicted when full.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Mean of the current contents, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Instantaneous, moving-average and peak watts for one rail.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RailStats {
    pub current: f64,
    pub average: f64,
    pub peak: f64,
}

#[derive(Debug, Clone)]
struct Rail {
    window: RingBuffer,
    peak: f64,
}

impl Rail {
    fn new(capacity: usize) -> Self {
        Self {
            window: RingBuffer::new(capacity),
            peak: 0.0,
        }
    }

    fn record(&mut self, watts: f64) -> RailStats {
        self.window.push(watts);
        self.peak = self.peak.max(watts);
        RailStats {
            current: watts,
            average: self.window.mean(),
            peak: self.peak,
        }
    }
}

/// What the display collaborators render for one accepted sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayMetrics {
    pub timestamp: i64,
    pub cpu: CpuMetrics,
    pub gpu: GpuMetrics,
    pub thermal: ThermalState,
    pub cpu_power: RailStats,
    pub gpu_power: RailStats,
    pub package_power: RailStats,
    pub ane_w: f64,
    pub gpu_power_estimated: bool,
}

/// Owns the rolling state for the cpu, gpu and package rails.
#[derive(Debug, Clone)]
pub struct RollingAggregator {
    cpu: Rail,
    gpu: Rail,
    package: Rail,
    last_timestamp: Option<i64>,
}

impl RollingAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            cpu: Rail::new(capacity),
            gpu: Rail::new(capacity),
            package: Rail::new(capacity),
            last_timestamp: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cpu.window.capacity()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Fold a snapshot into the rolling state.
    ///
    /// Returns `None` without touching any state when the snapshot is not
    /// newer than the last accepted one.
    pub fn observe(&mut self, snapshot: &CanonicalSnapshot) -> Option<DisplayMetrics> {
        if self.last_timestamp.is_some_and(|last| snapshot.timestamp <= last) {
            log::trace!("dropping stale snapshot at {}", snapshot.timestamp);
            return None;
        }
        self.last_timestamp = Some(snapshot.timestamp);

        let power = &snapshot.power;
        Some(DisplayMetrics {
            timestamp: snapshot.timestamp,
            cpu: snapshot.cpu.clone(),
            gpu: snapshot.gpu,
            thermal: snapshot.thermal.clone(),
            cpu_power: self.cpu.record(power.cpu_w),
            gpu_power: self.gpu.record(power.gpu_w),
            package_power: self.package.record(power.package_w),
            ane_w: power.ane_w,
            gpu_power_estimated: power.gpu_estimated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{PowerMetrics, ThermalState};

    fn snapshot(timestamp: i64, watts: f64) -> CanonicalSnapshot {
        CanonicalSnapshot {
            timestamp,
            cpu: CpuMetrics::default(),
            gpu: GpuMetrics::default(),
            power: PowerMetrics {
                cpu_w: watts,
                gpu_w: watts / 2.0,
                ane_w: 0.0,
                package_w: watts * 2.0,
                gpu_estimated: false,
            },
            thermal: ThermalState::from_label("Nominal"),
        }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut buf = RingBuffer::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            buf.push(v);
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.mean(), 3.0);
    }

    #[test]
    fn test_ring_buffer_zero_capacity_becomes_one() {
        let mut buf = RingBuffer::new(0);
        assert!(buf.is_empty());
        assert_eq!(buf.mean(), 0.0);
        buf.push(2.0);
        buf.push(9.0);
        assert_eq!(buf.capacity(), 1);
        assert_eq!(buf.mean(), 9.0);
    }

    #[test]
    fn test_duplicate_and_older_timestamps_rejected() {
        let mut agg = RollingAggregator::new(2);
        let accepted: Vec<_> = [(1000, 5.0), (1000, 6.0), (999, 7.0), (1001, 8.0)]
            .into_iter()
            .filter_map(|(ts, w)| agg.observe(&snapshot(ts, w)))
            .collect();

        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].timestamp, 1000);
        assert_eq!(accepted[0].cpu_power.current, 5.0);
        assert_eq!(accepted[1].timestamp, 1001);
        assert_eq!(accepted[1].cpu_power.current, 8.0);
        assert_eq!(accepted[1].cpu_power.average, 6.5);
        assert_eq!(accepted[1].cpu_power.peak, 8.0);
        assert_eq!(agg.last_timestamp(), Some(1001));
    }

    #[test]
    fn test_peak_is_monotonic_while_average_moves() {
        let mut agg = RollingAggregator::new(2);
        agg.observe(&snapshot(1, 10.0));
        agg.observe(&snapshot(2, 2.0));
        let m = agg.observe(&snapshot(3, 4.0)).unwrap();
        assert_eq!(m.cpu_power.peak, 10.0);
        assert_eq!(m.cpu_power.average, 3.0);
        assert_eq!(m.package_power.peak, 20.0);
        assert_eq!(m.gpu_power.average, 1.5);
    }

    #[test]
    fn test_partial_buffer_average() {
        let mut agg = RollingAggregator::new(30);
        agg.observe(&snapshot(1, 3.0));
        let m = agg.observe(&snapshot(2, 6.0)).unwrap();
        assert_eq!(m.cpu_power.average, 4.5);
        assert_eq!(agg.capacity(), 30);
    }

    #[test]
    fn test_rejected_snapshot_leaves_state_untouched() {
        let mut agg = RollingAggregator::new(4);
        agg.observe(&snapshot(5, 1.0));
        assert!(agg.observe(&snapshot(5, 100.0)).is_none());
        let m = agg.observe(&snapshot(6, 3.0)).unwrap();
        assert_eq!(m.cpu_power.peak, 3.0);
        assert_eq!(m.cpu_power.average, 2.0);
    }

    #[test]
    fn test_display_metrics_serialize() {
        let mut agg = RollingAggregator::new(1);
        let m = agg.observe(&snapshot(42, 1.5)).unwrap();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["cpu_power"]["current"], 1.5);
        assert_eq!(json["thermal"]["throttled"], false);
        assert!(json["gpu"]["freq_mhz"].is_null());
    }
}
