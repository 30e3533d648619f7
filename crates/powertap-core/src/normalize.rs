//! Raw sampler record → topology-independent snapshot.
//!
//! Chips expose anything from one E and one P cluster up to two E and four P
//! clusters, and sampler versions disagree on where the GPU rail lives and
//! whether frequencies are Hz or MHz. Everything downstream sees a single
//! [`CanonicalSnapshot`] shape.

use std::time::Duration;

use serde::Serialize;

use crate::record::{GpuSection, RawCluster, RawCore, RawRecord};
use crate::specs::ChipSpec;

/// Thermal label reported when the SoC is not throttling.
pub const NOMINAL_THERMAL_PRESSURE: &str = "Nominal";

/// Frequencies above this are Hz, at or below it MHz.
const HZ_THRESHOLD: f64 = 1e5;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// CPU cluster role, taken from the first letter of the cluster name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    Efficiency,
    Performance,
}

impl ClusterRole {
    /// `E*` clusters are efficiency, `P*` performance, anything else has no role.
    pub fn from_cluster_name(name: &str) -> Option<Self> {
        match name.chars().next() {
            Some('E') => Some(Self::Efficiency),
            Some('P') => Some(Self::Performance),
            _ => None,
        }
    }
}

/// Utilization and clock for a role, a cluster or a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Activity {
    pub active_percent: u8,
    pub freq_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreActivity {
    pub core: u32,
    pub active_percent: u8,
    pub freq_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterActivity {
    pub name: String,
    pub role: Option<ClusterRole>,
    pub active_percent: u8,
    pub freq_mhz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CpuMetrics {
    pub efficiency: Activity,
    pub performance: Activity,
    /// Efficiency cores, ordered by core index.
    pub efficiency_cores: Vec<CoreActivity>,
    /// Performance cores, ordered by core index.
    pub performance_cores: Vec<CoreActivity>,
    pub clusters: Vec<ClusterActivity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GpuMetrics {
    pub active_percent: u8,
    /// `None` until the sampler has reported a usable clock at least once.
    pub freq_mhz: Option<u32>,
}

/// Rail power in watts, never negative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PowerMetrics {
    pub cpu_w: f64,
    pub gpu_w: f64,
    pub ane_w: f64,
    pub package_w: f64,
    /// GPU watts were estimated from utilization because the rail read zero.
    pub gpu_estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThermalState {
    pub label: String,
    pub throttled: bool,
}

impl ThermalState {
    pub fn from_label(label: &str) -> Self {
        Self {
            label: label.to_string(),
            throttled: label != NOMINAL_THERMAL_PRESSURE,
        }
    }
}

/// One normalized sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalSnapshot {
    pub timestamp: i64,
    pub cpu: CpuMetrics,
    pub gpu: GpuMetrics,
    pub power: PowerMetrics,
    pub thermal: ThermalState,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Unrounded busy percentage for an idle ratio.
fn busy(idle_ratio: f64) -> f64 {
    (1.0 - idle_ratio) * 100.0
}

fn to_percent(value: f64) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

/// Busy percentage for an idle ratio, rounded and clamped to `[0, 100]`.
pub fn active_percent(idle_ratio: f64) -> u8 {
    to_percent(busy(idle_ratio))
}

/// Whole MHz for a Hz reading.
pub fn hz_to_mhz(freq_hz: f64) -> u32 {
    if freq_hz.is_finite() && freq_hz > 0.0 {
        (freq_hz / 1e6).floor() as u32
    } else {
        0
    }
}

/// GPU clock that may be in Hz or MHz depending on the sampler build.
pub fn gpu_freq_to_mhz(raw: f64) -> u32 {
    if raw > HZ_THRESHOLD {
        hz_to_mhz(raw)
    } else if raw.is_finite() && raw > 0.0 {
        raw.floor() as u32
    } else {
        0
    }
}

/// Residency-weighted average frequency, or `None` when no residency is recorded.
fn weighted_residency_mhz(gpu: &GpuSection) -> Option<u32> {
    let total: f64 = gpu.dvfm_states.iter().map(|s| s.used_ratio).sum();
    if !total.is_finite() || total <= 0.0 {
        return None;
    }
    let weighted: f64 = gpu.dvfm_states.iter().map(|s| s.freq * s.used_ratio).sum();
    let mhz = (weighted / total).floor();
    (mhz.is_finite() && mhz > 0.0).then_some(mhz as u32)
}

/// GPU power as a percentage of the chip's ceiling.
///
/// Nonzero readings below 1 % show as 1 % so light load never reads idle.
pub fn power_percent(watts: f64, max_watts: f64) -> u8 {
    if !max_watts.is_finite() || max_watts <= 0.0 || !watts.is_finite() || watts <= 0.0 {
        return 0;
    }
    let pct = watts / max_watts * 100.0;
    if pct < 1.0 { 1 } else { to_percent(pct) }
}

fn watts(energy: f64, interval_secs: f64) -> f64 {
    let w = energy / interval_secs / 1000.0;
    if w.is_finite() { w.max(0.0) } else { 0.0 }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Stateful normalizer. The only state is the last known GPU clock.
#[derive(Debug, Clone)]
pub struct MetricNormalizer {
    spec: ChipSpec,
    interval: Duration,
    last_gpu_freq_mhz: Option<u32>,
}

impl MetricNormalizer {
    pub fn new(spec: ChipSpec, interval: Duration) -> Self {
        Self {
            spec,
            interval,
            last_gpu_freq_mhz: None,
        }
    }

    pub fn spec(&self) -> &ChipSpec {
        &self.spec
    }

    pub fn normalize(&mut self, record: &RawRecord) -> CanonicalSnapshot {
        let interval_secs = self.interval.as_secs_f64();
        let proc = &record.processor;

        let gpu_energy = record
            .gpu
            .gpu_energy
            .filter(|e| *e != 0.0)
            .or(proc.gpu_energy)
            .unwrap_or(0.0);

        let mut power = PowerMetrics {
            cpu_w: watts(proc.cpu_energy, interval_secs),
            gpu_w: watts(gpu_energy, interval_secs),
            ane_w: watts(proc.ane_energy, interval_secs),
            package_w: watts(proc.combined_power, interval_secs),
            gpu_estimated: false,
        };

        let gpu = self.resolve_gpu(&record.gpu, &mut power);

        CanonicalSnapshot {
            timestamp: record.timestamp,
            cpu: normalize_cpu(&proc.clusters),
            gpu,
            power,
            thermal: ThermalState::from_label(&record.thermal_pressure),
        }
    }

    fn resolve_gpu(&mut self, raw: &GpuSection, power: &mut PowerMetrics) -> GpuMetrics {
        let max_w = self.spec.gpu_max_power_w;

        let direct = raw.idle_ratio.map(active_percent).filter(|&p| p > 0);
        let active_percent = direct.unwrap_or_else(|| power_percent(power.gpu_w, max_w));

        if power.gpu_w <= 0.0 && active_percent > 0 {
            power.gpu_w = f64::from(active_percent) / 100.0 * max_w.max(0.0);
            power.gpu_estimated = true;
        }

        let mut freq = raw.freq_hz.map_or(0, gpu_freq_to_mhz);
        if freq == 0 {
            freq = weighted_residency_mhz(raw).unwrap_or(0);
        }
        let freq_mhz = if freq > 0 {
            self.last_gpu_freq_mhz = Some(freq);
            Some(freq)
        } else {
            self.last_gpu_freq_mhz
        };

        GpuMetrics {
            active_percent,
            freq_mhz,
        }
    }
}

fn normalize_cpu(clusters: &[RawCluster]) -> CpuMetrics {
    let mut cpu = CpuMetrics::default();
    let mut e_busy = Vec::new();
    let mut p_busy = Vec::new();
    let mut e_freq = 0;
    let mut p_freq = 0;

    for cluster in clusters {
        let role = ClusterRole::from_cluster_name(&cluster.name);
        let freq_mhz = hz_to_mhz(cluster.freq_hz);

        cpu.clusters.push(ClusterActivity {
            name: cluster.name.clone(),
            role,
            active_percent: active_percent(cluster.idle_ratio),
            freq_mhz,
        });

        let (busy_list, max_freq, cores) = match role {
            Some(ClusterRole::Efficiency) => (&mut e_busy, &mut e_freq, &mut cpu.efficiency_cores),
            Some(ClusterRole::Performance) => {
                (&mut p_busy, &mut p_freq, &mut cpu.performance_cores)
            }
            None => continue,
        };
        busy_list.push(busy(cluster.idle_ratio));
        *max_freq = (*max_freq).max(freq_mhz);
        cores.extend(cluster.cpus.iter().map(core_activity));
    }

    cpu.efficiency = role_activity(&e_busy, e_freq);
    cpu.performance = role_activity(&p_busy, p_freq);
    cpu.efficiency_cores.sort_by_key(|c| c.core);
    cpu.performance_cores.sort_by_key(|c| c.core);
    cpu
}

fn core_activity(core: &RawCore) -> CoreActivity {
    CoreActivity {
        core: core.cpu,
        active_percent: active_percent(core.idle_ratio),
        freq_mhz: hz_to_mhz(core.freq_hz),
    }
}

/// Mean of the unrounded cluster percentages, rounded once.
fn role_activity(busy: &[f64], freq_mhz: u32) -> Activity {
    if busy.is_empty() {
        return Activity::default();
    }
    let mean = busy.iter().sum::<f64>() / busy.len() as f64;
    Activity {
        active_percent: to_percent(mean),
        freq_mhz,
    }
}
