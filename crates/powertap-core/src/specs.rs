//! Static power and bandwidth ceilings per chip.
//!
//! Used only as normalization inputs: the GPU power ceiling turns rail watts
//! into a utilization estimate, and the display scales its charts by them.

use serde::Serialize;

/// Power and memory-bandwidth ceilings for one chip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChipSpec {
    pub name: &'static str,
    pub cpu_max_power_w: f64,
    pub gpu_max_power_w: f64,
    pub cpu_max_bw_gbs: f64,
    pub gpu_max_bw_gbs: f64,
}

/// Entry used for chips missing from [`CHIP_SPECS`].
pub const DEFAULT_SPEC: ChipSpec = ChipSpec {
    name: "default",
    cpu_max_power_w: 20.0,
    gpu_max_power_w: 20.0,
    cpu_max_bw_gbs: 70.0,
    gpu_max_bw_gbs: 70.0,
};

/// Known chips, matched on the exact `machdep.cpu.brand_string`.
pub const CHIP_SPECS: &[ChipSpec] = &[
    ChipSpec {
        name: "Apple M1",
        cpu_max_power_w: 20.0,
        gpu_max_power_w: 20.0,
        cpu_max_bw_gbs: 70.0,
        gpu_max_bw_gbs: 70.0,
    },
    ChipSpec {
        name: "Apple M1 Pro",
        cpu_max_power_w: 30.0,
        gpu_max_power_w: 30.0,
        cpu_max_bw_gbs: 200.0,
        gpu_max_bw_gbs: 200.0,
    },
    ChipSpec {
        name: "Apple M1 Max",
        cpu_max_power_w: 30.0,
        gpu_max_power_w: 60.0,
        cpu_max_bw_gbs: 250.0,
        gpu_max_bw_gbs: 400.0,
    },
    ChipSpec {
        name: "Apple M1 Ultra",
        cpu_max_power_w: 60.0,
        gpu_max_power_w: 120.0,
        cpu_max_bw_gbs: 500.0,
        gpu_max_bw_gbs: 800.0,
    },
    ChipSpec {
        name: "Apple M2",
        cpu_max_power_w: 25.0,
        gpu_max_power_w: 15.0,
        cpu_max_bw_gbs: 100.0,
        gpu_max_bw_gbs: 100.0,
    },
];

/// Look up a chip by name, falling back to [`DEFAULT_SPEC`].
pub fn lookup(chip_name: &str) -> ChipSpec {
    let name = chip_name.trim();
    CHIP_SPECS
        .iter()
        .find(|spec| spec.name == name)
        .copied()
        .unwrap_or(DEFAULT_SPEC)
}

impl ChipSpec {
    /// Whether this is the fallback entry.
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_SPEC.name
    }
}
