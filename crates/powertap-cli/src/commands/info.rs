//! `powertap info`: what the dashboard would be working with.

use powertap_core::inventory::bytes_to_gb;
use powertap_core::{ChipSpec, MemoryUsage, SocInfo, detect_memory_usage, detect_soc_info, specs};
use serde::Serialize;

#[derive(Serialize)]
struct InfoReport<'a> {
    version: &'static str,
    soc: &'a SocInfo,
    spec: &'a ChipSpec,
    spec_is_default: bool,
    memory: Option<MemoryUsage>,
}

pub fn run(json: bool) {
    let soc = detect_soc_info();
    let spec = specs::lookup(&soc.chip_name);
    let memory = detect_memory_usage();

    if json {
        let report = InfoReport {
            version: powertap_core::VERSION,
            soc: &soc,
            spec: &spec,
            spec_is_default: spec.is_default(),
            memory,
        };
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    println!("{}", soc.title());
    println!("  Logical cores:  {}", soc.core_count);
    println!(
        "  Power table:    {}{}",
        spec.name,
        if spec.is_default() { " (no match, using defaults)" } else { "" }
    );
    println!(
        "  Max power:      CPU {:.0} W   GPU {:.0} W",
        spec.cpu_max_power_w, spec.gpu_max_power_w
    );
    println!(
        "  Max bandwidth:  CPU {:.0} GB/s   GPU {:.0} GB/s",
        spec.cpu_max_bw_gbs, spec.gpu_max_bw_gbs
    );
    match memory {
        Some(mem) => {
            println!(
                "  RAM:            {}/{} GB ({}%)",
                bytes_to_gb(mem.used_bytes),
                bytes_to_gb(mem.total_bytes),
                mem.used_percent()
            );
            println!("  Swap:           {}", swap_summary(&mem));
        }
        None => println!("  RAM:            unavailable"),
    }
}

/// `used/total GB`, or `inactive` when swap is effectively off.
pub fn swap_summary(mem: &MemoryUsage) -> String {
    if mem.swap_active() {
        format!(
            "{}/{} GB",
            bytes_to_gb(mem.swap_used_bytes),
            bytes_to_gb(mem.swap_total_bytes)
        )
    } else {
        "inactive".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_summary() {
        let gb = 1024 * 1024 * 1024;
        let mut mem = MemoryUsage {
            total_bytes: 16 * gb,
            used_bytes: 8 * gb,
            swap_total_bytes: 0,
            swap_used_bytes: 0,
        };
        assert_eq!(swap_summary(&mem), "inactive");

        mem.swap_total_bytes = 2 * gb;
        mem.swap_used_bytes = gb / 2;
        assert_eq!(swap_summary(&mem), "0.5/2 GB");
    }
}
