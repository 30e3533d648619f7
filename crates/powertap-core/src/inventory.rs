//! Best-effort system inventory: chip name, core topology, memory usage.
//!
//! Everything here shells out to stock macOS tools (`sysctl`, `vm_stat`,
//! `system_profiler`) with a timeout and degrades to `None` instead of
//! failing. The parsers are plain functions over command output so they can
//! be tested on any platform.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;

const SYSCTL_TIMEOUT: Duration = Duration::from_millis(400);
const SYSTEM_PROFILER_TIMEOUT: Duration = Duration::from_secs(5);

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Static SoC description, gathered once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocInfo {
    pub chip_name: String,
    pub core_count: usize,
    pub e_core_count: Option<usize>,
    pub p_core_count: Option<usize>,
    pub gpu_core_count: Option<usize>,
}

impl SocInfo {
    /// One-line summary such as `Apple M1 Pro (cores: 2E+8P+16GPU)`.
    pub fn title(&self) -> String {
        format!(
            "{} (cores: {}E+{}P+{}GPU)",
            self.chip_name,
            count_or_unknown(self.e_core_count),
            count_or_unknown(self.p_core_count),
            count_or_unknown(self.gpu_core_count),
        )
    }
}

fn count_or_unknown(count: Option<usize>) -> String {
    count.map_or_else(|| "?".to_string(), |c| c.to_string())
}

/// Point-in-time RAM and swap usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

impl MemoryUsage {
    /// Used RAM as a whole percentage of total, clamped to `[0, 100]`.
    pub fn used_percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let pct = self.used_bytes as f64 / self.total_bytes as f64 * 100.0;
        pct.clamp(0.0, 100.0) as u8
    }

    /// Swap counts as active from 0.1 GB upwards.
    pub fn swap_active(&self) -> bool {
        bytes_to_gb(self.swap_total_bytes) >= 0.1
    }
}

/// Convert bytes to GiB rounded to one decimal.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Command helpers
// ---------------------------------------------------------------------------

/// Run a command, returning trimmed stdout if it exits successfully in time.
fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                let mut out = Vec::new();
                if let Some(mut stdout) = child.stdout.take() {
                    let _ = stdout.read_to_end(&mut out);
                }
                let s = String::from_utf8_lossy(&out).trim().to_string();
                return if s.is_empty() { None } else { Some(s) };
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return None,
        }
    }
}

fn read_sysctl(key: &str) -> Option<String> {
    run_command("sysctl", &["-n", key], SYSCTL_TIMEOUT)
}

fn read_sysctl_usize(key: &str) -> Option<usize> {
    read_sysctl(key).and_then(|s| s.trim().parse().ok())
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Query chip name and core topology.
pub fn detect_soc_info() -> SocInfo {
    let chip_name = read_sysctl("machdep.cpu.brand_string").unwrap_or_else(|| "unknown".into());
    let core_count = read_sysctl_usize("machdep.cpu.core_count").unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    let gpu_core_count = run_command(
        "system_profiler",
        &["-detailLevel", "basic", "SPDisplaysDataType"],
        SYSTEM_PROFILER_TIMEOUT,
    )
    .and_then(|out| parse_gpu_core_count(&out));

    SocInfo {
        chip_name,
        core_count,
        // perflevel0 is the performance tier, perflevel1 the efficiency tier.
        e_core_count: read_sysctl_usize("hw.perflevel1.logicalcpu"),
        p_core_count: read_sysctl_usize("hw.perflevel0.logicalcpu"),
        gpu_core_count,
    }
}

/// Query RAM and swap usage.
pub fn detect_memory_usage() -> Option<MemoryUsage> {
    let total_bytes: u64 = read_sysctl("hw.memsize")?.trim().parse().ok()?;
    let vm = run_command("vm_stat", &[], SYSCTL_TIMEOUT).and_then(|s| parse_vm_stat(&s))?;
    let (swap_total_bytes, swap_used_bytes) = read_sysctl("vm.swapusage")
        .and_then(|s| parse_swapusage(&s))
        .unwrap_or((0, 0));

    Some(MemoryUsage {
        total_bytes,
        used_bytes: total_bytes.saturating_sub(vm.available_bytes()),
        swap_total_bytes,
        swap_used_bytes,
    })
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Page counts from `vm_stat` that matter for "available" memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmStat {
    pub page_size: u64,
    pub free_pages: u64,
    pub inactive_pages: u64,
}

impl VmStat {
    /// Free plus inactive pages, in bytes.
    pub fn available_bytes(&self) -> u64 {
        (self.free_pages + self.inactive_pages).saturating_mul(self.page_size)
    }
}

fn parse_vm_stat_value(raw: &str) -> Option<u64> {
    let cleaned = raw.replace(['.', ','], "");
    cleaned.split_whitespace().next()?.parse().ok()
}

/// Parse `vm_stat` output.
pub fn parse_vm_stat(raw: &str) -> Option<VmStat> {
    let mut stat = VmStat {
        page_size: 4096,
        ..Default::default()
    };
    let mut seen = false;

    for line in raw.lines() {
        if let Some(ps) = line
            .split("page size of")
            .nth(1)
            .and_then(|s| s.split_whitespace().next())
            .and_then(|s| s.parse::<u64>().ok())
        {
            stat.page_size = ps;
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Some(value) = parse_vm_stat_value(value) else {
            continue;
        };
        match key.trim().trim_matches('"') {
            "Pages free" => {
                stat.free_pages = value;
                seen = true;
            }
            "Pages inactive" => {
                stat.inactive_pages = value;
                seen = true;
            }
            _ => {}
        }
    }

    seen.then_some(stat)
}

/// Parse a size token with a binary suffix, e.g. `2048.00M`.
fn parse_size_with_suffix(token: &str) -> Option<f64> {
    let suffix = token.chars().last()?;
    let multiplier = match suffix {
        'K' | 'k' => 1024.0,
        'M' | 'm' => 1024.0 * 1024.0,
        'G' | 'g' => BYTES_PER_GB,
        'T' | 't' => BYTES_PER_GB * 1024.0,
        _ => return token.parse::<f64>().ok(),
    };
    let number = token.get(..token.len().saturating_sub(1))?;
    number.parse::<f64>().ok().map(|v| v * multiplier)
}

/// Parse `sysctl vm.swapusage` into `(total, used)` bytes.
pub fn parse_swapusage(raw: &str) -> Option<(u64, u64)> {
    let field = |label: &str| {
        raw.split(&format!("{label} ="))
            .nth(1)
            .and_then(|s| s.split_whitespace().next())
            .and_then(parse_size_with_suffix)
    };
    let total = field("total")?;
    let used = field("used")?;
    Some((total as u64, used as u64))
}

/// Extract the GPU core count from `system_profiler SPDisplaysDataType`.
pub fn parse_gpu_core_count(raw: &str) -> Option<usize> {
    raw.lines()
        .find(|line| line.contains("Total Number of Cores"))
        .and_then(|line| line.rsplit(':').next())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM_STAT_SAMPLE: &str = "\
Mach Virtual Memory Statistics: (page size of 16384 bytes)
Pages free:                               12000.
Pages active:                            300000.
Pages inactive:                          288000.
Pages speculative:                         5000.
Pages wired down:                        150000.
\"Translation faults\":                 123456789.
";

    #[test]
    fn test_parse_vm_stat() {
        let stat = parse_vm_stat(VM_STAT_SAMPLE).unwrap();
        assert_eq!(stat.page_size, 16384);
        assert_eq!(stat.free_pages, 12000);
        assert_eq!(stat.inactive_pages, 288000);
        assert_eq!(stat.available_bytes(), 300_000 * 16384);
    }

    #[test]
    fn test_parse_vm_stat_garbage() {
        assert!(parse_vm_stat("nothing useful here").is_none());
    }

    #[test]
    fn test_parse_swapusage() {
        let (total, used) =
            parse_swapusage("total = 2048.00M  used = 1024.50M  free = 1023.50M  (encrypted)")
                .unwrap();
        assert_eq!(total, 2048 * 1024 * 1024);
        assert_eq!(used, (1024.5 * 1024.0 * 1024.0) as u64);
    }

    #[test]
    fn test_parse_swapusage_zero() {
        let (total, used) =
            parse_swapusage("total = 0.00M  used = 0.00M  free = 0.00M  (encrypted)").unwrap();
        assert_eq!((total, used), (0, 0));
    }

    #[test]
    fn test_parse_gpu_core_count() {
        let raw = "Graphics/Displays:\n\n    Apple M1 Max:\n\n      Chipset Model: Apple M1 Max\n      Type: GPU\n      Total Number of Cores: 32\n";
        assert_eq!(parse_gpu_core_count(raw), Some(32));
        assert_eq!(parse_gpu_core_count("Chipset Model: Apple M1"), None);
        assert_eq!(parse_gpu_core_count("Total Number of Cores: lots"), None);
    }

    #[test]
    fn test_soc_title() {
        let soc = SocInfo {
            chip_name: "Apple M1 Pro".into(),
            core_count: 10,
            e_core_count: Some(2),
            p_core_count: Some(8),
            gpu_core_count: None,
        };
        assert_eq!(soc.title(), "Apple M1 Pro (cores: 2E+8P+?GPU)");
    }

    #[test]
    fn test_memory_usage_helpers() {
        let gb = 1024 * 1024 * 1024;
        let mem = MemoryUsage {
            total_bytes: 16 * gb,
            used_bytes: 12 * gb,
            swap_total_bytes: 0,
            swap_used_bytes: 0,
        };
        assert_eq!(mem.used_percent(), 75);
        assert!(!mem.swap_active());
        assert_eq!(bytes_to_gb(12 * gb), 12.0);
        assert_eq!(bytes_to_gb(gb + gb / 4), 1.3);
    }

    #[test]
    fn test_detect_soc_info_never_panics() {
        let soc = detect_soc_info();
        assert!(soc.core_count > 0);
        assert!(!soc.chip_name.is_empty());
    }
}
