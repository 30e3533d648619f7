//! Dashboard rendering.
//!
//! ┌ Apple M1 Pro (cores: 2E+8P+16GPU) ───────────────────┐
//! │ E-CPU 23% @ 2064 MHz      │ P-CPU 41% @ 3228 MHz      │
//! │ GPU 12% @ 389 MHz         │ ANE 0% @ 0.0 W            │
//! ├ Memory ──────────────────────────────────────────────┤
//! │ RAM 12.1/16 GB - swap inactive                        │
//! ├ CPU 3.21 W (avg 2.80 W peak 9.12 W) ┬ GPU ... ───────┤
//! │ ▁▂▃▅▂▁                              │ ▁▁▂▁            │
//! └──────────────────────────────────────────────────────┘
//!  package 4.02 W (avg 3.50 W peak 12.40 W)  throttle: no   q: quit

use super::app::{App, ane_percent};
use powertap_core::inventory::bytes_to_gb;
use powertap_core::normalize::CoreActivity;
use powertap_core::{DisplayMetrics, MemoryUsage, RailStats};
use ratatui::{prelude::*, widgets::*};

/// Per-core gauges per row before wrapping.
const CORES_PER_ROW: usize = 8;

/// Colour scheme selected with `--color`.
pub fn scheme_color(scheme: u8) -> Color {
    match scheme {
        0 => Color::White,
        1 => Color::Red,
        2 => Color::Green,
        3 => Color::Yellow,
        4 => Color::Blue,
        5 => Color::Magenta,
        6 => Color::Cyan,
        7 => Color::Gray,
        _ => Color::LightGreen,
    }
}

pub fn draw(f: &mut Frame, app: &App) {
    let color = scheme_color(app.options().color);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(processor_height(app)), // gauges
            Constraint::Length(3),                     // memory
            Constraint::Min(6),                        // power charts
            Constraint::Length(1),                     // footer
        ])
        .split(f.area());

    draw_processor(f, rows[0], app, color);
    draw_memory(f, rows[1], app.memory(), color);
    draw_power(f, rows[2], app, color);
    draw_footer(f, rows[3], app.latest());
}

fn core_rows(count: usize) -> u16 {
    count.div_ceil(CORES_PER_ROW) as u16
}

fn processor_height(app: &App) -> u16 {
    let base = 2 * 3 + 2;
    if !app.options().show_cores {
        return base;
    }
    let (e, p) = app
        .latest()
        .map(|m| (m.cpu.efficiency_cores.len(), m.cpu.performance_cores.len()))
        .unwrap_or((0, 0));
    base + 3 + 3 * (core_rows(e) + core_rows(p))
}

fn gauge<'a>(title: String, percent: u8, color: Color) -> Gauge<'a> {
    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .gauge_style(Style::default().fg(color))
        .percent(u16::from(percent.min(100)))
}

pub fn gpu_label(metrics: &DisplayMetrics) -> String {
    match metrics.gpu.freq_mhz {
        Some(mhz) => format!("GPU {}% @ {mhz} MHz", metrics.gpu.active_percent),
        None => format!("GPU {}% @ N/A MHz", metrics.gpu.active_percent),
    }
}

fn draw_processor(f: &mut Frame, area: Rect, app: &App, color: Color) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(Span::styled(
            format!(" {} ", app.soc().title()),
            Style::default().bold(),
        ));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(m) = app.latest() else {
        let p = Paragraph::new("Waiting for the first powermetrics sample…")
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(p, inner);
        return;
    };

    let e = gauge(
        format!(
            "E-CPU {}% @ {} MHz",
            m.cpu.efficiency.active_percent, m.cpu.efficiency.freq_mhz
        ),
        m.cpu.efficiency.active_percent,
        color,
    );
    let p = gauge(
        format!(
            "P-CPU {}% @ {} MHz",
            m.cpu.performance.active_percent, m.cpu.performance.freq_mhz
        ),
        m.cpu.performance.active_percent,
        color,
    );
    let gpu = gauge(gpu_label(m), m.gpu.active_percent, color);
    let ane_pct = ane_percent(m.ane_w);
    let ane = gauge(format!("ANE {ane_pct}% @ {:.1} W", m.ane_w), ane_pct, color);

    if !app.options().show_cores {
        let rows = Layout::vertical([Constraint::Length(3), Constraint::Length(3)]).split(inner);
        let top = Layout::horizontal([Constraint::Percentage(50); 2]).split(rows[0]);
        let bottom = Layout::horizontal([Constraint::Percentage(50); 2]).split(rows[1]);
        f.render_widget(e, top[0]);
        f.render_widget(p, top[1]);
        f.render_widget(gpu, bottom[0]);
        f.render_widget(ane, bottom[1]);
        return;
    }

    let e_rows = core_rows(m.cpu.efficiency_cores.len());
    let p_rows = core_rows(m.cpu.performance_cores.len());
    let rows = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(3 * e_rows),
        Constraint::Length(3),
        Constraint::Length(3 * p_rows),
        Constraint::Length(3),
    ])
    .split(inner);

    f.render_widget(e, rows[0]);
    draw_cores(f, rows[1], &m.cpu.efficiency_cores, color);
    f.render_widget(p, rows[2]);
    draw_cores(f, rows[3], &m.cpu.performance_cores, color);
    let last = Layout::horizontal([Constraint::Percentage(50); 2]).split(rows[4]);
    f.render_widget(gpu, last[0]);
    f.render_widget(ane, last[1]);
}

fn draw_cores(f: &mut Frame, area: Rect, cores: &[CoreActivity], color: Color) {
    if cores.is_empty() {
        return;
    }
    let rows = Layout::vertical(vec![Constraint::Length(3); core_rows(cores.len()) as usize])
        .split(area);
    for (chunk, row) in cores.chunks(CORES_PER_ROW).zip(rows.iter()) {
        let cells = Layout::horizontal(vec![Constraint::Ratio(1, chunk.len() as u32); chunk.len()])
            .split(*row);
        for (core, cell) in chunk.iter().zip(cells.iter()) {
            let g = gauge(
                format!("C{} {}%", core.core, core.active_percent),
                core.active_percent,
                color,
            )
            .label(format!("{} MHz", core.freq_mhz));
            f.render_widget(g, *cell);
        }
    }
}

pub fn memory_label(mem: &MemoryUsage) -> String {
    let ram = format!(
        "RAM {}/{} GB",
        bytes_to_gb(mem.used_bytes),
        bytes_to_gb(mem.total_bytes)
    );
    if mem.swap_active() {
        format!(
            "{ram} - swap {}/{} GB",
            bytes_to_gb(mem.swap_used_bytes),
            bytes_to_gb(mem.swap_total_bytes)
        )
    } else {
        format!("{ram} - swap inactive")
    }
}

fn draw_memory(f: &mut Frame, area: Rect, memory: Option<&MemoryUsage>, color: Color) {
    let widget = match memory {
        Some(mem) => gauge(memory_label(mem), mem.used_percent(), color),
        None => gauge("RAM unavailable".to_string(), 0, Color::DarkGray),
    };
    f.render_widget(widget, area);
}

pub fn rail_label(name: &str, rail: &RailStats) -> String {
    format!(
        "{name} {:.2} W (avg {:.2} W peak {:.2} W)",
        rail.current, rail.average, rail.peak
    )
}

fn draw_power(f: &mut Frame, area: Rect, app: &App, color: Color) {
    let halves = if app.options().show_cores {
        Layout::vertical([Constraint::Percentage(50); 2]).split(area)
    } else {
        Layout::horizontal([Constraint::Percentage(50); 2]).split(area)
    };

    let (cpu_title, gpu_title) = match app.latest() {
        Some(m) => {
            let mut gpu = rail_label("GPU", &m.gpu_power);
            if m.gpu_power_estimated {
                gpu.push_str(" est.");
            }
            (rail_label("CPU", &m.cpu_power), gpu)
        }
        None => ("CPU".to_string(), "GPU".to_string()),
    };

    let cpu_data = app.cpu_chart().to_vec();
    let gpu_data = app.gpu_chart().to_vec();
    for (title, data, area) in [
        (cpu_title, &cpu_data, halves[0]),
        (gpu_title, &gpu_data, halves[1]),
    ] {
        let spark = Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title(title))
            .data(data)
            .max(100)
            .style(Style::default().fg(color));
        f.render_widget(spark, area);
    }
}

fn draw_footer(f: &mut Frame, area: Rect, latest: Option<&DisplayMetrics>) {
    let status = match latest {
        Some(m) => {
            let throttle = if m.thermal.throttled {
                format!("yes ({})", m.thermal.label)
            } else {
                "no".to_string()
            };
            format!(
                " {}  throttle: {throttle}",
                rail_label("package", &m.package_power)
            )
        }
        None => " starting powermetrics…".to_string(),
    };
    let bar = Paragraph::new(format!("{status}   q: quit"))
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(bar, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use powertap_core::normalize::GpuMetrics;
    use powertap_core::{RollingAggregator, normalize::*};

    #[test]
    fn test_gpu_label_unknown_freq() {
        let snapshot = CanonicalSnapshot {
            timestamp: 1,
            cpu: CpuMetrics::default(),
            gpu: GpuMetrics {
                active_percent: 7,
                freq_mhz: None,
            },
            power: PowerMetrics::default(),
            thermal: ThermalState::from_label("Nominal"),
        };
        let mut m = RollingAggregator::new(1).observe(&snapshot).unwrap();
        assert_eq!(gpu_label(&m), "GPU 7% @ N/A MHz");
        m.gpu.freq_mhz = Some(444);
        assert_eq!(gpu_label(&m), "GPU 7% @ 444 MHz");
    }

    #[test]
    fn test_rail_label() {
        let rail = RailStats {
            current: 3.214,
            average: 2.8,
            peak: 9.126,
        };
        assert_eq!(
            rail_label("CPU", &rail),
            "CPU 3.21 W (avg 2.80 W peak 9.13 W)"
        );
    }

    #[test]
    fn test_memory_label() {
        let gb = 1024 * 1024 * 1024;
        let mut mem = MemoryUsage {
            total_bytes: 16 * gb,
            used_bytes: 12 * gb,
            swap_total_bytes: 0,
            swap_used_bytes: 0,
        };
        assert_eq!(memory_label(&mem), "RAM 12/16 GB - swap inactive");
        mem.swap_total_bytes = 4 * gb;
        mem.swap_used_bytes = gb;
        assert_eq!(memory_label(&mem), "RAM 12/16 GB - swap 1/4 GB");
    }

    #[test]
    fn test_core_rows_wrap() {
        assert_eq!(core_rows(0), 0);
        assert_eq!(core_rows(8), 1);
        assert_eq!(core_rows(12), 2);
    }

    #[test]
    fn test_scheme_colors_distinct() {
        let colors: std::collections::HashSet<_> = (0..=8).map(scheme_color).collect();
        assert_eq!(colors.len(), 9);
    }
}
