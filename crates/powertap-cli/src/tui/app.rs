//! Dashboard state and event loop.
//!
//! The ingestion loop runs on a background thread and sends every accepted
//! sample over a channel. The UI thread drains it between key polls and
//! owns everything it draws; nothing else is shared.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;

use powertap_core::normalize::power_percent;
use powertap_core::{ChipSpec, DisplayMetrics, MemoryUsage, SocInfo, detect_memory_usage};

/// Power charts keep this many points.
pub const MAX_CHART_POINTS: usize = 200;

/// ANE utilization is its power as a share of this ceiling.
pub const ANE_MAX_POWER_W: f64 = 8.0;

/// Dashboard settings from the command line.
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub show_cores: bool,
    pub color: u8,
}

/// Bounded history of chart values, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ChartHistory {
    points: VecDeque<u64>,
}

impl ChartHistory {
    pub fn push(&mut self, value: u64) {
        if self.points.len() == MAX_CHART_POINTS {
            self.points.pop_front();
        }
        self.points.push_back(value);
    }

    pub fn to_vec(&self) -> Vec<u64> {
        self.points.iter().copied().collect()
    }
}

pub struct App {
    rx: Receiver<DisplayMetrics>,
    running: Arc<AtomicBool>,
    soc: SocInfo,
    spec: ChipSpec,
    options: MonitorOptions,
    latest: Option<DisplayMetrics>,
    memory: Option<MemoryUsage>,
    cpu_chart: ChartHistory,
    gpu_chart: ChartHistory,
}

impl App {
    pub fn new(
        rx: Receiver<DisplayMetrics>,
        running: Arc<AtomicBool>,
        soc: SocInfo,
        spec: ChipSpec,
        options: MonitorOptions,
    ) -> Self {
        Self {
            rx,
            running,
            soc,
            spec,
            options,
            latest: None,
            memory: None,
            cpu_chart: ChartHistory::default(),
            gpu_chart: ChartHistory::default(),
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let hook = TerminalPanicHook::install();
        let result = self.run_loop(&mut terminal);
        drop(hook);

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;

        result
    }

    fn run_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
        while self.is_running() {
            self.drain();
            terminal.draw(|f| super::ui::draw(f, self))?;

            if event::poll(Duration::from_millis(50))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key.code, key.modifiers);
            }
        }
        Ok(())
    }

    /// Take everything the ingestion thread has sent so far.
    pub fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(metrics) => self.apply(metrics),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stop();
                    break;
                }
            }
        }
    }

    pub fn apply(&mut self, metrics: DisplayMetrics) {
        self.cpu_chart.push(u64::from(cpu_power_percent(
            metrics.cpu_power.current,
            self.spec.cpu_max_power_w,
        )));
        self.gpu_chart.push(u64::from(power_percent(
            metrics.gpu_power.current,
            self.spec.gpu_max_power_w,
        )));
        if let Some(mem) = detect_memory_usage() {
            self.memory = Some(mem);
        }
        self.latest = Some(metrics);
    }

    fn handle_key(&mut self, key: KeyCode, modifiers: KeyModifiers) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.stop(),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => self.stop(),
            _ => {}
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Accessors for the renderer
    // -----------------------------------------------------------------------

    pub fn soc(&self) -> &SocInfo {
        &self.soc
    }

    pub fn options(&self) -> MonitorOptions {
        self.options
    }

    pub fn latest(&self) -> Option<&DisplayMetrics> {
        self.latest.as_ref()
    }

    pub fn memory(&self) -> Option<&MemoryUsage> {
        self.memory.as_ref()
    }

    pub fn cpu_chart(&self) -> &ChartHistory {
        &self.cpu_chart
    }

    pub fn gpu_chart(&self) -> &ChartHistory {
        &self.gpu_chart
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

type PanicHook = dyn Fn(&std::panic::PanicHookInfo<'_>) + Send + Sync + 'static;

/// Panic hook that restores the terminal before the previous hook prints.
/// Dropping it puts the previous hook back.
struct TerminalPanicHook {
    previous: Arc<PanicHook>,
}

impl TerminalPanicHook {
    fn install() -> Self {
        let previous: Arc<PanicHook> = Arc::from(std::panic::take_hook());
        let chained = previous.clone();
        std::panic::set_hook(Box::new(move |info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
            chained(info);
        }));
        Self { previous }
    }
}

impl Drop for TerminalPanicHook {
    fn drop(&mut self) {
        let previous = self.previous.clone();
        std::panic::set_hook(Box::new(move |info| previous(info)));
    }
}

/// CPU power as a whole percentage of the chip maximum, truncated.
pub fn cpu_power_percent(watts: f64, max_w: f64) -> u8 {
    if !watts.is_finite() || !max_w.is_finite() || max_w <= 0.0 {
        return 0;
    }
    (watts / max_w * 100.0).clamp(0.0, 100.0) as u8
}

/// ANE utilization percentage for a wattage.
pub fn ane_percent(watts: f64) -> u8 {
    let pct = watts / ANE_MAX_POWER_W * 100.0;
    if pct.is_finite() {
        pct.clamp(0.0, 100.0) as u8
    } else {
        0
    }
}
