//! `powertap monitor`: the live dashboard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;

use powertap_core::{
    DisplayMetrics, IngestConfig, IngestionLoop, MetricsSink, SamplerProcess, detect_soc_info,
    ensure_privileges,
};

use crate::tui::app::{App, MonitorOptions};

/// Forwards samples to the UI thread; stops once the UI is gone.
struct ChannelSink {
    tx: Sender<DisplayMetrics>,
}

impl MetricsSink for ChannelSink {
    fn publish(&mut self, metrics: DisplayMetrics) -> bool {
        self.tx.send(metrics).is_ok()
    }
}

pub fn run(config: IngestConfig, show_cores: bool, color: u8) {
    // sudo may prompt, so this has to happen before the terminal goes raw.
    if let Err(e) = ensure_privileges(&config.sampler) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    // Must precede `ingest.start()`: `process::exit` skips the sampler's cleanup.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    let soc = detect_soc_info();
    let sampler = SamplerProcess::new(config.sampler.clone());
    let mut ingest = IngestionLoop::new(config, sampler, soc.clone());
    if let Err(e) = ingest.start() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    let spec = *ingest.chip_spec();

    let (tx, rx) = mpsc::channel();
    let worker_running = running.clone();
    let worker = thread::spawn(move || {
        let mut sink = ChannelSink { tx };
        let result = ingest.run(&worker_running, &mut sink);
        // Wake the UI even if the loop ended on its own.
        worker_running.store(false, Ordering::SeqCst);
        result
    });

    let options = MonitorOptions { show_cores, color };
    let tui_result = App::new(rx, running.clone(), soc, spec, options).run();
    running.store(false, Ordering::SeqCst);

    let ingest_result = worker.join();
    if let Err(e) = tui_result {
        eprintln!("TUI error: {e}");
        std::process::exit(1);
    }
    match ingest_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("Error: ingestion thread panicked");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powertap_core::{RollingAggregator, normalize::*};

    fn metrics() -> DisplayMetrics {
        let snapshot = CanonicalSnapshot {
            timestamp: 1,
            cpu: CpuMetrics::default(),
            gpu: GpuMetrics::default(),
            power: PowerMetrics::default(),
            thermal: ThermalState::from_label("Nominal"),
        };
        RollingAggregator::new(1).observe(&snapshot).unwrap()
    }

    #[test]
    fn test_channel_sink_stops_when_ui_gone() {
        let (tx, rx) = mpsc::channel();
        let mut sink = ChannelSink { tx };
        assert!(sink.publish(metrics()));
        assert_eq!(rx.try_recv().unwrap().timestamp, 1);

        drop(rx);
        assert!(!sink.publish(metrics()));
    }
}
