//! `powertap stream`: JSON lines on stdout.
//!
//! The first line describes the topology, every following line is one
//! accepted sample. A closed pipe stops the stream like Ctrl+C does.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use powertap_core::{
    ChipSpec, DisplayMetrics, IngestConfig, IngestionLoop, MetricsSink, SamplerProcess, SocInfo,
    detect_soc_info, ensure_privileges, specs,
};
use serde::Serialize;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLine<'a> {
    Topology { soc: &'a SocInfo, spec: ChipSpec },
    Metrics(&'a DisplayMetrics),
}

pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn emit(&mut self, line: &StreamLine<'_>) -> bool {
        let written = serde_json::to_writer(&mut self.out, line)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        match written {
            Ok(()) => true,
            Err(e) => {
                log::debug!("stream output closed: {e}");
                false
            }
        }
    }
}

impl<W: Write> MetricsSink for JsonLinesSink<W> {
    fn topology(&mut self, soc: &SocInfo) {
        let spec = specs::lookup(&soc.chip_name);
        self.emit(&StreamLine::Topology { soc, spec });
    }

    fn publish(&mut self, metrics: DisplayMetrics) -> bool {
        self.emit(&StreamLine::Metrics(&metrics))
    }
}

pub fn run(config: IngestConfig) {
    if let Err(e) = ensure_privileges(&config.sampler) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    let sampler = SamplerProcess::new(config.sampler.clone());
    let mut ingest = IngestionLoop::new(config, sampler, detect_soc_info());
    let stdout = std::io::stdout();
    let mut sink = JsonLinesSink::new(stdout.lock());

    if let Err(e) = ingest.run(&running, &mut sink) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
