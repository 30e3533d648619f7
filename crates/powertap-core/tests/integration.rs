//! Integration tests for powertap-core.
//!
//! These tests drive the ingestion pipeline from bytes on disk:
//! output file → reader → normalizer → aggregator → sink.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use powertap_core::{
    DisplayMetrics, Elevation, IngestConfig, IngestionLoop, MetricNormalizer, MetricsSink,
    ReadOutcome, RecordReader, RollingAggregator, SamplerProcess, SocInfo, specs,
};

const END_TO_END_RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>timestamp</key><integer>1234567890</integer>
  <key>thermal_pressure</key><string>Nominal</string>
  <key>is_delta</key><true/>
  <key>processor</key>
  <dict>
    <key>clusters</key>
    <array>
      <dict>
        <key>name</key><string>E-Cluster</string>
        <key>freq_hz</key><real>2064000000</real>
        <key>idle_ratio</key><real>0.8</real>
        <key>cpus</key><array/>
      </dict>
    </array>
    <key>ane_energy</key><real>1000</real>
    <key>cpu_energy</key><real>5000</real>
    <key>gpu_energy</key><real>3000</real>
    <key>combined_power</key><real>9000</real>
  </dict>
  <key>gpu</key>
  <dict>
    <key>freq_hz</key><real>1296000000</real>
    <key>idle_ratio</key><real>0.25</real>
  </dict>
</dict>
</plist>
"#;

fn soc(chip: &str) -> SocInfo {
    SocInfo {
        chip_name: chip.to_string(),
        core_count: 8,
        e_core_count: Some(4),
        p_core_count: Some(4),
        gpu_core_count: Some(8),
    }
}

fn with_separator(doc: &str) -> Vec<u8> {
    let mut bytes = doc.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

#[test]
fn end_to_end_record_from_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("powertap_powermetrics1");
    std::fs::write(&path, with_separator(END_TO_END_RECORD)).unwrap();

    let ReadOutcome::Ready(record) = RecordReader::default().read_latest(&path) else {
        panic!("record should decode");
    };
    let mut normalizer = MetricNormalizer::new(specs::lookup("Apple M1"), Duration::from_secs(1));
    let snap = normalizer.normalize(&record);

    assert_eq!(snap.timestamp, 1_234_567_890);
    assert_eq!(snap.cpu.efficiency.active_percent, 20);
    assert_eq!(snap.cpu.efficiency.freq_mhz, 2064);
    assert_eq!(snap.power.ane_w, 1.0);
    assert_eq!(snap.power.cpu_w, 5.0);
    assert_eq!(snap.power.gpu_w, 3.0);
    assert_eq!(snap.power.package_w, 9.0);
    assert_eq!(snap.gpu.active_percent, 75);
    assert_eq!(snap.gpu.freq_mhz, Some(1296));
    assert!(!snap.thermal.throttled);

    let metrics = RollingAggregator::new(30).observe(&snap).unwrap();
    assert_eq!(metrics.package_power.current, 9.0);
    assert_eq!(metrics.ane_w, 1.0);
}

#[test]
fn torn_write_falls_back_to_previous_record() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("out");

    let mut contents = with_separator(END_TO_END_RECORD);
    let newer = END_TO_END_RECORD.replace("1234567890", "1234567891");
    contents.extend_from_slice(&newer.as_bytes()[..newer.len() / 3]);
    std::fs::write(&path, &contents).unwrap();

    match RecordReader::default().read_latest(&path) {
        ReadOutcome::Ready(record) => assert_eq!(record.timestamp, 1_234_567_890),
        other => panic!("expected the complete record, got {other:?}"),
    }

    // Once the writer finishes, the newer record wins.
    let mut contents = with_separator(END_TO_END_RECORD);
    contents.extend_from_slice(&with_separator(&newer));
    std::fs::write(&path, &contents).unwrap();
    match RecordReader::default().read_latest(&path) {
        ReadOutcome::Ready(record) => assert_eq!(record.timestamp, 1_234_567_891),
        other => panic!("expected the newer record, got {other:?}"),
    }
}

#[test]
fn window_of_only_torn_fragments_is_not_ready() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("out");
    std::fs::write(&path, &END_TO_END_RECORD.as_bytes()[..200]).unwrap();
    assert!(!RecordReader::default().read_latest(&path).is_ready());
}

struct Collect {
    metrics: Vec<DisplayMetrics>,
}

impl MetricsSink for Collect {
    fn publish(&mut self, metrics: DisplayMetrics) -> bool {
        self.metrics.push(metrics);
        false
    }
}

/// Write an executable stand-in for `powermetrics` that copies `fixture` to
/// its `-o` path and then idles until signalled.
#[cfg(unix)]
fn fake_powermetrics(dir: &Path, fixture: &[u8]) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let fixture_path = dir.join("fixture.plist");
    std::fs::write(&fixture_path, fixture).unwrap();
    let script = dir.join("powermetrics");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\ncp '{}' \"$out\"\nexec sleep 30\n",
            fixture_path.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(unix)]
#[test]
fn pipeline_with_subprocess_sampler() {
    let tmp = tempfile::tempdir().unwrap();
    let program = fake_powermetrics(tmp.path(), &with_separator(END_TO_END_RECORD));

    let mut config = IngestConfig::default();
    config.sampler.program = program.display().to_string();
    config.sampler.output_dir = tmp.path().to_path_buf();
    config.sampler.file_prefix = "integration_".to_string();
    config.sampler.elevation = Elevation::Direct;
    config.sampler.nice = 0;
    config.sampler.stop_grace_ms = 1000;
    config.first_sample_backoff_ms = 20;
    let config = config.validated().unwrap();

    let sampler = SamplerProcess::new(config.sampler.clone());
    let mut ingest = IngestionLoop::new(config, sampler, soc("Apple M1 Max"));
    let mut sink = Collect {
        metrics: Vec::new(),
    };
    ingest.run(&AtomicBool::new(true), &mut sink).unwrap();

    assert_eq!(sink.metrics.len(), 1);
    let m = &sink.metrics[0];
    assert_eq!(m.timestamp, 1_234_567_890);
    assert_eq!(m.cpu.efficiency.active_percent, 20);
    assert_eq!(m.gpu.active_percent, 75);
    assert_eq!(m.cpu_power.peak, 5.0);
    assert_eq!(ingest.chip_spec().gpu_max_power_w, 60.0);

    // The output file is gone once the loop has stopped.
    let leftovers = std::fs::read_dir(tmp.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("integration_"))
        .count();
    assert_eq!(leftovers, 0);
}
