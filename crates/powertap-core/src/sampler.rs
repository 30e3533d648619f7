//! Lifecycle of the external `powermetrics` subprocess.
//!
//! The sampler runs elevated, appends to a file we only ever read, and may
//! outlive us if we are not careful. [`SamplerHandle`] owns one running
//! instance together with its output file and releases both when dropped,
//! so every exit path (stop, restart, error, panic unwinding) cleans up.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::{Elevation, SamplerConfig};
use crate::error::{IngestError, Result};

const PKILL_TIMEOUT: Duration = Duration::from_secs(2);
const REAP_POLL: Duration = Duration::from_millis(10);

/// Something that produces sampler output files.
///
/// [`SamplerProcess`] is the real implementation; the ingestion loop only
/// depends on this trait.
pub trait Sampler {
    /// Launch a fresh instance and return the path it writes to.
    fn start(&mut self) -> Result<PathBuf>;

    /// Stop the current instance and launch a fresh one on a new path.
    fn restart(&mut self) -> Result<PathBuf>;

    /// Stop the current instance and delete its output. Never fails.
    fn stop(&mut self);

    /// Exit status of the current instance if it is no longer running.
    fn exit_status(&mut self) -> Option<ExitStatus>;

    /// Path of the file the current instance writes to.
    fn output_path(&self) -> Option<&Path>;
}

/// Whether the current process already has root privileges.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

pub(crate) fn needs_sudo(elevation: Elevation) -> bool {
    elevation == Elevation::Sudo && !is_root()
}

/// Prompt for `sudo` credentials once, interactively, before anything else
/// takes over the terminal.
pub fn ensure_privileges(config: &SamplerConfig) -> Result<()> {
    if !needs_sudo(config.elevation) {
        return Ok(());
    }
    log::info!("requesting sudo credentials for {}", config.program);
    let status = Command::new("sudo")
        .arg("-v")
        .status()
        .map_err(|e| IngestError::Privilege(format!("cannot run sudo: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(IngestError::Privilege(format!("sudo -v exited with {status}")))
    }
}

// ---------------------------------------------------------------------------
// Output files
// ---------------------------------------------------------------------------

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// `<dir>/<prefix><unix_millis>`, bumped until it names a file that does not exist.
pub fn fresh_output_path(dir: &Path, prefix: &str) -> PathBuf {
    let mut token = unix_millis();
    loop {
        let candidate = dir.join(format!("{prefix}{token}"));
        if !candidate.exists() {
            return candidate;
        }
        token += 1;
    }
}

/// Delete leftover output files from earlier runs. Returns how many were removed.
pub fn remove_stale_outputs(dir: &Path, prefix: &str) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => log::debug!("could not remove stale {}: {e}", entry.path().display()),
        }
    }
    removed
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Wait for `child` to exit for at most `timeout`.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if start.elapsed() >= timeout => return None,
            Ok(None) => std::thread::sleep(REAP_POLL),
            Err(_) => return None,
        }
    }
}

/// Escape POSIX extended regex metacharacters for `pkill -f`.
fn escape_ere(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `pkill -f` pattern for samplers writing under the configured prefix.
///
/// Anchored on the program so the `sudo pkill` wrapper, whose own command
/// line contains the pattern text, never matches.
pub fn orphan_pattern(config: &SamplerConfig) -> String {
    format!(
        "^{} .*{}",
        escape_ere(&config.program),
        escape_ere(&config.output_dir.join(&config.file_prefix).display().to_string())
    )
}

fn send_sigterm(child: &Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: signalling a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        log::debug!("SIGTERM to {pid} failed: {}", std::io::Error::last_os_error());
    }
}

/// One running sampler and the file it writes.
#[derive(Debug)]
pub struct SamplerHandle {
    child: Child,
    output_path: PathBuf,
    started_at: Instant,
    interval_ms: u64,
    nice: i32,
    program: String,
    elevated: bool,
    kill_pattern: String,
    grace: Duration,
    released: bool,
}

impl SamplerHandle {
    /// Launch the sampler writing to a fresh path under the configured directory.
    pub fn spawn(config: &SamplerConfig) -> Result<Self> {
        let output_path = fresh_output_path(&config.output_dir, &config.file_prefix);
        let interval_ms = config.effective_interval_ms();
        let elevated = needs_sudo(config.elevation);

        let mut cmd = if elevated {
            let mut c = Command::new("sudo");
            c.arg("-n").arg("nice");
            c
        } else {
            Command::new("nice")
        };
        cmd.arg("-n")
            .arg(config.nice.to_string())
            .arg(&config.program)
            .arg("--samplers")
            .arg(config.samplers.join(","))
            .arg("-o")
            .arg(&output_path)
            .arg("-f")
            .arg("plist")
            .arg("-i")
            .arg(interval_ms.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn().map_err(|source| IngestError::Spawn {
            program: config.program.clone(),
            source,
        })?;

        log::info!(
            "started {} (pid {}) -> {} every {interval_ms} ms",
            config.program,
            child.id(),
            output_path.display()
        );

        Ok(Self {
            child,
            output_path,
            started_at: Instant::now(),
            interval_ms,
            nice: config.nice,
            program: config.program.clone(),
            elevated,
            kill_pattern: orphan_pattern(config),
            grace: config.stop_grace(),
            released: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn nice(&self) -> i32 {
        self.nice
    }

    /// Exit status if the process has already terminated.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Terminate the process and delete the output file. Idempotent, never fails.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.terminate();
        self.kill_orphans();

        match std::fs::remove_file(&self.output_path) {
            Ok(()) => log::debug!("removed {}", self.output_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::debug!("could not remove {}: {e}", self.output_path.display()),
        }
    }

    fn terminate(&mut self) {
        if let Some(status) = self.try_exit_status() {
            log::debug!("{} (pid {}) already exited: {status}", self.program, self.pid());
            return;
        }

        send_sigterm(&self.child);
        if let Some(status) = wait_with_timeout(&mut self.child, self.grace) {
            log::info!("stopped {} (pid {}): {status}", self.program, self.pid());
            return;
        }

        log::debug!(
            "{} (pid {}) ignored SIGTERM for {:?}, killing",
            self.program,
            self.pid(),
            self.grace
        );
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Sweep up sampler processes still writing under our prefix, e.g. the
    /// real sampler left behind when only its `sudo` parent was signalled.
    fn kill_orphans(&self) {
        let mut cmd = if self.elevated {
            let mut c = Command::new("sudo");
            c.arg("-n").arg("pkill");
            c
        } else {
            Command::new("pkill")
        };
        cmd.arg("-f")
            .arg(&self.kill_pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match cmd.spawn() {
            Ok(mut child) => {
                if wait_with_timeout(&mut child, PKILL_TIMEOUT).is_none() {
                    let _ = child.kill();
                    let _ = child.wait();
                    log::debug!("pkill timed out for pattern {}", self.kill_pattern);
                }
            }
            Err(e) => log::debug!("pkill unavailable: {e}"),
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Process manager
// ---------------------------------------------------------------------------

/// [`Sampler`] backed by a real subprocess.
#[derive(Debug)]
pub struct SamplerProcess {
    config: SamplerConfig,
    handle: Option<SamplerHandle>,
    starts: u64,
}

impl SamplerProcess {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            handle: None,
            starts: 0,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn handle(&self) -> Option<&SamplerHandle> {
        self.handle.as_ref()
    }

    /// Number of successful launches so far.
    pub fn starts(&self) -> u64 {
        self.starts
    }

    fn launch(&mut self) -> Result<PathBuf> {
        let removed = remove_stale_outputs(&self.config.output_dir, &self.config.file_prefix);
        if removed > 0 {
            log::debug!("removed {removed} stale output file(s)");
        }
        let handle = SamplerHandle::spawn(&self.config)?;
        let path = handle.output_path().to_path_buf();
        self.handle = Some(handle);
        self.starts += 1;
        Ok(path)
    }
}

impl Sampler for SamplerProcess {
    fn start(&mut self) -> Result<PathBuf> {
        self.stop();
        self.launch()
    }

    fn restart(&mut self) -> Result<PathBuf> {
        log::info!("restarting {}", self.config.program);
        self.stop();
        self.launch()
    }

    fn stop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
    }

    fn exit_status(&mut self) -> Option<ExitStatus> {
        self.handle.as_mut().and_then(SamplerHandle::try_exit_status)
    }

    fn output_path(&self) -> Option<&Path> {
        self.handle.as_ref().map(SamplerHandle::output_path)
    }
}

impl Drop for SamplerProcess {
    fn drop(&mut self) {
        self.stop();
    }
}
