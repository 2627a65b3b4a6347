//! The run supervisor: process lifecycle, fault timing, and outcome
//! classification for the three crash-test modes.
//!
//! Control flow is single-threaded: each iteration blocks on one stress
//! subprocess, racing its natural completion against a wall-clock deadline.
//! Iteration N+1 never starts before iteration N's subprocess has fully
//! terminated and its snapshot has been captured.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{self, Profile, Resolvable, TestMode};
use crate::command::build_command;
use crate::config::ParamMap;
use crate::error::CrashTestError;
use crate::ops_mix::{SuppliedOps, randomize_op_percentages};
use crate::rng::StressRng;
use crate::sanitize::{Environment, sanitize};
use crate::snapshot::SnapshotRetention;
use crate::value::OptionValue;

/// Grace window past the duration budget before the whole whitebox loop is
/// forcibly stopped, so a hanging binary cannot wedge a scheduled job.
const OVER_BUDGET_GRACE: Duration = Duration::from_secs(900);

/// Poll interval while waiting on the subprocess.
const WAIT_POLL: Duration = Duration::from_millis(50);

// ============================================================================
// Run States
// ============================================================================

/// Lifecycle of a single subprocess run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    TimedOut,
    Exited,
}

impl RunState {
    /// Whether `next` is a legal successor state.
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Exited | Self::TimedOut)
                | (Self::TimedOut, Self::Exited)
        )
    }
}

// ============================================================================
// Exit Classification
// ============================================================================

/// How the subprocess terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal exit with a code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
}

impl ExitKind {
    /// Unified status: exit code as-is, signals negated.
    pub fn unified(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signal(signal) => -signal,
        }
    }
}

/// The fixed set of deadly signals that always mean an unexpected hard
/// failure, checked by value so no platform name lookup is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalSignal {
    IllegalInstruction,
    Abort,
    BusError,
    FloatingPointException,
    SegmentationFault,
}

impl FatalSignal {
    /// Classifies a raw signal number.
    pub fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            4 => Some(Self::IllegalInstruction),
            6 => Some(Self::Abort),
            7 => Some(Self::BusError),
            8 => Some(Self::FloatingPointException),
            11 => Some(Self::SegmentationFault),
            _ => None,
        }
    }

    /// Human-readable tag for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::IllegalInstruction => "illegal instruction",
            Self::Abort => "abort",
            Self::BusError => "bus error",
            Self::FloatingPointException => "floating-point exception",
            Self::SegmentationFault => "segmentation fault",
        }
    }
}

/// Captured result of one subprocess run.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Whether the deadline elapsed and the process was force-killed.
    pub hit_timeout: bool,
    /// How the process terminated.
    pub exit: ExitKind,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Whether the observed outcome matched the mode's prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Expected,
    Unexpected,
}

/// One spawn-run-terminate-classify cycle.
#[derive(Debug, Serialize)]
pub struct IterationRecord {
    /// Monotonically increasing per loop.
    pub counter: u64,
    /// The rendered command line.
    pub command: Vec<String>,
    /// Launch timestamp.
    pub started_at: DateTime<Utc>,
    /// Whether the deadline elapsed before natural termination.
    pub hit_timeout: bool,
    /// Unified exit status (negative = signal).
    pub status: i32,
    /// Classification against the mode's prediction.
    pub classification: Classification,
    /// Captured output, kept out of the journal.
    #[serde(skip)]
    pub stdout: String,
    #[serde(skip)]
    pub stderr: String,
}

// ============================================================================
// Process Execution
// ============================================================================

/// Runs one stress subprocess under a deadline.
///
/// The child's stdout/stderr pipes are drained by reader threads so the
/// child never blocks on a full pipe; on deadline the child is killed and
/// whatever output was buffered is still collected.
pub fn execute(command: &[String], timeout: Duration) -> Result<ProcessOutcome, CrashTestError> {
    let mut state = RunState::Idle;
    let mut child = Command::new(&command[0])
        .args(&command[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    debug_assert!(state.can_transition_to(RunState::Running));
    state = RunState::Running;

    info!(pid = child.id(), command = %command.join(" "), "running stress binary");

    let stdout_reader = child.stdout.take().map(spawn_pipe_reader);
    let stderr_reader = child.stderr.take().map(spawn_pipe_reader);

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            debug_assert!(state.can_transition_to(RunState::Exited));
            state = RunState::Exited;
            break status;
        }
        if started.elapsed() >= timeout {
            debug_assert!(state.can_transition_to(RunState::TimedOut));
            state = RunState::TimedOut;
            // The child may win the race and exit on its own here; the
            // status collected below is authoritative either way.
            let _ = child.kill();
            let status = child.wait()?;
            info!(pid = child.id(), "killed stress binary at deadline");
            break status;
        }
        thread::sleep(WAIT_POLL);
    };
    let hit_timeout = state == RunState::TimedOut;
    debug_assert!(hit_timeout || state == RunState::Exited);

    let stdout = join_pipe_reader(stdout_reader);
    let stderr = join_pipe_reader(stderr_reader);

    Ok(ProcessOutcome {
        hit_timeout,
        exit: exit_kind(status),
        stdout,
        stderr,
    })
}

fn spawn_pipe_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_pipe_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn exit_kind(status: std::process::ExitStatus) -> ExitKind {
    if let Some(code) = status.code() {
        return ExitKind::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitKind::Signal(signal);
        }
    }
    ExitKind::Code(-1)
}

/// A deadly-signal death before the kill deadline is always an unexpected
/// hard failure, in every mode, even mid-run.
fn check_fatal_signal(record: &IterationRecord) -> Result<(), CrashTestError> {
    if record.hit_timeout || record.status >= 0 {
        return Ok(());
    }
    if let Some(signal) = FatalSignal::from_raw(-record.status) {
        println!("command: {}", record.command.join(" "));
        println!("{}", record.stdout);
        eprintln!("{}", record.stderr);
        return Err(CrashTestError::UnexpectedExit {
            status: record.status,
            reason: format!("stress binary died on {} before kill", signal.name()),
        });
    }
    Ok(())
}

// ============================================================================
// Outcome Scanning
// ============================================================================

/// Whitebox prediction: without kill injection only a clean exit is
/// acceptable; with it, the binary may also have killed itself (negative
/// status) or finished cleanly.
fn whitebox_expected(kill_active: bool, status: i32) -> bool {
    if kill_active { status <= 0 } else { status == 0 }
}

/// Scans stderr for error/fail markers. The "got errors 0 times" phrase is
/// a benign progress line the stress binary always prints.
fn scan_stderr(stderr: &str) -> Result<(), CrashTestError> {
    let lowered = stderr.to_lowercase();
    let benign = lowered.matches("got errors 0 times").count();
    let errors = lowered.matches("error").count().saturating_sub(benign);
    println!("#times error occurred in output is {errors}");
    if errors > 0 {
        return Err(CrashTestError::OutputAnomaly("output has 'error'".to_owned()));
    }
    if lowered.contains("fail") {
        return Err(CrashTestError::OutputAnomaly("output has 'fail'".to_owned()));
    }
    Ok(())
}

/// Echoes non-warning stderr lines as diagnostics (blackbox and narrow).
fn echo_error_lines(stderr: &str) {
    for line in stderr.lines() {
        if !line.is_empty() && !line.starts_with("WARNING") {
            println!("stderr has error message:");
            println!("***{line}***");
        }
    }
}

// ============================================================================
// Working Directories
// ============================================================================

/// The store directory and expected-values shadow directory for one run.
///
/// Created at test start, rotated at whitebox check-mode boundaries,
/// destroyed at test end only on success.
#[derive(Debug)]
pub struct WorkDirs {
    root: Option<PathBuf>,
    mode: TestMode,
    /// Live store directory (`<root>/<mode>_db`).
    pub db_dir: PathBuf,
    /// Expected-values working directory, reused across iterations.
    pub expected_dir: PathBuf,
}

impl WorkDirs {
    /// Creates fresh working directories under `root`, or under the system
    /// temp directory when no root is configured.
    pub fn create(
        mode: TestMode,
        root: Option<&Path>,
        cleanup_cmd: Option<&str>,
    ) -> io::Result<Self> {
        let db_dir = match root {
            Some(root) => {
                let dir = root.join(format!("{}_db", mode.as_str()));
                let _ = fs::remove_dir_all(&dir);
                if let Some(cmd) = cleanup_cmd {
                    info!(command = cmd, "running store cleanup command");
                    // Failure is ignored at startup; there may be nothing
                    // to clean yet.
                    let _ = run_shell(cmd);
                }
                fs::create_dir_all(&dir)?;
                dir
            }
            None => tempfile::Builder::new()
                .prefix(&format!("gabbro_crashtest_{}_db.", mode.as_str()))
                .tempdir()?
                .keep(),
        };
        let expected_dir = Self::make_expected_dir(root)?;
        Ok(Self {
            root: root.map(Path::to_path_buf),
            mode,
            db_dir,
            expected_dir,
        })
    }

    fn make_expected_dir(root: Option<&Path>) -> io::Result<PathBuf> {
        match root {
            Some(root) => {
                let dir = root.join("crashtest_expected");
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                fs::create_dir_all(&dir)?;
                Ok(dir)
            }
            None => Ok(tempfile::Builder::new()
                .prefix("gabbro_crashtest_expected.")
                .tempdir()?
                .keep()),
        }
    }

    /// Destroys and recreates the store directory (whitebox check-mode
    /// rotation). A failing cleanup command is fatal here: continuing on a
    /// dirty store would mix incompatible on-disk layouts.
    pub fn reset_db(&self, cleanup_cmd: Option<&str>) -> io::Result<()> {
        let _ = fs::remove_dir_all(&self.db_dir);
        if let Some(cmd) = cleanup_cmd {
            info!(command = cmd, "running store cleanup command");
            let status = run_shell(cmd)?;
            if !status.success() {
                return Err(io::Error::other(format!(
                    "store cleanup command failed with {status}"
                )));
            }
        }
        fs::create_dir_all(&self.db_dir)
    }

    /// Resets the expected-values directory to an empty state.
    pub fn reset_expected(&mut self) -> io::Result<()> {
        let _ = fs::remove_dir_all(&self.expected_dir);
        self.expected_dir = Self::make_expected_dir(self.root.as_deref())?;
        Ok(())
    }

    /// Removes the live store directory (success cleanup).
    pub fn remove_db(&self) {
        if let Err(e) = fs::remove_dir_all(&self.db_dir) {
            warn!(path = %self.db_dir.display(), error = %e, "failed to remove store directory");
        }
    }

    /// Removes the expected-values directory (success cleanup).
    pub fn remove_expected(&self) {
        if self.expected_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.expected_dir) {
                warn!(path = %self.expected_dir.display(), error = %e, "failed to remove expected-values directory");
            }
        }
    }

    /// Mode these directories were created for.
    pub fn mode(&self) -> TestMode {
        self.mode
    }
}

fn run_shell(cmd: &str) -> io::Result<std::process::ExitStatus> {
    Command::new("sh").arg("-c").arg(cmd).status()
}

/// Probes whether the store's filesystem supports `O_DIRECT` by opening a
/// scratch file with the flag set.
#[cfg(target_os = "linux")]
pub fn is_direct_io_supported(db_dir: &Path) -> bool {
    use std::os::unix::fs::OpenOptionsExt;

    let Ok(scratch) = tempfile::NamedTempFile::new_in(db_dir) else {
        return false;
    };
    fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECT)
        .open(scratch.path())
        .is_ok()
}

#[cfg(not(target_os = "linux"))]
pub fn is_direct_io_supported(_db_dir: &Path) -> bool {
    false
}

// ============================================================================
// Key-Length Distribution
// ============================================================================

/// Randomly selects unique cut points on the percentage range and returns
/// the differences between them, producing `cuts + 1` nonzero shares that
/// sum to exactly 100.
fn random_distribution(cuts: usize, rng: &mut StressRng) -> Vec<i64> {
    debug_assert!(cuts < 100);
    let mut points = BTreeSet::new();
    while points.len() < cuts {
        points.insert(rng.int_in(1, 99));
    }
    let mut dist = Vec::with_capacity(cuts + 1);
    let mut covered = 0;
    for point in points {
        dist.push(point - covered);
        covered = point;
    }
    dist.push(100 - covered);
    dist
}

/// Derives `max_key_len` and `key_len_percent_dist` when the merged
/// parameters left them unset. Runs once at startup; narrow mode hardcodes
/// its own `max_key_len` and never reaches this path.
fn derive_key_dist(params: &mut ParamMap, rng: &mut StressRng) {
    let max_key_len = params.fixed_int("max_key_len").unwrap_or(0);
    let dist = params.fixed_str("key_len_percent_dist").unwrap_or("0").to_owned();

    // A user-supplied distribution pins the key length to its arity.
    if max_key_len == 0 && dist != "0" {
        let arity = dist.matches(',').count() as i64 + 1;
        params.set("max_key_len", Resolvable::Fixed(OptionValue::Int(arity)));
        return;
    }

    let max_key_len = if max_key_len == 0 {
        let drawn = rng.int_in(1, 10);
        params.set("max_key_len", Resolvable::Fixed(OptionValue::Int(drawn)));
        drawn
    } else {
        max_key_len
    };

    let shares = random_distribution((max_key_len - 1).max(0) as usize, rng)
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    params.set(
        "key_len_percent_dist",
        Resolvable::Fixed(OptionValue::Str(shares)),
    );
}

// ============================================================================
// Journal
// ============================================================================

/// Best-effort JSON-lines journal of iteration records.
struct Journal {
    writer: BufWriter<fs::File>,
}

impl Journal {
    fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(fs::File::create(path)?),
        })
    }

    fn append(&mut self, record: &IterationRecord) {
        let result = serde_json::to_writer(&mut self.writer, record)
            .map_err(io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(e) = result {
            warn!(error = %e, "failed to append journal entry");
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Everything the supervisor needs to drive one test run.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Test mode.
    pub mode: TestMode,
    /// Profile overlays.
    pub profile: Profile,
    /// Path to the stress binary.
    pub stress_cmd: String,
    /// Optional shell command run whenever the store is recreated.
    pub cleanup_cmd: Option<String>,
    /// Type-checked per-option overrides; these pin the key for the whole
    /// run and win over every catalog layer.
    pub overrides: BTreeMap<String, OptionValue>,
    /// Unrecognized flags forwarded verbatim to the stress binary.
    pub passthrough: Vec<String>,
    /// Working-directory root; a temporary directory is used when absent.
    pub root: Option<PathBuf>,
    /// Release builds disable read-fault injection.
    pub release_mode: bool,
    /// Orchestrator RNG seed; drawn from entropy when absent.
    pub rng_seed: Option<u64>,
    /// Optional JSON-lines journal of iteration records.
    pub journal: Option<PathBuf>,
}

impl SupervisorConfig {
    /// Configuration with defaults for the given mode.
    pub fn new(mode: TestMode) -> Self {
        Self {
            mode,
            profile: Profile::default(),
            stress_cmd: "./gabbro-stress".to_owned(),
            cleanup_cmd: None,
            overrides: BTreeMap::new(),
            passthrough: Vec::new(),
            root: None,
            release_mode: false,
            rng_seed: None,
            journal: None,
        }
    }
}

/// Drives the mode-specific control loop.
pub struct RunSupervisor {
    cfg: SupervisorConfig,
    rng: StressRng,
    params: ParamMap,
    supplied: SuppliedOps,
    pinned: BTreeSet<String>,
    dirs: WorkDirs,
    key_spaces_file: Option<PathBuf>,
    journal: Option<Journal>,
}

impl RunSupervisor {
    /// Builds the merged parameter map, working directories, and journal
    /// for one run.
    pub fn new(cfg: SupervisorConfig) -> Result<Self, CrashTestError> {
        let mut rng = match cfg.rng_seed {
            Some(seed) => StressRng::seeded(seed),
            None => StressRng::from_entropy(),
        };

        let mut params = catalog::build_params(cfg.mode, &cfg.profile, &mut rng);
        let mut pinned = BTreeSet::new();
        for (key, value) in &cfg.overrides {
            params.set(key.clone(), Resolvable::Fixed(value.clone()));
            pinned.insert(key.clone());
        }

        if cfg.mode != TestMode::Narrow
            && (params.fixed_int("max_key_len").unwrap_or(0) == 0
                || params.fixed_str("key_len_percent_dist").unwrap_or("0") == "0")
        {
            derive_key_dist(&mut params, &mut rng);
        }

        let supplied = SuppliedOps::capture(&params);
        let dirs = WorkDirs::create(cfg.mode, cfg.root.as_deref(), cfg.cleanup_cmd.as_deref())?;

        let key_spaces_file = if cfg.profile.multiops_txn {
            let mut builder = tempfile::Builder::new();
            builder.prefix("gabbro_crashtest_multiops_key_spaces.");
            let file = match cfg.root.as_deref() {
                Some(root) => builder.tempfile_in(root)?,
                None => builder.tempfile()?,
            };
            Some(file.keep().map_err(|e| e.error)?.1)
        } else {
            None
        };

        let journal = match cfg.journal.as_deref() {
            Some(path) => Some(Journal::open(path)?),
            None => None,
        };

        Ok(Self {
            cfg,
            rng,
            params,
            supplied,
            pinned,
            dirs,
            key_spaces_file,
            journal,
        })
    }

    /// Runs the mode loop to completion. Success implies cleanup of the
    /// expected-values directory; failure paths leave artifacts for
    /// inspection. The key-spaces scratch file is always removed.
    pub fn run(mut self) -> Result<(), CrashTestError> {
        let result = match self.cfg.mode {
            TestMode::Blackbox => self.run_blackbox(),
            TestMode::Whitebox => self.run_whitebox(),
            TestMode::Narrow => self.run_narrow(),
        };
        if result.is_ok() {
            self.dirs.remove_expected();
        }
        if let Some(path) = &self.key_spaces_file {
            let _ = fs::remove_file(path);
        }
        result
    }

    fn param_secs(&self, key: &str, default: u64) -> u64 {
        self.params
            .fixed_int(key)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }

    fn retention(&self) -> SnapshotRetention {
        SnapshotRetention::new(self.dirs.db_dir.clone(), self.dirs.expected_dir.clone())
    }

    fn journal_append(&mut self, record: &IterationRecord) {
        if let Some(journal) = &mut self.journal {
            journal.append(record);
        }
    }

    /// One iteration: re-randomize, sanitize, render, execute.
    fn launch(
        &mut self,
        counter: u64,
        additional: &[(&'static str, OptionValue)],
        timeout: Duration,
    ) -> Result<IterationRecord, CrashTestError> {
        randomize_op_percentages(&mut self.params, &self.supplied, &mut self.rng)?;

        let mut resolved = self.params.resolve(&mut self.rng);
        for (key, value) in additional {
            resolved.insert(*key, value.clone());
        }
        resolved.insert("db", OptionValue::Path(self.dirs.db_dir.clone()));
        if !self.pinned.contains("expected_values_dir") {
            resolved.insert(
                "expected_values_dir",
                OptionValue::Path(self.dirs.expected_dir.clone()),
            );
        }
        if let Some(path) = &self.key_spaces_file {
            if !self.pinned.contains("key_spaces_path") {
                resolved.insert("key_spaces_path", OptionValue::Path(path.clone()));
            }
        }

        let environment = Environment {
            release_mode: self.cfg.release_mode,
            direct_io_supported: is_direct_io_supported(&self.dirs.db_dir),
            counter,
        };
        let finalized = sanitize(resolved, &self.pinned, &environment)?;
        let command = build_command(&self.cfg.stress_cmd, &finalized, &self.cfg.passthrough);

        let started_at = Utc::now();
        let outcome = execute(&command, timeout)?;

        Ok(IterationRecord {
            counter,
            command,
            started_at,
            hit_timeout: outcome.hit_timeout,
            status: outcome.exit.unified(),
            classification: Classification::Expected,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }

    /// Blackbox: kill externally on a timer. Timing out is the expected
    /// outcome; an early exit is a hard failure.
    fn run_blackbox(&mut self) -> Result<(), CrashTestError> {
        let duration = self.param_secs("duration", 4000);
        let interval = self.param_secs("interval", 240);
        info!(
            interval_between_crash = interval,
            total_duration = duration,
            "running blackbox crash test"
        );

        let deadline = Instant::now() + Duration::from_secs(duration);
        let mut counter = 0u64;
        while Instant::now() < deadline {
            let mut record = self.launch(counter, &[], Duration::from_secs(interval))?;
            check_fatal_signal(&record)?;

            let retention = self.retention();
            retention.capture(counter);
            retention.prune(counter);
            counter += 1;

            if !record.hit_timeout {
                record.classification = Classification::Unexpected;
                self.journal_append(&record);
                println!("Exit Before Killing");
                println!("command: {}", record.command.join(" "));
                println!("stdout:\n{}", record.stdout);
                println!("stderr:\n{}", record.stderr);
                return Err(CrashTestError::EarlyExit {
                    status: record.status,
                });
            }
            echo_error_lines(&record.stderr);
            self.journal_append(&record);

            // Time to stabilize before the next run.
            thread::sleep(Duration::from_secs(2));
        }

        self.dirs.remove_db();
        self.retention().remove_retained(counter);
        Ok(())
    }

    /// Narrow: timer loop without kill injection; the binary is expected to
    /// finish cleanly within the duration.
    fn run_narrow(&mut self) -> Result<(), CrashTestError> {
        let duration = self.param_secs("duration", 1800);
        info!(total_duration = duration, "running narrow crash test");

        let deadline = Instant::now() + Duration::from_secs(duration);
        let mut counter = 0u64;
        while Instant::now() < deadline {
            let mut record = self.launch(counter, &[], Duration::from_secs(duration))?;
            check_fatal_signal(&record)?;

            let retention = self.retention();
            retention.capture(counter);
            retention.prune(counter);
            counter += 1;

            echo_error_lines(&record.stderr);

            if record.hit_timeout || record.status != 0 {
                record.classification = Classification::Unexpected;
                self.journal_append(&record);
                println!("command: {}", record.command.join(" "));
                println!("stdout:\n{}", record.stdout);
                println!("stderr:\n{}", record.stderr);
                return Err(CrashTestError::UnexpectedExit {
                    status: record.status,
                    reason: "narrow mode requires a clean exit".to_owned(),
                });
            }
            self.journal_append(&record);

            thread::sleep(Duration::from_secs(2));
        }

        self.dirs.remove_db();
        self.retention().remove_retained(counter);
        Ok(())
    }

    /// Whitebox: rotate check modes across the duration. The first half
    /// runs kill-point injection (three intensity sub-modes by turn); the
    /// second half validates structural variants without faults, tearing
    /// the store down between check modes.
    fn run_whitebox(&mut self) -> Result<(), CrashTestError> {
        let duration = self.param_secs("duration", 10_000);
        info!(total_duration = duration, "running whitebox crash test");

        let start = Instant::now();
        let deadline = start + Duration::from_secs(duration);
        let half_time = start + Duration::from_secs(duration / 2);

        const TOTAL_CHECK_MODES: u32 = 4;
        let kill_odds = self.params.fixed_int("random_kill_odd").unwrap_or(888_887);
        let base_ops = self.params.fixed_int("ops_per_thread").unwrap_or(200_000);
        let disable_kill_points = self.params.fixed_int("disable_kill_points").unwrap_or(0) == 1;
        let wal_disabled = self.params.fixed_int("disable_wal").unwrap_or(0) == 1;

        let mut check_mode = 0u32;
        let mut kill_mode = 0u32;
        let mut prev_compaction_style: i64 = -1;
        let mut counter = 0u64;

        while Instant::now() < deadline {
            if disable_kill_points {
                check_mode = 3;
            }

            let mut additional: Vec<(&'static str, OptionValue)> = Vec::new();
            let mut kill_value: Option<i64> = None;
            match check_mode {
                0 => {
                    // Use large ops per thread since we will kill anyway.
                    additional.push(("ops_per_thread", OptionValue::Int(100 * base_ops)));
                    // Sub-mode 0 covers all kill points. Sub-mode 1 covers
                    // fewer points at higher odds. Sub-mode 2 covers even
                    // less frequent points at further increased odds.
                    match kill_mode {
                        0 => kill_value = Some(kill_odds),
                        1 => {
                            kill_value = Some(if wal_disabled {
                                kill_odds / 50 + 1
                            } else {
                                kill_odds / 10 + 1
                            });
                            additional.push((
                                "kill_exclude_prefixes",
                                OptionValue::Str(
                                    "WalWriter::Append,WalWriter::WriteBuffered".to_owned(),
                                ),
                            ));
                        }
                        _ => {
                            kill_value = Some(kill_odds / 5000 + 1);
                            additional.push((
                                "kill_exclude_prefixes",
                                OptionValue::Str(
                                    "WalWriter::Append,WalWriter::WriteBuffered,\
                                     MmapFile::Allocate,WalWriter::Flush"
                                        .to_owned(),
                                ),
                            ));
                        }
                    }
                    kill_mode = (kill_mode + 1) % 3;
                }
                1 => {
                    // Normal run with universal compaction.
                    additional.push(("ops_per_thread", OptionValue::Int(base_ops)));
                    additional.push(("compaction_style", OptionValue::Int(1)));
                    // Single-level universal has a lot of special logic;
                    // cover it sometimes.
                    if self.rng.one_in(2) {
                        additional.push(("num_levels", OptionValue::Int(1)));
                    }
                }
                2 => {
                    // Bounded-size compaction is a lot slower on reads with
                    // many files, so scale the op count down.
                    additional.push(("ops_per_thread", OptionValue::Int(base_ops / 5)));
                    additional.push(("compaction_style", OptionValue::Int(2)));
                }
                _ => {
                    additional.push(("ops_per_thread", OptionValue::Int(base_ops)));
                }
            }
            match kill_value {
                Some(odds) => additional.push(("kill_random_test", OptionValue::Int(odds))),
                None => additional.push(("kill_random_test", OptionValue::Unset)),
            }

            let cur_compaction_style = additional
                .iter()
                .find(|(key, _)| *key == "compaction_style")
                .and_then(|(_, value)| value.as_int())
                .or_else(|| self.params.fixed_int("compaction_style"))
                .unwrap_or(0);
            if prev_compaction_style != -1 && prev_compaction_style != cur_compaction_style {
                info!(
                    "compaction style changed in this run; destroying the existing store \
                     instead of cycling through a store of a different compaction style"
                );
                additional.push(("destroy_db_initially", OptionValue::Int(1)));
            }
            prev_compaction_style = cur_compaction_style;

            // The global timeout-of-timeouts: remaining duration plus a
            // fixed grace window, so the whole loop stops even if the kill
            // points never fire.
            let timeout = deadline.saturating_duration_since(Instant::now()) + OVER_BUDGET_GRACE;
            let mut record = self.launch(counter, &additional, timeout)?;
            check_fatal_signal(&record)?;

            println!(
                "check_mode={check_mode}, kill option={}, exitcode={}",
                kill_value.map_or("none".to_owned(), |v| v.to_string()),
                record.status
            );
            println!("{}", record.stdout);
            println!("{}", record.stderr);

            let retention = self.retention();
            retention.capture(counter);
            retention.prune(counter);
            counter += 1;

            if record.hit_timeout {
                info!("killing the run for running too long");
                self.journal_append(&record);
                break;
            }

            if !whitebox_expected(kill_value.is_some(), record.status) {
                record.classification = Classification::Unexpected;
                self.journal_append(&record);
                println!("command: {}", record.command.join(" "));
                println!("TEST FAILED. See kill option and exit code above!!!");
                return Err(CrashTestError::UnexpectedExit {
                    status: record.status,
                    reason: if kill_value.is_some() {
                        "kill injection active, expected exit status <= 0".to_owned()
                    } else {
                        "no kill injection, expected a clean exit".to_owned()
                    },
                });
            }
            scan_stderr(&record.stderr)?;
            self.journal_append(&record);

            // First half of the duration keeps doing kill tests; for the
            // second half, rotate through the non-kill check modes with a
            // fresh store each time.
            if Instant::now() > half_time {
                self.dirs.reset_db(self.cfg.cleanup_cmd.as_deref())?;
                self.dirs.reset_expected()?;
                check_mode = (check_mode + 1) % TOTAL_CHECK_MODES;
            }

            // Time to stabilize after a kill.
            thread::sleep(Duration::from_secs(1));
        }

        self.retention().remove_retained(counter);
        Ok(())
    }
}
