//! Orchestrator binary: runs and kills the Gabbro stress binary multiple
//! times.
//!
//! # Usage
//!
//! ```bash
//! # Blackbox: external timer kills, 4000s total, one kill every 240s
//! gabbro-crashtest blackbox
//!
//! # Whitebox with the transactional profile and a custom binary
//! gabbro-crashtest whitebox --txn --stress-cmd ./target/release/gabbro-stress
//!
//! # Any catalog option can be overridden directly
//! gabbro-crashtest blackbox --duration=3600 --interval=120 --disable_wal=1
//! ```
//!
//! Flags that match a catalog option are type-checked against that option's
//! declared domain and pin the option for the whole run. Unrecognized flags
//! are passed through to the stress binary verbatim.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use gabbro_crashtest::{
    DEBUG_LEVEL_ENV_VAR, Domain, OptionValue, Profile, RunSupervisor, SupervisorConfig,
    TEST_TMPDIR_ENV_VAR, TestMode, WritePolicy, declared_domains,
};

/// Runs and kills the Gabbro stress binary multiple times.
#[derive(Parser, Debug)]
#[command(name = "gabbro-crashtest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Test mode.
    #[arg(value_enum)]
    mode: ModeArg,

    /// Small single-column-family profile.
    #[arg(long)]
    simple: bool,

    /// Column-family consistency profile.
    #[arg(long)]
    cf_consistency: bool,

    /// Transactional profile.
    #[arg(long)]
    txn: bool,

    /// Best-effort recovery profile (runs with the WAL disabled).
    #[arg(long)]
    best_efforts_recovery: bool,

    /// User-timestamp profile.
    #[arg(long)]
    enable_ts: bool,

    /// Multi-operation transaction profile.
    #[arg(long)]
    multiops_txn: bool,

    /// Write policy for the multi-operation transaction profile.
    #[arg(long, value_enum)]
    write_policy: Option<WritePolicyArg>,

    /// Tiered-storage profile.
    #[arg(long)]
    tiered_storage: bool,

    /// Path to the stress binary.
    #[arg(long, default_value = "./gabbro-stress")]
    stress_cmd: String,

    /// Shell command run whenever the store directory is recreated.
    #[arg(long)]
    cleanup_cmd: Option<String>,

    /// Write a JSON-lines journal of iteration records to this file.
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Seed for the orchestrator's own RNG, for reproducible parameter
    /// draws.
    #[arg(long)]
    rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Blackbox,
    Whitebox,
    Narrow,
}

impl From<ModeArg> for TestMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Blackbox => Self::Blackbox,
            ModeArg::Whitebox => Self::Whitebox,
            ModeArg::Narrow => Self::Narrow,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WritePolicyArg {
    #[value(name = "write_committed")]
    WriteCommitted,
    #[value(name = "write_prepared")]
    WritePrepared,
}

impl From<WritePolicyArg> for WritePolicy {
    fn from(policy: WritePolicyArg) -> Self {
        match policy {
            WritePolicyArg::WriteCommitted => Self::WriteCommitted,
            WritePolicyArg::WritePrepared => Self::WritePrepared,
        }
    }
}

/// Structured flags the orchestrator itself understands; everything else is
/// either a catalog override or a pass-through argument.
const BOOL_FLAGS: &[&str] = &[
    "--simple",
    "--cf-consistency",
    "--txn",
    "--best-efforts-recovery",
    "--enable-ts",
    "--multiops-txn",
    "--tiered-storage",
];
const VALUE_FLAGS: &[&str] = &[
    "--write-policy",
    "--stress-cmd",
    "--cleanup-cmd",
    "--journal",
    "--rng-seed",
];
const HELP_FLAGS: &[&str] = &["-h", "--help", "-V", "--version"];

/// Argument partition: structured flags for clap, type-checked catalog
/// overrides, and verbatim pass-through for the stress binary.
#[derive(Debug, Default)]
struct SplitArgs {
    structured: Vec<String>,
    overrides: BTreeMap<String, OptionValue>,
    passthrough: Vec<String>,
}

/// Splits raw command-line arguments ahead of clap parsing.
fn split_args(
    args: impl Iterator<Item = String>,
    domains: &BTreeMap<String, Domain>,
) -> Result<SplitArgs> {
    let mut split = SplitArgs::default();
    let mut args = args.peekable();
    let mut saw_mode = false;

    while let Some(arg) = args.next() {
        if !arg.starts_with('-') {
            // The first positional is the mode selector; later bare tokens
            // belong to pass-through flags.
            if saw_mode {
                split.passthrough.push(arg);
            } else {
                split.structured.push(arg);
                saw_mode = true;
            }
            continue;
        }

        if HELP_FLAGS.contains(&arg.as_str()) || BOOL_FLAGS.contains(&arg.as_str()) {
            split.structured.push(arg);
            continue;
        }
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_owned(), Some(value.to_owned())),
            None => (arg.clone(), None),
        };
        if VALUE_FLAGS.contains(&flag.as_str()) {
            split.structured.push(arg);
            if inline_value.is_none() {
                match args.next() {
                    Some(value) => split.structured.push(value),
                    None => bail!("flag {flag} requires a value"),
                }
            }
            continue;
        }

        // A `--<catalog key>` flag is a type-checked override.
        if let Some(key) = flag.strip_prefix("--") {
            if let Some(domain) = domains.get(key) {
                let raw = match inline_value {
                    Some(value) => value,
                    None => match args.next() {
                        Some(value) => value,
                        None => bail!("option --{key} requires a value"),
                    },
                };
                let value = domain
                    .parse(&raw)
                    .map_err(|e| anyhow::anyhow!("invalid value for --{key}: {e}"))?;
                split.overrides.insert(key.to_owned(), value);
                continue;
            }
        }

        // Unknown flags go to the stress binary verbatim.
        split.passthrough.push(arg);
    }

    Ok(split)
}

fn run() -> Result<i32> {
    let domains = declared_domains();
    let split = split_args(env::args().skip(1), &domains)?;

    let cli = Cli::parse_from(
        std::iter::once("gabbro-crashtest".to_owned()).chain(split.structured),
    );

    let root = match env::var(TEST_TMPDIR_ENV_VAR) {
        Ok(value) if !value.is_empty() => {
            let path = PathBuf::from(value);
            if !path.is_dir() {
                bail!(
                    "{TEST_TMPDIR_ENV_VAR} is set to a non-existent directory: {}",
                    path.display()
                );
            }
            Some(path)
        }
        _ => None,
    };
    let release_mode = env::var(DEBUG_LEVEL_ENV_VAR).is_ok_and(|v| v == "0");

    let mut cfg = SupervisorConfig::new(cli.mode.into());
    cfg.profile = Profile {
        simple: cli.simple,
        cf_consistency: cli.cf_consistency,
        txn: cli.txn,
        best_efforts_recovery: cli.best_efforts_recovery,
        enable_ts: cli.enable_ts,
        multiops_txn: cli.multiops_txn,
        write_policy: cli.write_policy.map(WritePolicy::from),
        tiered_storage: cli.tiered_storage,
    };
    cfg.stress_cmd = cli.stress_cmd;
    cfg.cleanup_cmd = cli.cleanup_cmd;
    cfg.overrides = split.overrides;
    cfg.passthrough = split.passthrough;
    cfg.root = root;
    cfg.release_mode = release_mode;
    cfg.rng_seed = cli.rng_seed;
    cfg.journal = cli.journal;

    match RunSupervisor::new(cfg).and_then(RunSupervisor::run) {
        Ok(()) => Ok(0),
        Err(e) => {
            eprintln!("{e}");
            Ok(e.exit_code())
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
