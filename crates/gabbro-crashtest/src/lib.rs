//! # gabbro-crashtest: crash-consistency orchestration for `gabbro-stress`
//!
//! This crate runs and kills the Gabbro stress binary many times over,
//! checking consistency in the face of unsafe crashes. Each iteration draws
//! a fresh, internally-consistent configuration from a layered parameter
//! catalog, launches the binary, terminates it abnormally (external timer
//! kill, self-inflicted kill points, or natural exit depending on the
//! mode), and judges whether the observable outcome matches what the
//! injected fault mode predicted.
//!
//! ## Modes
//!
//! - **blackbox**: kill the subprocess externally on a fixed interval; a
//!   run that ends before the kill is a failure.
//! - **whitebox**: let the binary kill itself at injected points for the
//!   first half of the duration, then rotate through structural
//!   validation modes (universal compaction, bounded-size compaction,
//!   default) without fault injection.
//! - **narrow**: a fixed small-key-space profile with tight verification
//!   cadence and no fault injection at all.
//!
//! ## Architecture
//!
//! ```text
//! catalog  ──▶ ParamMap ──▶ ops_mix ──▶ resolve ──▶ sanitize ──▶ command
//!                                                                  │
//!           snapshot  ◀── classify ◀── execute  ◀──────────────────┘
//! ```
//!
//! The supervisor owns the working directories and the rolling two-deep
//! snapshot retention of the store, so the last two on-disk states are
//! always available for postmortem diagnosis after a failure.

pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod ops_mix;
pub mod rng;
pub mod sanitize;
pub mod snapshot;
pub mod supervisor;
pub mod value;

pub use catalog::{Profile, Resolvable, Sampler, TestMode, WritePolicy, build_params, declared_domains};
pub use command::{DENYLIST, build_command};
pub use config::{Configuration, ParamMap};
pub use error::CrashTestError;
pub use ops_mix::{OP_PERCENT_KEYS, SuppliedOps, randomize_op_percentages};
pub use rng::StressRng;
pub use sanitize::{Environment, sanitize};
pub use snapshot::SnapshotRetention;
pub use supervisor::{
    Classification, ExitKind, FatalSignal, IterationRecord, ProcessOutcome, RunState,
    RunSupervisor, SupervisorConfig, WorkDirs, execute,
};
pub use value::{Domain, OptionValue};

/// Environment variable selecting the working-directory root for all store
/// and expected-values directories. Absent, a temporary directory is
/// created per run.
pub const TEST_TMPDIR_ENV_VAR: &str = "GABBRO_TEST_TMPDIR";

/// Environment variable marking release builds (`0` = release). Release
/// builds disable read-fault injection.
pub const DEBUG_LEVEL_ENV_VAR: &str = "GABBRO_DEBUG_LEVEL";
