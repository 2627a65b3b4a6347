//! The layered parameter catalog for the stress binary.
//!
//! Each option is either a fixed value or a stochastic generator sampled
//! once per iteration. Options are grouped into layers (global defaults,
//! per-mode defaults, per-profile overlays); layer application order is
//! fixed and later layers strictly override earlier ones.
//!
//! Options whose semantics require a single draw for the whole test (the
//! seed that decides which keys disallow overwrites, structural choices
//! that must not flip between iterations, ...) are drawn once at catalog
//! construction and stored as `Fixed`.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ParamMap;
use crate::rng::StressRng;
use crate::value::{Domain, OptionValue};

// ============================================================================
// Resolution Rules
// ============================================================================

/// Resolution rule for one catalog entry: a constant, or a generator
/// evaluated once per iteration.
#[derive(Debug, Clone)]
pub enum Resolvable {
    /// A constant value.
    Fixed(OptionValue),
    /// A generator re-sampled every iteration.
    Sampled(Sampler),
}

/// The closed set of generator kinds the catalog uses.
#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    /// Uniform integer in `[lo, hi]`.
    IntUniform(i64, i64),
    /// One of the listed integers; weighting by repetition.
    IntChoice(&'static [i64]),
    /// One of the listed integers with explicit weights.
    IntWeighted(&'static [(i64, u32)]),
    /// One of the listed floats.
    FloatChoice(&'static [f64]),
    /// One of the listed strings; weighting by repetition.
    StrChoice(&'static [&'static str]),
    /// `true` with probability `1/n`.
    BoolOneIn(u32),
    /// `1` with probability `1/n`, else `0`.
    IntOneIn(u32),
    /// `(1 << uniform(0..=max_exp)) - 1`.
    PowerOfTwoMinusOne(u32),
    /// Uniform in `[lo, hi]` half the time, a fixed sentinel otherwise.
    IntUniformOrSentinel {
        lo: i64,
        hi: i64,
        sentinel: i64,
    },
    /// Bloom bits per key: a uniform `[0, 19]` draw or a log-normal(2.3,
    /// 1.3) draw, both rendered as a float.
    BloomBits,
    /// Bottommost compression: `"disable"` half the time, otherwise one of
    /// the regular compression types.
    BottommostCompression,
}

impl Sampler {
    /// Draws one value.
    pub fn sample(self, rng: &mut StressRng) -> OptionValue {
        match self {
            Self::IntUniform(lo, hi) => OptionValue::Int(rng.int_in(lo, hi)),
            Self::IntChoice(values) => OptionValue::Int(rng.pick(values)),
            Self::IntWeighted(weighted) => {
                let total: u32 = weighted.iter().map(|(_, w)| w).sum();
                let mut roll = rng.int_in(0, i64::from(total) - 1);
                for (value, weight) in weighted {
                    roll -= i64::from(*weight);
                    if roll < 0 {
                        return OptionValue::Int(*value);
                    }
                }
                unreachable!("weights exhausted before roll")
            }
            Self::FloatChoice(values) => OptionValue::Float(rng.pick(values)),
            Self::StrChoice(values) => OptionValue::Str(rng.pick(values).to_owned()),
            Self::BoolOneIn(n) => OptionValue::Bool(rng.one_in(n)),
            Self::IntOneIn(n) => OptionValue::Int(i64::from(rng.one_in(n))),
            Self::PowerOfTwoMinusOne(max_exp) => {
                OptionValue::Int((1i64 << rng.int_in(0, i64::from(max_exp))) - 1)
            }
            Self::IntUniformOrSentinel { lo, hi, sentinel } => {
                if rng.one_in(2) {
                    OptionValue::Int(sentinel)
                } else {
                    OptionValue::Int(rng.int_in(lo, hi))
                }
            }
            Self::BloomBits => {
                if rng.one_in(2) {
                    OptionValue::Float(rng.int_in(0, 19) as f64)
                } else {
                    OptionValue::Float(rng.lognormal(2.3, 1.3))
                }
            }
            Self::BottommostCompression => {
                if rng.one_in(2) {
                    OptionValue::Str("disable".to_owned())
                } else {
                    OptionValue::Str(rng.pick(COMPRESSION_TYPES).to_owned())
                }
            }
        }
    }

    /// The value domain this generator draws from.
    fn domain(self) -> Domain {
        match self {
            Self::IntUniform(..)
            | Self::IntChoice(_)
            | Self::IntWeighted(_)
            | Self::IntOneIn(_)
            | Self::PowerOfTwoMinusOne(_)
            | Self::IntUniformOrSentinel { .. } => Domain::Int,
            Self::FloatChoice(_) | Self::BloomBits => Domain::Float,
            Self::StrChoice(_) | Self::BottommostCompression => Domain::Str,
            Self::BoolOneIn(_) => Domain::Bool,
        }
    }
}

const COMPRESSION_TYPES: &[&str] = &["none", "snappy", "zlib", "lz4", "lz4hc", "xpress", "zstd"];

// Shorthand constructors for the tables below.
fn fi(v: i64) -> Resolvable {
    Resolvable::Fixed(OptionValue::Int(v))
}

fn fs(v: &str) -> Resolvable {
    Resolvable::Fixed(OptionValue::Str(v.to_owned()))
}

fn fb(v: bool) -> Resolvable {
    Resolvable::Fixed(OptionValue::Bool(v))
}

fn sampled(s: Sampler) -> Resolvable {
    Resolvable::Sampled(s)
}

/// Wall-clock seed forwarded to the stress binary. Drawn once per test:
/// the seed decides which keys disallow overwrites, so it must not change
/// between iterations of the same run.
fn stress_seed() -> Resolvable {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64;
    fi(micros & 0xffff_ffff)
}

// ============================================================================
// Modes and Profiles
// ============================================================================

/// Top-level test mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    /// Kill the subprocess externally on a timer.
    Blackbox,
    /// Let the subprocess kill itself at injected points; rotate check
    /// modes across the run.
    Whitebox,
    /// Small key space, tight verification, no kill injection.
    Narrow,
}

impl TestMode {
    /// Directory-name fragment for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blackbox => "blackbox",
            Self::Whitebox => "whitebox",
            Self::Narrow => "narrow",
        }
    }
}

/// Transaction write policy for the multi-op transaction profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    WriteCommitted,
    WritePrepared,
}

/// Boolean mode-modifier flags selecting parameter overlays.
#[derive(Debug, Clone, Copy, Default)]
pub struct Profile {
    /// Small, single-column-family configuration.
    pub simple: bool,
    /// Column-family consistency stress.
    pub cf_consistency: bool,
    /// Transactional stress.
    pub txn: bool,
    /// Best-effort recovery (requires WAL disabled).
    pub best_efforts_recovery: bool,
    /// User-timestamp stress.
    pub enable_ts: bool,
    /// Multi-operation transaction stress.
    pub multiops_txn: bool,
    /// Write policy for `multiops_txn`.
    pub write_policy: Option<WritePolicy>,
    /// Tiered storage stress.
    pub tiered_storage: bool,
}

// ============================================================================
// Layer Tables
// ============================================================================

/// Global defaults applied to every blackbox/whitebox run.
fn default_params(rng: &mut StressRng) -> Vec<(&'static str, Resolvable)> {
    use Sampler::*;
    vec![
        ("acquire_snapshot_one_in", fi(10_000)),
        ("backup_max_size", fi(100 * 1024 * 1024)),
        // Consider a larger number when backups are considered more stable.
        ("backup_one_in", fi(100_000)),
        ("batch_protection_bytes_per_key", sampled(IntChoice(&[0, 8]))),
        (
            "memtable_protection_bytes_per_key",
            sampled(IntChoice(&[0, 1, 2, 4, 8])),
        ),
        ("block_size", fi(rng.pick(&[16_384, 4096]))),
        ("bloom_bits", sampled(BloomBits)),
        ("cache_index_and_filter_blocks", sampled(IntUniform(0, 1))),
        ("cache_size", fi(8_388_608)),
        (
            "charge_compression_dictionary_building_buffer",
            sampled(IntChoice(&[0, 1])),
        ),
        ("charge_filter_construction", sampled(IntChoice(&[0, 1]))),
        ("charge_table_reader", sampled(IntChoice(&[0, 1]))),
        ("charge_file_metadata", sampled(IntChoice(&[0, 1]))),
        ("checkpoint_one_in", fi(1_000_000)),
        ("compression_type", sampled(StrChoice(COMPRESSION_TYPES))),
        ("bottommost_compression_type", sampled(BottommostCompression)),
        (
            "checksum_type",
            sampled(StrChoice(&["crc32c", "xxhash", "xxhash64", "xxh3"])),
        ),
        ("compression_max_dict_bytes", sampled(IntChoice(&[0, 16_384]))),
        (
            "compression_zstd_max_train_bytes",
            sampled(IntChoice(&[0, 65_536])),
        ),
        // Parallel compression is not stable enough to sample yet.
        ("compression_parallel_threads", fi(1)),
        (
            "compression_max_dict_buffer_bytes",
            sampled(PowerOfTwoMinusOne(40)),
        ),
        ("compression_use_zstd_dict_trainer", sampled(IntUniform(0, 1))),
        ("clear_column_family_one_in", fi(0)),
        ("compact_files_one_in", fi(1_000_000)),
        ("compact_range_one_in", fi(1_000_000)),
        ("compaction_pri", fi(rng.int_in(0, 4))),
        ("data_block_index_type", sampled(IntChoice(&[0, 1]))),
        ("destroy_db_initially", fi(0)),
        ("enable_pipelined_write", sampled(IntChoice(&[0, 0, 0, 0, 1]))),
        ("enable_compaction_filter", sampled(IntChoice(&[0, 0, 0, 1]))),
        ("fail_if_options_file_error", sampled(IntUniform(0, 1))),
        ("filter_uri", fs("")),
        ("flush_one_in", fi(1_000_000)),
        (
            "manual_wal_flush_one_in",
            sampled(IntChoice(&[0, 0, 1000, 1_000_000])),
        ),
        (
            "file_checksum_impl",
            sampled(StrChoice(&["none", "crc32c", "xxh64", "big"])),
        ),
        ("get_live_files_one_in", fi(100_000)),
        // The corresponding APIs are not guaranteed to succeed, so these
        // stay disabled.
        ("get_sorted_wal_files_one_in", fi(0)),
        ("get_current_wal_file_one_in", fi(0)),
        // Hash index stays out of the rotation for now.
        ("index_type", sampled(IntChoice(&[0, 0, 0, 2, 2, 3]))),
        ("ingest_external_file_one_in", fi(1_000_000)),
        ("lock_wal_one_in", fi(1_000_000)),
        ("mark_for_compaction_one_file_in", sampled(IntChoice(&[0, 10]))),
        ("max_background_compactions", fi(20)),
        ("max_bytes_for_level_base", fi(10_485_760)),
        (
            "max_key",
            fi(rng.pick(&[100 * 1024, 1024 * 1024, 10 * 1024 * 1024])),
        ),
        ("max_key_len", fi(0)),
        ("key_len_percent_dist", fs("0")),
        ("max_write_buffer_number", fi(3)),
        ("mmap_read", sampled(IntUniform(0, 1))),
        // A nonzero nooverwritepercent is only possible because the seed
        // does not vary between runs, so every run disallows overwrites on
        // the same keys.
        ("nooverwritepercent", fi(rng.pick(&[0, 5, 20, 30, 40, 50, 95]))),
        ("open_files", sampled(IntChoice(&[-1, -1, 100, 500_000]))),
        ("optimize_filters_for_memory", sampled(IntUniform(0, 1))),
        ("partition_filters", sampled(IntUniform(0, 1))),
        ("partition_pinning", sampled(IntUniform(0, 3))),
        ("pause_background_one_in", fi(1_000_000)),
        ("prefix_size", sampled(IntChoice(&[-1, 1, 5, 7, 8]))),
        ("progress_reports", fi(0)),
        ("read_only", fi(0)),
        ("recycle_log_file_num", sampled(IntUniform(0, 1))),
        ("snapshot_hold_ops", fi(100_000)),
        (
            "sst_file_manager_bytes_per_sec",
            sampled(IntChoice(&[0, 104_857_600])),
        ),
        (
            "sst_file_manager_bytes_per_truncate",
            sampled(IntChoice(&[0, 1_048_576])),
        ),
        ("long_running_snapshots", sampled(IntUniform(0, 1))),
        ("subcompactions", sampled(IntUniform(1, 4))),
        ("target_file_size_base", fi(2_097_152)),
        ("target_file_size_multiplier", fi(2)),
        ("test_batches_snapshots", fi(rng.pick(&[0, 0, 0, 1]))),
        ("top_level_index_pinning", sampled(IntUniform(0, 3))),
        ("unpartitioned_pinning", sampled(IntUniform(0, 3))),
        ("use_direct_reads", sampled(IntUniform(0, 1))),
        (
            "use_direct_io_for_flush_and_compaction",
            sampled(IntUniform(0, 1)),
        ),
        ("mock_direct_io", fb(false)),
        ("cache_type", sampled(StrChoice(&["lru_cache", "clock_cache"]))),
        ("use_full_merge_v1", sampled(BoolOneIn(10))),
        ("use_merge", sampled(IntUniform(0, 1))),
        // Must be the same across iterations for verification to work.
        (
            "use_put_entity_one_in",
            fi(rng.pick(&[0, 0, 0, 0, 0, 0, 0, 1, 5, 10])),
        ),
        // 999 means "use the plain Bloom API".
        (
            "ribbon_starting_level",
            sampled(IntUniformOrSentinel {
                lo: -1,
                hi: 10,
                sentinel: 999,
            }),
        ),
        ("value_size_mult", fi(32)),
        ("verify_checksum", fi(1)),
        (
            "write_buffer_size",
            sampled(IntChoice(&[
                1024 * 1024,
                8 * 1024 * 1024,
                128 * 1024 * 1024,
                1024 * 1024 * 1024,
            ])),
        ),
        ("format_version", sampled(IntChoice(&[2, 3, 4, 5, 5, 5, 5, 5, 5]))),
        ("index_block_restart_interval", sampled(IntUniform(1, 15))),
        ("use_multiget", sampled(IntUniform(0, 1))),
        ("use_get_entity", sampled(IntChoice(&[0, 0, 0, 0, 0, 0, 0, 1]))),
        (
            "periodic_compaction_seconds",
            sampled(IntChoice(&[0, 0, 1, 2, 10, 100, 1000])),
        ),
        // 0 = never, 10 = often (threading bugs), 600 = default.
        ("stats_dump_period_sec", sampled(IntChoice(&[0, 10, 600]))),
        ("compaction_ttl", sampled(IntChoice(&[0, 0, 1, 2, 10, 100, 1000]))),
        ("fifo_allow_compaction", sampled(IntUniform(0, 1))),
        // Small manifests only in a small share of runs; most of the time
        // manifest history should be preserved to help debugging.
        (
            "max_manifest_file_size",
            sampled(IntWeighted(&[
                (16_384, 1),
                (32_768, 1),
                (1024 * 1024 * 1024, 27),
            ])),
        ),
        // Sync mode makes runs slower, so sample it rarely.
        ("sync", sampled(IntOneIn(20))),
        ("bytes_per_sync", sampled(IntChoice(&[0, 262_144]))),
        ("wal_bytes_per_sync", sampled(IntChoice(&[0, 524_288]))),
        (
            "db_write_buffer_size",
            sampled(IntChoice(&[
                0,
                0,
                0,
                1024 * 1024,
                8 * 1024 * 1024,
                128 * 1024 * 1024,
                1024 * 1024 * 1024,
            ])),
        ),
        ("initiate_wbm_flushes", sampled(IntUniform(0, 1))),
        ("avoid_unnecessary_blocking_io", fi(rng.int_in(0, 1))),
        ("write_dbid_to_manifest", fi(rng.int_in(0, 1))),
        ("avoid_flush_during_recovery", sampled(IntOneIn(8))),
        (
            "max_write_batch_group_size_bytes",
            sampled(IntChoice(&[16, 64, 1024 * 1024, 16 * 1024 * 1024])),
        ),
        ("level_compaction_dynamic_level_bytes", fb(true)),
        ("verify_checksum_one_in", fi(1_000_000)),
        ("verify_db_one_in", fi(100_000)),
        ("continuous_verification_interval", fi(0)),
        ("read_fault_one_in", sampled(IntChoice(&[0, 32, 1000]))),
        (
            "open_metadata_write_fault_one_in",
            sampled(IntChoice(&[0, 0, 8])),
        ),
        ("open_write_fault_one_in", sampled(IntChoice(&[0, 0, 16]))),
        ("open_read_fault_one_in", sampled(IntChoice(&[0, 0, 32]))),
        ("sync_fault_injection", sampled(IntUniform(0, 1))),
        ("get_property_one_in", fi(1_000_000)),
        ("paranoid_file_checks", sampled(IntChoice(&[0, 1, 1, 1]))),
        (
            "max_write_buffer_size_to_maintain",
            sampled(IntChoice(&[
                0,
                1024 * 1024,
                2 * 1024 * 1024,
                4 * 1024 * 1024,
                8 * 1024 * 1024,
            ])),
        ),
        ("user_timestamp_size", fi(0)),
        ("secondary_cache_fault_one_in", sampled(IntChoice(&[0, 0, 32]))),
        ("prepopulate_block_cache", sampled(IntChoice(&[0, 1]))),
        (
            "memtable_prefix_bloom_size_ratio",
            sampled(FloatChoice(&[0.001, 0.01, 0.1, 0.5])),
        ),
        ("memtable_whole_key_filtering", sampled(IntUniform(0, 1))),
        (
            "detect_filter_construct_corruption",
            sampled(IntChoice(&[0, 1])),
        ),
        ("adaptive_readahead", sampled(IntChoice(&[0, 1]))),
        ("async_io", sampled(IntChoice(&[0, 1]))),
        ("wal_compression", sampled(StrChoice(&["none", "zstd"]))),
        // Unique-id verification is always on.
        ("verify_sst_unique_id_in_manifest", fi(1)),
        (
            "secondary_cache_uri",
            sampled(StrChoice(&[
                "",
                "compressed_secondary_cache://capacity=8388608",
                "compressed_secondary_cache://capacity=8388608;enable_custom_split_merge=true",
            ])),
        ),
        ("allow_data_in_errors", fb(true)),
        ("readahead_size", sampled(IntChoice(&[0, 16_384, 524_288]))),
        (
            "initial_auto_readahead_size",
            sampled(IntChoice(&[0, 16_384, 524_288])),
        ),
        (
            "max_auto_readahead_size",
            sampled(IntChoice(&[0, 16_384, 524_288])),
        ),
        (
            "num_file_reads_for_auto_readahead",
            sampled(IntChoice(&[0, 1, 2])),
        ),
        ("min_write_buffer_number_to_merge", sampled(IntChoice(&[1, 2]))),
        (
            "preserve_internal_time_seconds",
            sampled(IntChoice(&[0, 60, 3600, 36_000])),
        ),
        ("seed", stress_seed()),
        ("verify_before_write", sampled(BoolOneIn(20))),
        ("allow_concurrent_memtable_write", sampled(IntUniform(0, 1))),
        // Only done when thread 0 acquires a snapshot.
        ("compare_full_db_state_snapshot", sampled(IntChoice(&[0, 0, 0, 1]))),
        ("num_iterations", sampled(IntUniform(0, 100))),
        ("sync_wal_one_in", fi(100_000)),
        ("customopspercent", fi(0)),
        ("memtablerep", sampled(StrChoice(&["skip_list", "hash_table"]))),
        ("pinning_policy", sampled(StrChoice(&["default", "scoped"]))),
        ("use_dynamic_delay", sampled(IntChoice(&[0, 1, 1, 1]))),
        ("allow_wbm_stalls", sampled(IntUniform(0, 1))),
        ("start_delay_percent", sampled(IntUniform(0, 99))),
        ("use_clean_delete_during_flush", sampled(IntUniform(0, 1))),
    ]
}

/// Blackbox-mode defaults.
fn blackbox_defaults() -> Vec<(&'static str, Resolvable)> {
    use Sampler::IntChoice;
    vec![
        ("disable_wal", sampled(IntChoice(&[0, 0, 0, 1]))),
        // Total time this orchestrator stresses the binary.
        ("duration", fi(4000)),
        // Time for one stress instance to run.
        ("interval", fi(240)),
        // We will be killing anyway, so use a large value.
        ("ops_per_thread", fi(100_000_000)),
        ("reopen", fi(0)),
        ("set_options_one_in", fi(10_000)),
    ]
}

/// Whitebox-mode defaults.
fn whitebox_defaults() -> Vec<(&'static str, Resolvable)> {
    vec![
        // Kill odds for WAL-disabled runs still need tuning, so whitebox
        // keeps the WAL on.
        ("disable_wal", fi(0)),
        ("duration", fi(10_000)),
        ("disable_kill_points", fb(false)),
        ("ops_per_thread", fi(200_000)),
        ("random_kill_odd", fi(888_887)),
        ("reopen", fi(20)),
    ]
}

/// Simple-profile overlay: one column family, small structural knobs.
fn simple_defaults() -> Vec<(&'static str, Resolvable)> {
    use Sampler::IntChoice;
    vec![
        ("column_families", fi(1)),
        ("max_background_compactions", fi(1)),
        ("max_bytes_for_level_base", fi(67_108_864)),
        ("memtablerep", fs("skip_list")),
        ("target_file_size_base", fi(16_777_216)),
        ("target_file_size_multiplier", fi(1)),
        ("test_batches_snapshots", fi(0)),
        ("write_buffer_size", fi(32 * 1024 * 1024)),
        ("level_compaction_dynamic_level_bytes", fb(false)),
        ("paranoid_file_checks", sampled(IntChoice(&[0, 1, 1, 1]))),
        // This locks a range of keys.
        ("verify_iterator_with_expected_state_one_in", fi(5)),
    ]
}

fn blackbox_simple_defaults() -> Vec<(&'static str, Resolvable)> {
    vec![("open_files", fi(-1)), ("set_options_one_in", fi(0))]
}

fn whitebox_simple_defaults() -> Vec<(&'static str, Resolvable)> {
    Vec::new()
}

/// Column-family consistency profile.
fn cf_consistency_params() -> Vec<(&'static str, Resolvable)> {
    use Sampler::IntUniform;
    vec![
        ("disable_wal", sampled(IntUniform(0, 1))),
        ("reopen", fi(0)),
        ("test_cf_consistency", fi(1)),
        // A small write buffer triggers flushes more frequently.
        ("write_buffer_size", fi(1024 * 1024)),
        ("enable_pipelined_write", sampled(IntUniform(0, 1))),
        // Snapshots are used heavily in this mode and are incompatible
        // with the compaction filter.
        ("enable_compaction_filter", fi(0)),
        // File ingestion is not implemented for this stress variant.
        ("ingest_external_file_one_in", fi(0)),
        ("test_batches_snapshots", fi(0)),
    ]
}

/// Transactional profile.
fn txn_params(rng: &mut StressRng) -> Vec<(&'static str, Resolvable)> {
    vec![
        ("use_txn", fi(1)),
        // Set once for the entire test.
        ("txn_write_policy", fi(rng.int_in(0, 2))),
        ("unordered_write", fi(rng.int_in(0, 1))),
        ("disable_wal", fi(0)),
        // Read-only open after a checkpoint is not compatible with
        // write-prepared transactions.
        ("checkpoint_one_in", fi(0)),
        // Neither is pipelined write.
        ("enable_pipelined_write", fi(0)),
        ("create_timestamped_snapshot_one_in", fi(rng.pick(&[0, 20]))),
        ("use_put_entity_one_in", fi(0)),
    ]
}

/// Best-effort recovery profile.
fn best_efforts_recovery_params() -> Vec<(&'static str, Resolvable)> {
    vec![
        ("best_efforts_recovery", fi(1)),
        ("atomic_flush", fi(0)),
        ("disable_wal", fi(1)),
        ("column_families", fi(1)),
    ]
}

/// Blob-storage overlay, mixed in with a small probability.
fn blob_params() -> Vec<(&'static str, Resolvable)> {
    use Sampler::{FloatChoice, IntChoice, IntUniform, StrChoice};
    vec![
        ("allow_setting_blob_options_dynamically", fi(1)),
        // Blob files and GC start enabled in 75% of runs; they may still be
        // toggled during the run via live option changes.
        ("enable_blob_files", sampled(IntChoice(&[0, 1, 1, 1]))),
        ("min_blob_size", sampled(IntChoice(&[0, 8, 16]))),
        (
            "blob_file_size",
            sampled(IntChoice(&[1_048_576, 16_777_216, 268_435_456, 1_073_741_824])),
        ),
        (
            "blob_compression_type",
            sampled(StrChoice(&["none", "snappy", "lz4", "zstd"])),
        ),
        ("enable_blob_garbage_collection", sampled(IntChoice(&[0, 1, 1, 1]))),
        (
            "blob_garbage_collection_age_cutoff",
            sampled(FloatChoice(&[0.0, 0.25, 0.5, 0.75, 1.0])),
        ),
        (
            "blob_garbage_collection_force_threshold",
            sampled(FloatChoice(&[0.5, 0.75, 1.0])),
        ),
        (
            "blob_compaction_readahead_size",
            sampled(IntChoice(&[0, 1_048_576, 4_194_304])),
        ),
        (
            "blob_file_starting_level",
            sampled(IntChoice(&[0, 0, 0, 0, 1, 1, 1, 2, 2, 3])),
        ),
        ("use_blob_cache", sampled(IntUniform(0, 1))),
        ("use_shared_block_and_blob_cache", sampled(IntUniform(0, 1))),
        (
            "blob_cache_size",
            sampled(IntChoice(&[1_048_576, 2_097_152, 4_194_304, 8_388_608])),
        ),
        ("prepopulate_blob_cache", sampled(IntUniform(0, 1))),
    ]
}

/// User-timestamp profile.
fn ts_params() -> Vec<(&'static str, Resolvable)> {
    vec![
        ("test_cf_consistency", fi(0)),
        ("test_batches_snapshots", fi(0)),
        ("user_timestamp_size", fi(8)),
        ("use_merge", fi(0)),
        ("use_full_merge_v1", fi(0)),
        ("use_txn", fi(0)),
        ("ingest_external_file_one_in", fi(0)),
        ("use_put_entity_one_in", fi(0)),
    ]
}

/// Tiered-storage profile.
fn tiered_params() -> Vec<(&'static str, Resolvable)> {
    use Sampler::IntChoice;
    vec![
        ("enable_tiered_storage", fi(1)),
        // Hot-data time of 1 minute, 1 hour, or 10 hours.
        ("preclude_last_level_data_seconds", sampled(IntChoice(&[60, 3600, 36_000]))),
        // Only universal compaction for now; level compaction has a known
        // endless-compaction issue with tiering.
        ("compaction_style", fi(1)),
        // Tiered storage does not support blob files yet.
        ("enable_blob_files", fi(0)),
        ("use_blob_db", fi(0)),
    ]
}

/// Multi-operation transaction profile.
fn multiops_txn_default_params(rng: &mut StressRng) -> Vec<(&'static str, Resolvable)> {
    vec![
        ("test_cf_consistency", fi(0)),
        ("test_batches_snapshots", fi(0)),
        ("test_multi_ops_txns", fi(1)),
        ("use_txn", fi(1)),
        ("two_write_queues", fi(rng.pick(&[0, 1]))),
        ("disable_wal", fi(0)),
        (
            "use_only_the_last_commit_time_batch_for_recovery",
            fi(rng.pick(&[0, 1])),
        ),
        ("clear_column_family_one_in", fi(0)),
        ("column_families", fi(1)),
        ("enable_pipelined_write", fi(rng.pick(&[0, 1]))),
        // This test already acquires snapshots in reads.
        ("acquire_snapshot_one_in", fi(0)),
        ("backup_one_in", fi(0)),
        ("writepercent", fi(0)),
        ("delpercent", fi(0)),
        ("delrangepercent", fi(0)),
        ("customopspercent", fi(80)),
        ("readpercent", fi(5)),
        ("iterpercent", fi(15)),
        ("prefixpercent", fi(0)),
        ("verify_db_one_in", fi(1000)),
        ("continuous_verification_interval", fi(1000)),
        ("delay_snapshot_read_one_in", fi(3)),
        // The smallest write_buffer_size the binary accepts without
        // sanitizing it upward at open.
        ("write_buffer_size", fi(65_536)),
        // Flush often to generate more files and trigger more compactions.
        ("flush_one_in", fi(1000)),
        ("rollback_one_in", fi(4)),
        ("enable_compaction_filter", fi(0)),
        ("create_timestamped_snapshot_one_in", fi(50)),
        ("sync_fault_injection", fi(0)),
        ("use_put_entity_one_in", fi(0)),
    ]
}

/// Write-committed policy overlay for the multi-op transaction profile.
fn multiops_wc_txn_params() -> Vec<(&'static str, Resolvable)> {
    vec![
        ("txn_write_policy", fi(0)),
        // Pipelined write is not well tested with this profile yet.
        ("enable_pipelined_write", fi(0)),
    ]
}

/// Write-prepared policy overlay for the multi-op transaction profile.
fn multiops_wp_txn_params() -> Vec<(&'static str, Resolvable)> {
    vec![
        ("txn_write_policy", fi(1)),
        ("wp_snapshot_cache_bits", fi(1)),
        ("wp_commit_cache_bits", fi(10)),
        ("enable_pipelined_write", fi(0)),
        ("checkpoint_one_in", fi(0)),
        // Required in order to use the commit-time batch.
        ("use_only_the_last_commit_time_batch_for_recovery", fi(1)),
        ("clear_wp_commit_cache_one_in", fi(10)),
        ("create_timestamped_snapshot_one_in", fi(0)),
    ]
}

const NARROW_OPS_PER_THREAD: i64 = 50_000;

/// Narrow mode: a fixed profile tuned for a small key space and tight
/// verification cadence. Replaces the global defaults entirely.
fn narrow_params(rng: &mut StressRng) -> Vec<(&'static str, Resolvable)> {
    use Sampler::IntChoice;
    vec![
        ("duration", fi(1800)),
        ("max_key_len", fi(8)),
        ("value_size_mult", fi(8)),
        ("fail_if_options_file_error", fb(true)),
        ("allow_concurrent_memtable_write", fb(true)),
        ("reopen", fi(2)),
        ("log2_keys_per_lock", fi(1)),
        ("prefixpercent", fi(0)),
        ("prefix_size", fi(-1)),
        ("ops_per_thread", fi(NARROW_OPS_PER_THREAD)),
        ("get_live_files_one_in", fi(NARROW_OPS_PER_THREAD)),
        ("acquire_snapshot_one_in", fi(NARROW_OPS_PER_THREAD / 4)),
        ("sync_wal_one_in", fi(NARROW_OPS_PER_THREAD / 2)),
        ("verify_db_one_in", fi(NARROW_OPS_PER_THREAD)),
        ("use_multiget", sampled(IntChoice(&[0, 0, 0, 1]))),
        ("enable_compaction_filter", sampled(IntChoice(&[0, 0, 0, 1]))),
        ("compare_full_db_state_snapshot", sampled(IntChoice(&[0, 0, 0, 1]))),
        ("use_merge", sampled(IntChoice(&[0, 0, 0, 1]))),
        ("nooverwritepercent", fi(rng.pick(&[0, 5, 20, 30, 40, 50, 95]))),
        ("seed", stress_seed()),
        // Keys the sanitizer reads but narrow mode never samples.
        ("mmap_read", fi(0)),
        ("use_direct_io_for_flush_and_compaction", fi(0)),
        ("partition_filters", fi(0)),
        ("use_direct_reads", fi(0)),
        ("user_timestamp_size", fi(0)),
        ("ribbon_starting_level", fi(0)),
        ("secondary_cache_uri", fs("")),
        // Incompatible with the narrow settings above.
        ("clear_column_family_one_in", fi(0)),
        ("get_sorted_wal_files_one_in", fi(0)),
        ("get_current_wal_file_one_in", fi(0)),
        ("continuous_verification_interval", fi(0)),
        ("destroy_db_initially", fi(0)),
        ("progress_reports", fi(0)),
    ]
}

// ============================================================================
// Catalog Assembly
// ============================================================================

/// Builds the merged parameter map for one test run.
///
/// Layer order matches the documented override priority: global defaults,
/// then mode defaults, then profile overlays. User overrides are applied
/// by the caller after this returns, so they always win.
pub fn build_params(mode: TestMode, profile: &Profile, rng: &mut StressRng) -> ParamMap {
    let mut params = ParamMap::new();

    if mode == TestMode::Narrow {
        params.apply(narrow_params(rng));
        return params;
    }

    params.apply(default_params(rng));
    match mode {
        TestMode::Blackbox => params.apply(blackbox_defaults()),
        TestMode::Whitebox => params.apply(whitebox_defaults()),
        TestMode::Narrow => unreachable!("narrow handled above"),
    }
    if profile.simple {
        params.apply(simple_defaults());
        match mode {
            TestMode::Blackbox => params.apply(blackbox_simple_defaults()),
            TestMode::Whitebox => params.apply(whitebox_simple_defaults()),
            TestMode::Narrow => unreachable!("narrow handled above"),
        }
    }
    if profile.cf_consistency {
        params.apply(cf_consistency_params());
    }
    if profile.txn {
        params.apply(txn_params(rng));
    }
    if profile.best_efforts_recovery {
        params.apply(best_efforts_recovery_params());
    }
    if profile.enable_ts {
        params.apply(ts_params());
    }
    if profile.multiops_txn {
        params.apply(multiops_txn_default_params(rng));
        match profile.write_policy {
            Some(WritePolicy::WriteCommitted) => params.apply(multiops_wc_txn_params()),
            Some(WritePolicy::WritePrepared) => params.apply(multiops_wp_txn_params()),
            None => {}
        }
    }
    if profile.tiered_storage {
        params.apply(tiered_params());
    }

    // Best-effort recovery and tiered storage are incompatible with blob
    // storage; otherwise mix the blob overlay in with a 10% chance.
    if !profile.best_efforts_recovery && !profile.tiered_storage && rng.one_in(10) {
        params.apply(blob_params());
    }

    params
}

/// Declared domain per catalog key, for type-checking user overrides.
///
/// Built from the union of every layer table, the workload-percentage keys,
/// and the path knobs the supervisor injects.
pub fn declared_domains() -> BTreeMap<String, Domain> {
    let mut domains = BTreeMap::new();

    // The draw results are discarded; only the entry shapes matter.
    let mut rng = StressRng::seeded(0);
    let layers = [
        default_params(&mut rng),
        blackbox_defaults(),
        whitebox_defaults(),
        simple_defaults(),
        blackbox_simple_defaults(),
        whitebox_simple_defaults(),
        cf_consistency_params(),
        txn_params(&mut rng),
        best_efforts_recovery_params(),
        blob_params(),
        ts_params(),
        tiered_params(),
        multiops_txn_default_params(&mut rng),
        multiops_wc_txn_params(),
        multiops_wp_txn_params(),
        narrow_params(&mut rng),
    ];
    for layer in layers {
        for (key, resolvable) in layer {
            let domain = match resolvable {
                Resolvable::Fixed(OptionValue::Bool(_)) => Domain::Bool,
                Resolvable::Fixed(OptionValue::Int(_)) => Domain::Int,
                Resolvable::Fixed(OptionValue::Float(_)) => Domain::Float,
                Resolvable::Fixed(OptionValue::Str(_)) => Domain::Str,
                Resolvable::Fixed(OptionValue::Path(_) | OptionValue::Unset) => Domain::Path,
                Resolvable::Sampled(sampler) => sampler.domain(),
            };
            domains.insert(key.to_owned(), domain);
        }
    }

    for key in crate::ops_mix::OP_PERCENT_KEYS {
        domains.insert(key.to_owned(), Domain::Int);
    }
    // The store path itself stays orchestrator-owned; only the shadow
    // directories are overridable.
    for key in ["expected_values_dir", "key_spaces_path"] {
        domains.insert(key.to_owned(), Domain::Path);
    }

    domains
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blackbox_defaults_override_globals() {
        let mut rng = StressRng::seeded(1);
        let params = build_params(TestMode::Blackbox, &Profile::default(), &mut rng);

        assert_eq!(params.fixed_int("duration"), Some(4000));
        assert_eq!(params.fixed_int("interval"), Some(240));
        assert_eq!(params.fixed_int("reopen"), Some(0));
        // Global default survives where no later layer touches it.
        assert_eq!(params.fixed_int("cache_size"), Some(8_388_608));
    }

    #[test]
    fn simple_profile_layers_on_top_of_mode_defaults() {
        let mut rng = StressRng::seeded(2);
        let profile = Profile {
            simple: true,
            ..Profile::default()
        };
        let params = build_params(TestMode::Blackbox, &profile, &mut rng);

        assert_eq!(params.fixed_int("column_families"), Some(1));
        // blackbox_simple overrides both the global and the simple layer.
        assert_eq!(params.fixed_int("open_files"), Some(-1));
        assert_eq!(params.fixed_int("set_options_one_in"), Some(0));
        assert_eq!(params.fixed_str("memtablerep"), Some("skip_list"));
    }

    #[test]
    fn best_efforts_recovery_excludes_blob_overlay() {
        for seed in 0..64 {
            let mut rng = StressRng::seeded(seed);
            let profile = Profile {
                best_efforts_recovery: true,
                ..Profile::default()
            };
            let params = build_params(TestMode::Whitebox, &profile, &mut rng);
            assert!(!params.contains_key("enable_blob_files"));
            assert_eq!(params.fixed_int("disable_wal"), Some(1));
        }
    }

    #[test]
    fn narrow_mode_skips_global_defaults() {
        let mut rng = StressRng::seeded(3);
        let params = build_params(TestMode::Narrow, &Profile::default(), &mut rng);

        assert_eq!(params.fixed_int("max_key_len"), Some(8));
        assert_eq!(params.fixed_int("duration"), Some(1800));
        assert!(!params.contains_key("cache_size"));
    }

    #[test]
    fn once_per_test_knobs_are_fixed() {
        let mut rng = StressRng::seeded(4);
        let params = build_params(TestMode::Blackbox, &Profile::default(), &mut rng);

        for key in ["seed", "max_key", "nooverwritepercent", "test_batches_snapshots"] {
            assert!(
                matches!(params.get(key), Some(Resolvable::Fixed(_))),
                "{key} must be drawn once per test"
            );
        }
        assert!(matches!(params.get("bloom_bits"), Some(Resolvable::Sampled(_))));
    }

    #[test]
    fn domains_cover_every_table_key() {
        let domains = declared_domains();

        assert_eq!(domains.get("writepercent"), Some(&Domain::Int));
        assert_eq!(domains.get("compression_type"), Some(&Domain::Str));
        assert_eq!(domains.get("bloom_bits"), Some(&Domain::Float));
        assert_eq!(domains.get("mock_direct_io"), Some(&Domain::Bool));
        assert_eq!(domains.get("expected_values_dir"), Some(&Domain::Path));
        assert_eq!(domains.get("wp_commit_cache_bits"), Some(&Domain::Int));
    }

    #[test]
    fn sampler_draws_stay_in_domain() {
        let mut rng = StressRng::seeded(5);
        for _ in 0..500 {
            match Sampler::IntWeighted(&[(16_384, 1), (32_768, 1), (1_073_741_824, 27)])
                .sample(&mut rng)
            {
                OptionValue::Int(v) => {
                    assert!([16_384, 32_768, 1_073_741_824].contains(&v));
                }
                other => panic!("unexpected value {other:?}"),
            }
            match Sampler::PowerOfTwoMinusOne(40).sample(&mut rng) {
                OptionValue::Int(v) => assert!(v >= 0 && v <= (1i64 << 40) - 1),
                other => panic!("unexpected value {other:?}"),
            }
            match Sampler::BottommostCompression.sample(&mut rng) {
                OptionValue::Str(s) => {
                    assert!(s == "disable" || COMPRESSION_TYPES.contains(&s.as_str()));
                }
                other => panic!("unexpected value {other:?}"),
            }
        }
    }
}
