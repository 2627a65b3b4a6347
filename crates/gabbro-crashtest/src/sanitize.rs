//! Cross-option compatibility rules.
//!
//! This module is the locus of nearly all domain knowledge about which
//! stress-binary features may combine. [`sanitize`] rewrites a resolved
//! configuration into a mutually-consistent one by applying the rules in a
//! fixed sequence; order matters because later rules read fields earlier
//! rules changed.
//!
//! The pass is pure given its inputs: environment facts (release mode,
//! direct-I/O support, iteration counter) arrive in [`Environment`], so
//! every rule can be unit-tested deterministically. Applying the pass to an
//! already-sanitized configuration is a fixed point.
//!
//! Whenever a rule turns a feature off, any operation-percentage budget the
//! feature consumed is folded into a designated fallback operation so the
//! sum-to-100 invariant from the mix allocator is preserved.

use std::collections::BTreeSet;

use tracing::warn;

use crate::config::Configuration;
use crate::error::CrashTestError;
use crate::value::OptionValue;

/// Environment facts the rules depend on.
#[derive(Debug, Clone, Copy)]
pub struct Environment {
    /// Release builds disable read-fault injection.
    pub release_mode: bool,
    /// Whether the store's filesystem supports `O_DIRECT`.
    pub direct_io_supported: bool,
    /// Iteration counter; iteration 0 always opens read-write so there is
    /// initial data to read back.
    pub counter: u64,
}

/// Memtable representations that support concurrent writes.
const CONCURRENT_MEMTABLE_REPS: &[&str] = &["skip_list", "hash_table"];

/// Forces a structural requirement, refusing to override an explicit user
/// pin that conflicts with it.
fn force(
    cfg: &mut Configuration,
    pinned: &BTreeSet<String>,
    key: &str,
    value: i64,
    requirement: &str,
) -> Result<(), CrashTestError> {
    if pinned.contains(key) && cfg.int(key) != value {
        return Err(CrashTestError::Configuration(format!(
            "override {key}={} conflicts with {requirement}, which requires {key}={value}",
            cfg.int(key)
        )));
    }
    cfg.insert(key, value);
    Ok(())
}

/// Rewrites `cfg` until every known compatibility rule holds.
pub fn sanitize(
    mut cfg: Configuration,
    pinned: &BTreeSet<String>,
    env: &Environment,
) -> Result<Configuration, CrashTestError> {
    if env.release_mode {
        cfg.insert("read_fault_one_in", 0i64);
    }

    if cfg.int("compression_max_dict_bytes") == 0 {
        cfg.insert("compression_zstd_max_train_bytes", 0i64);
        cfg.insert("compression_max_dict_buffer_bytes", 0i64);
    }
    if cfg.str("compression_type") != "zstd" {
        cfg.insert("compression_zstd_max_train_bytes", 0i64);
    }

    if cfg.int("mmap_read") == 1 {
        cfg.insert("use_direct_io_for_flush_and_compaction", 0i64);
        cfg.insert("use_direct_reads", 0i64);
        if cfg.str("file_checksum_impl") != "none" {
            // Whole-file checksum generation is broken under mmap reads,
            // which file ingestion relies on.
            cfg.insert("ingest_external_file_one_in", 0i64);
        }
    }

    if (cfg.int("use_direct_io_for_flush_and_compaction") == 1
        || cfg.int("use_direct_reads") == 1)
        && !env.direct_io_supported
    {
        if env.release_mode {
            warn!("store filesystem does not support direct I/O; disabling direct reads and direct flush/compaction");
            cfg.insert("use_direct_reads", 0i64);
            cfg.insert("use_direct_io_for_flush_and_compaction", 0i64);
        } else {
            cfg.insert("mock_direct_io", true);
        }
    }

    if cfg.int("test_batches_snapshots") == 1 {
        cfg.insert("enable_compaction_filter", 0i64);
        if cfg.int("prefix_size") < 0 {
            cfg.insert("prefix_size", 1i64);
        }
    }

    // Multi-key operations are incompatible with transactions and user
    // timestamps.
    if cfg.int("test_batches_snapshots") == 1
        || cfg.int("use_txn") == 1
        || cfg.int("user_timestamp_size") > 0
    {
        cfg.insert("ingest_external_file_one_in", 0i64);
    }
    if cfg.int("test_batches_snapshots") == 1 || cfg.int("use_txn") == 1 {
        let delrange = cfg.int("delrangepercent");
        cfg.add_int("delpercent", delrange);
        cfg.insert("delrangepercent", 0i64);
    }

    if cfg.int("disable_wal") == 1
        || cfg.int("sync_fault_injection") == 1
        || cfg.int("manual_wal_flush_one_in") > 0
    {
        // File ingestion does not guarantee prefix-recoverability when
        // unsynced data can be lost, and the stress compaction filter can
        // apply memtable updates to table files, which is equally
        // problematic across crash recoveries.
        cfg.insert("ingest_external_file_one_in", 0i64);
        cfg.insert("enable_compaction_filter", 0i64);
    }

    // Only under write-prepared transactions does unordered write keep the
    // usual guarantees.
    if cfg.int("unordered_write") == 1 {
        cfg.insert("txn_write_policy", 1i64);
        cfg.insert("allow_concurrent_memtable_write", 1i64);
    }
    if cfg.int("allow_concurrent_memtable_write") == 1
        && !CONCURRENT_MEMTABLE_REPS.contains(&cfg.str("memtablerep"))
    {
        cfg.insert("memtablerep", "skip_list");
    }

    if cfg.int("disable_wal") == 1 {
        cfg.insert("atomic_flush", 1i64);
        cfg.insert("sync", 0i64);
        cfg.insert("write_fault_one_in", 0i64);
    }

    // Compaction TTL and periodic compaction need every file kept open.
    if cfg.int("open_files") != -1 {
        cfg.insert("compaction_ttl", 0i64);
        cfg.insert("periodic_compaction_seconds", 0i64);
    }
    // Same for bounded-size compaction, which asserts on them.
    if cfg.int("compaction_style") == 2 {
        cfg.insert("compaction_ttl", 0i64);
        cfg.insert("periodic_compaction_seconds", 0i64);
    }

    if cfg.int("partition_filters") == 1 && cfg.int("index_type") != 2 {
        cfg.insert("partition_filters", 0i64);
    }

    if cfg.int("atomic_flush") == 1 {
        cfg.insert("enable_pipelined_write", 0i64);
    }

    if cfg.int("sst_file_manager_bytes_per_sec") == 0 {
        cfg.insert("sst_file_manager_bytes_per_truncate", 0i64);
    }

    if cfg.int("read_only") == 1 {
        if env.counter == 0 {
            // The first iteration must create the initial data.
            cfg.insert("read_only", 0i64);
        } else {
            let writes = cfg.int("writepercent");
            cfg.add_int("readpercent", writes);
            cfg.insert("writepercent", 0i64);
            let dels = cfg.int("delpercent");
            cfg.add_int("iterpercent", dels);
            cfg.insert("delpercent", 0i64);
            let delranges = cfg.int("delrangepercent");
            cfg.add_int("iterpercent", delranges);
            cfg.insert("delrangepercent", 0i64);
        }
    }

    if cfg.int("enable_compaction_filter") == 1 {
        // The compaction filter is incompatible with snapshots; avoid
        // taking them and avoid operations that verify through them. The
        // iterator share goes to reads.
        cfg.insert("acquire_snapshot_one_in", 0i64);
        cfg.insert("compact_range_one_in", 0i64);
        let iters = cfg.int("iterpercent");
        cfg.add_int("readpercent", iters);
        cfg.insert("iterpercent", 0i64);
    }

    if cfg.int("prefix_size") == -1 {
        let prefixes = cfg.int("prefixpercent");
        cfg.add_int("readpercent", prefixes);
        cfg.insert("prefixpercent", 0i64);
        if cfg.int("memtable_whole_key_filtering") == 0 {
            cfg.insert("memtable_prefix_bloom_size_ratio", OptionValue::Float(0.0));
        }
    }

    if cfg.int("two_write_queues") == 1 {
        cfg.insert("enable_pipelined_write", 0i64);
    }

    if cfg.int("best_efforts_recovery") == 1 {
        let req = "best-effort recovery";
        force(&mut cfg, pinned, "disable_wal", 1, req)?;
        force(&mut cfg, pinned, "atomic_flush", 0, req)?;
        force(&mut cfg, pinned, "enable_compaction_filter", 0, req)?;
        force(&mut cfg, pinned, "sync", 0, req)?;
        force(&mut cfg, pinned, "write_fault_one_in", 0, req)?;
    }

    // Timestamped snapshots are only supported under the write-committed
    // policy with ordered writes.
    if cfg.int("create_timestamped_snapshot_one_in") > 0 {
        let req = "timestamped snapshots";
        force(&mut cfg, pinned, "txn_write_policy", 0, req)?;
        force(&mut cfg, pinned, "unordered_write", 0, req)?;
    }

    // Correctness testing with unsynced data loss only works under the
    // write-committed policy.
    if cfg.int("use_txn") == 1 && cfg.int("txn_write_policy") != 0 {
        cfg.insert("sync_fault_injection", 0i64);
        cfg.insert("manual_wal_flush_one_in", 0i64);
    }

    // Wide-column puts are not supported by file ingestion or merge.
    if cfg.int("use_put_entity_one_in") != 0 {
        cfg.insert("ingest_external_file_one_in", 0i64);
        cfg.insert("use_merge", 0i64);
        cfg.insert("use_full_merge_v1", 0i64);
    }

    // A custom filter policy cannot be constructed with zero bloom bits.
    if !cfg.str("filter_uri").is_empty() && cfg.float("bloom_bits") <= 0.0 {
        cfg.insert("bloom_bits", OptionValue::Float(1.0));
    }

    // Scoped pinning reads through the block cache.
    if cfg.str("pinning_policy") == "scoped" {
        cfg.insert("cache_index_and_filter_blocks", 1i64);
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment {
            release_mode: false,
            direct_io_supported: true,
            counter: 1,
        }
    }

    fn no_pins() -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn base_cfg() -> Configuration {
        let mut cfg = Configuration::new();
        for (key, share) in [
            ("writepercent", 35i64),
            ("delpercent", 15),
            ("prefixpercent", 5),
            ("delrangepercent", 5),
            ("readpercent", 25),
            ("iterpercent", 15),
            ("customopspercent", 0),
        ] {
            cfg.insert(key, share);
        }
        cfg.insert("open_files", -1i64);
        cfg.insert("prefix_size", 5i64);
        cfg.insert("compression_type", "zstd");
        cfg.insert("compression_max_dict_bytes", 16_384i64);
        cfg
    }

    fn mix_sum(cfg: &Configuration) -> i64 {
        crate::ops_mix::OP_PERCENT_KEYS
            .iter()
            .map(|key| cfg.int(key))
            .sum()
    }

    #[test]
    fn mmap_read_disables_direct_io() {
        let mut cfg = base_cfg();
        cfg.insert("mmap_read", 1i64);
        cfg.insert("use_direct_reads", 1i64);
        cfg.insert("use_direct_io_for_flush_and_compaction", 1i64);
        cfg.insert("file_checksum_impl", "crc32c");
        cfg.insert("ingest_external_file_one_in", 1_000_000i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("use_direct_reads"), 0);
        assert_eq!(cfg.int("use_direct_io_for_flush_and_compaction"), 0);
        assert_eq!(cfg.int("ingest_external_file_one_in"), 0);
    }

    #[test]
    fn unsupported_direct_io_mocks_in_debug_and_disables_in_release() {
        let mut cfg = base_cfg();
        cfg.insert("use_direct_reads", 1i64);
        let unsupported = Environment {
            direct_io_supported: false,
            ..env()
        };

        let debug = sanitize(cfg.clone(), &no_pins(), &unsupported).unwrap();
        assert_eq!(debug.get("mock_direct_io"), Some(&OptionValue::Bool(true)));
        assert_eq!(debug.int("use_direct_reads"), 1);

        let release = sanitize(
            cfg,
            &no_pins(),
            &Environment {
                release_mode: true,
                ..unsupported
            },
        )
        .unwrap();
        assert_eq!(release.int("use_direct_reads"), 0);
        assert_eq!(release.int("use_direct_io_for_flush_and_compaction"), 0);
    }

    #[test]
    fn disable_wal_forces_atomic_flush_and_unsync_safety() {
        let mut cfg = base_cfg();
        cfg.insert("disable_wal", 1i64);
        cfg.insert("sync", 1i64);
        cfg.insert("enable_pipelined_write", 1i64);
        cfg.insert("enable_compaction_filter", 1i64);
        cfg.insert("ingest_external_file_one_in", 1_000_000i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("atomic_flush"), 1);
        assert_eq!(cfg.int("sync"), 0);
        assert_eq!(cfg.int("write_fault_one_in"), 0);
        assert_eq!(cfg.int("ingest_external_file_one_in"), 0);
        assert_eq!(cfg.int("enable_compaction_filter"), 0);
        // Atomic flush in turn rules out pipelined writes.
        assert_eq!(cfg.int("enable_pipelined_write"), 0);
    }

    #[test]
    fn transactions_fold_range_deletes_into_deletes() {
        let mut cfg = base_cfg();
        cfg.insert("use_txn", 1i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("delrangepercent"), 0);
        assert_eq!(cfg.int("delpercent"), 20);
        assert_eq!(mix_sum(&cfg), 100);
    }

    #[test]
    fn compaction_filter_gives_iterators_to_reads() {
        let mut cfg = base_cfg();
        cfg.insert("enable_compaction_filter", 1i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("iterpercent"), 0);
        assert_eq!(cfg.int("readpercent"), 40);
        assert_eq!(cfg.int("acquire_snapshot_one_in"), 0);
        assert_eq!(cfg.int("compact_range_one_in"), 0);
        assert_eq!(mix_sum(&cfg), 100);
    }

    #[test]
    fn missing_prefix_support_gives_prefix_share_to_reads() {
        let mut cfg = base_cfg();
        cfg.insert("prefix_size", -1i64);
        cfg.insert("memtable_whole_key_filtering", 0i64);
        cfg.insert("memtable_prefix_bloom_size_ratio", OptionValue::Float(0.1));

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("prefixpercent"), 0);
        assert_eq!(cfg.int("readpercent"), 30);
        assert_eq!(cfg.float("memtable_prefix_bloom_size_ratio"), 0.0);
        assert_eq!(mix_sum(&cfg), 100);
    }

    #[test]
    fn read_only_remaps_only_after_first_iteration() {
        let mut cfg = base_cfg();
        cfg.insert("read_only", 1i64);

        let first = sanitize(
            cfg.clone(),
            &no_pins(),
            &Environment {
                counter: 0,
                ..env()
            },
        )
        .unwrap();
        assert_eq!(first.int("read_only"), 0);
        assert_eq!(first.int("writepercent"), 35);

        let later = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(later.int("read_only"), 1);
        assert_eq!(later.int("writepercent"), 0);
        assert_eq!(later.int("delpercent"), 0);
        assert_eq!(later.int("delrangepercent"), 0);
        assert_eq!(later.int("readpercent"), 60);
        assert_eq!(later.int("iterpercent"), 35);
        assert_eq!(mix_sum(&later), 100);
    }

    #[test]
    fn unordered_write_requires_write_prepared_and_concurrent_memtable() {
        let mut cfg = base_cfg();
        cfg.insert("unordered_write", 1i64);
        cfg.insert("memtablerep", "vector");

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("txn_write_policy"), 1);
        assert_eq!(cfg.int("allow_concurrent_memtable_write"), 1);
        assert_eq!(cfg.str("memtablerep"), "skip_list");
    }

    #[test]
    fn best_efforts_recovery_forces_wal_off() {
        let mut cfg = base_cfg();
        cfg.insert("best_efforts_recovery", 1i64);
        cfg.insert("disable_wal", 0i64);
        cfg.insert("atomic_flush", 1i64);
        cfg.insert("enable_compaction_filter", 1i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("disable_wal"), 1);
        assert_eq!(cfg.int("atomic_flush"), 0);
        assert_eq!(cfg.int("enable_compaction_filter"), 0);
        assert_eq!(cfg.int("sync"), 0);
    }

    #[test]
    fn best_efforts_recovery_rejects_pinned_wal() {
        let mut cfg = base_cfg();
        cfg.insert("best_efforts_recovery", 1i64);
        cfg.insert("disable_wal", 0i64);
        let pinned: BTreeSet<String> = ["disable_wal".to_owned()].into();

        let err = sanitize(cfg, &pinned, &env()).expect_err("pinned conflict must fail");
        assert!(matches!(err, CrashTestError::Configuration(_)));
    }

    #[test]
    fn timestamped_snapshots_force_write_committed() {
        let mut cfg = base_cfg();
        cfg.insert("create_timestamped_snapshot_one_in", 20i64);
        cfg.insert("txn_write_policy", 2i64);
        cfg.insert("unordered_write", 0i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("txn_write_policy"), 0);
    }

    #[test]
    fn non_write_committed_txns_disable_unsynced_fault_injection() {
        let mut cfg = base_cfg();
        cfg.insert("use_txn", 1i64);
        cfg.insert("txn_write_policy", 1i64);
        cfg.insert("sync_fault_injection", 1i64);
        cfg.insert("manual_wal_flush_one_in", 1000i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("sync_fault_injection"), 0);
        assert_eq!(cfg.int("manual_wal_flush_one_in"), 0);
    }

    #[test]
    fn compaction_ttl_needs_unbounded_open_files() {
        let mut cfg = base_cfg();
        cfg.insert("open_files", 100i64);
        cfg.insert("compaction_ttl", 100i64);
        cfg.insert("periodic_compaction_seconds", 10i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("compaction_ttl"), 0);
        assert_eq!(cfg.int("periodic_compaction_seconds"), 0);
    }

    #[test]
    fn zero_bloom_bits_clamped_under_custom_filter_policy() {
        let mut cfg = base_cfg();
        cfg.insert("filter_uri", "paired_bloom");
        cfg.insert("bloom_bits", OptionValue::Float(0.0));

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.float("bloom_bits"), 1.0);
    }

    #[test]
    fn scoped_pinning_requires_cached_index_blocks() {
        let mut cfg = base_cfg();
        cfg.insert("pinning_policy", "scoped");
        cfg.insert("cache_index_and_filter_blocks", 0i64);

        let cfg = sanitize(cfg, &no_pins(), &env()).unwrap();
        assert_eq!(cfg.int("cache_index_and_filter_blocks"), 1);
    }

    #[test]
    fn sanitize_is_a_fixed_point_on_resolved_configs() {
        use crate::catalog::{Profile, TestMode, build_params};
        use crate::ops_mix::{SuppliedOps, randomize_op_percentages};
        use crate::rng::StressRng;

        let profiles = [
            Profile::default(),
            Profile {
                txn: true,
                ..Profile::default()
            },
            Profile {
                best_efforts_recovery: true,
                ..Profile::default()
            },
            Profile {
                cf_consistency: true,
                ..Profile::default()
            },
        ];
        for (i, profile) in profiles.iter().enumerate() {
            for seed in 0..10 {
                let mut rng = StressRng::seeded(seed);
                let mut params = build_params(TestMode::Whitebox, profile, &mut rng);
                let supplied = SuppliedOps::capture(&params);
                randomize_op_percentages(&mut params, &supplied, &mut rng).unwrap();

                let resolved = params.resolve(&mut rng);
                let once = sanitize(resolved, &no_pins(), &env()).unwrap();
                let twice = sanitize(once.clone(), &no_pins(), &env()).unwrap();
                assert_eq!(once, twice, "rule set not idempotent (profile {i}, seed {seed})");
                assert_eq!(mix_sum(&once), 100);
            }
        }
    }
}
