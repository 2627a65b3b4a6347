//! Rendering a finalized configuration into the stress-binary command line.

use crate::config::Configuration;

/// Keys meaningful only to the orchestrator; these must never reach the
/// stress binary.
pub const DENYLIST: &[&str] = &[
    "test_type",
    "simple",
    "cf_consistency",
    "txn",
    "best_efforts_recovery",
    "enable_ts",
    "multiops_txn",
    "write_policy",
    "tiered_storage",
    "duration",
    "interval",
    "random_kill_odd",
    "disable_kill_points",
    "stress_cmd",
    "cleanup_cmd",
];

/// Builds the argument vector: the executable, one `--key=value` flag per
/// configuration entry (keys sorted, denylist excluded, unset entries
/// skipped), then the pass-through arguments verbatim.
pub fn build_command(
    stress_cmd: &str,
    cfg: &Configuration,
    passthrough: &[String],
) -> Vec<String> {
    let mut argv = Vec::with_capacity(cfg.len() + passthrough.len() + 1);
    argv.push(stress_cmd.to_owned());
    for (key, value) in cfg.iter() {
        if DENYLIST.contains(&key) || value.is_unset() {
            continue;
        }
        argv.push(format!("--{key}={value}"));
    }
    argv.extend(passthrough.iter().cloned());
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::OptionValue;
    use std::path::PathBuf;

    #[test]
    fn flags_are_sorted_and_rendered() {
        let mut cfg = Configuration::new();
        cfg.insert("writepercent", 35i64);
        cfg.insert("compression_type", "lz4");
        cfg.insert("db", PathBuf::from("/tmp/blackbox_db"));
        cfg.insert("mock_direct_io", false);

        let argv = build_command("./gabbro-stress", &cfg, &[]);
        assert_eq!(
            argv,
            vec![
                "./gabbro-stress".to_owned(),
                "--compression_type=lz4".to_owned(),
                "--db=/tmp/blackbox_db".to_owned(),
                "--mock_direct_io=false".to_owned(),
                "--writepercent=35".to_owned(),
            ]
        );
    }

    #[test]
    fn denylisted_and_unset_keys_are_skipped() {
        let mut cfg = Configuration::new();
        cfg.insert("duration", 4000i64);
        cfg.insert("interval", 240i64);
        cfg.insert("random_kill_odd", 888_887i64);
        cfg.insert("kill_random_test", OptionValue::Unset);
        cfg.insert("ops_per_thread", 200_000i64);

        let argv = build_command("./gabbro-stress", &cfg, &[]);
        assert_eq!(
            argv,
            vec!["./gabbro-stress".to_owned(), "--ops_per_thread=200000".to_owned()]
        );
    }

    #[test]
    fn passthrough_arguments_are_appended_verbatim() {
        let mut cfg = Configuration::new();
        cfg.insert("reopen", 20i64);

        let passthrough = vec!["--custom_flag=3".to_owned(), "positional".to_owned()];
        let argv = build_command("./gabbro-stress", &cfg, &passthrough);
        assert_eq!(
            argv,
            vec![
                "./gabbro-stress".to_owned(),
                "--reopen=20".to_owned(),
                "--custom_flag=3".to_owned(),
                "positional".to_owned(),
            ]
        );
    }
}
