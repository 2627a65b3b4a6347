//! Rolling snapshot retention for postmortem diagnosis.
//!
//! After every iteration the live store directory and its expected-values
//! shadow directory are copied into a counter-suffixed archive; everything
//! but the newest two generations is pruned, so an investigator can always
//! diff the last two states after a failure without unbounded disk usage.
//!
//! Capture is best-effort: a failed copy is logged and ignored, never a
//! test failure.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// Copies store state after each iteration and prunes old generations.
#[derive(Debug)]
pub struct SnapshotRetention {
    db_dir: PathBuf,
    expected_dir: PathBuf,
}

impl SnapshotRetention {
    /// Retention window: the current and the immediately prior generation.
    pub const RETAINED_GENERATIONS: u64 = 2;

    /// Creates a retention manager for the given live directories.
    pub fn new(db_dir: PathBuf, expected_dir: PathBuf) -> Self {
        Self {
            db_dir,
            expected_dir,
        }
    }

    /// Archive path for a given counter: the store directory name with a
    /// `_<counter>` suffix, as a sibling of the live store.
    pub fn archive_path(&self, counter: u64) -> PathBuf {
        let name = match self.db_dir.file_name() {
            Some(name) => format!("{}_{counter}", name.to_string_lossy()),
            None => format!("db_{counter}"),
        };
        self.db_dir.with_file_name(name)
    }

    /// Copies the live store and its expected-values shadow into the
    /// archive for `counter`. Best-effort.
    pub fn capture(&self, counter: u64) {
        let dest = self.archive_path(counter);
        if let Err(e) = copy_tree(&self.db_dir, &dest) {
            warn!(counter, error = %e, "snapshot capture failed for store directory");
            return;
        }
        if let Err(e) = copy_tree(&self.expected_dir, &dest.join("expected_values_dir")) {
            warn!(counter, error = %e, "snapshot capture failed for expected-values directory");
        }
    }

    /// Deletes the archive two generations behind `counter`, if present.
    pub fn prune(&self, counter: u64) {
        if counter < Self::RETAINED_GENERATIONS {
            return;
        }
        let old = self.archive_path(counter - Self::RETAINED_GENERATIONS);
        if old.exists() {
            if let Err(e) = fs::remove_dir_all(&old) {
                warn!(path = %old.display(), error = %e, "snapshot prune failed");
            }
        }
    }

    /// Deletes the archives still retained after `iterations` captures.
    /// Called on successful completion only; failure paths intentionally
    /// leave the last two generations for inspection.
    pub fn remove_retained(&self, iterations: u64) {
        let low = iterations.saturating_sub(Self::RETAINED_GENERATIONS);
        for counter in low..iterations {
            let path = self.archive_path(counter);
            if path.exists() {
                if let Err(e) = fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "snapshot cleanup failed");
                }
            }
        }
    }
}

/// Recursively copies `src` into `dst` (which must not exist yet).
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_dirs(root: &Path) -> (PathBuf, PathBuf) {
        let db = root.join("blackbox_db");
        let expected = root.join("crashtest_expected");
        fs::create_dir_all(db.join("wal")).unwrap();
        fs::write(db.join("CURRENT"), b"MANIFEST-000001\n").unwrap();
        fs::write(db.join("wal").join("000003.log"), b"records").unwrap();
        fs::create_dir_all(&expected).unwrap();
        fs::write(expected.join("LATEST.state"), b"state").unwrap();
        (db, expected)
    }

    #[test]
    fn capture_copies_store_and_shadow() {
        let root = tempfile::tempdir().unwrap();
        let (db, expected) = seed_dirs(root.path());
        let retention = SnapshotRetention::new(db, expected);

        retention.capture(0);

        let archive = root.path().join("blackbox_db_0");
        assert_eq!(fs::read(archive.join("CURRENT")).unwrap(), b"MANIFEST-000001\n");
        assert_eq!(
            fs::read(archive.join("wal").join("000003.log")).unwrap(),
            b"records"
        );
        assert_eq!(
            fs::read(archive.join("expected_values_dir").join("LATEST.state")).unwrap(),
            b"state"
        );
    }

    #[test]
    fn retention_window_is_exactly_two_generations() {
        let root = tempfile::tempdir().unwrap();
        let (db, expected) = seed_dirs(root.path());
        let retention = SnapshotRetention::new(db, expected);

        for counter in 0..5 {
            retention.capture(counter);
            retention.prune(counter);
        }

        for counter in 0..3 {
            assert!(
                !retention.archive_path(counter).exists(),
                "generation {counter} should have been pruned"
            );
        }
        assert!(retention.archive_path(3).exists());
        assert!(retention.archive_path(4).exists());
    }

    #[test]
    fn remove_retained_clears_the_survivors() {
        let root = tempfile::tempdir().unwrap();
        let (db, expected) = seed_dirs(root.path());
        let retention = SnapshotRetention::new(db, expected);

        for counter in 0..4 {
            retention.capture(counter);
            retention.prune(counter);
        }
        retention.remove_retained(4);

        for counter in 0..4 {
            assert!(!retention.archive_path(counter).exists());
        }
    }

    #[test]
    fn capture_failure_is_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let retention = SnapshotRetention::new(
            root.path().join("does_not_exist"),
            root.path().join("also_missing"),
        );
        // Nothing to copy; must not panic or error out.
        retention.capture(0);
        retention.prune(0);
    }
}
