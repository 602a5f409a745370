//! Shared test helpers for tmerge integration tests.
//!
//! All tests use temp directories, including a private lock file, so they
//! never contend with each other or with a real merge on the host.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tmerge::{MergeConfig, Merger};

/// A temp directory with its own lock file.
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root().join("run").join("tmerge.lock")
    }

    /// Write `contents` to `name` (creating parent dirs) and return the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.path(name))
            .unwrap_or_else(|e| panic!("failed to read {name}: {e}"))
    }

    /// Names of backup files directly under the sandbox root.
    pub fn backups(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.root())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".backup."))
            .collect();
        names.sort();
        names
    }

    /// Config with this sandbox's lock file.
    pub fn config(&self) -> MergeConfig {
        let mut config = MergeConfig::default();
        config.lock.path = Some(self.lock_path());
        config
    }

    pub fn merger(&self) -> Merger {
        Merger::new(self.config())
    }

    /// Run tmerge in the sandbox root with a private lock file.
    pub fn tmerge(&self, args: &[&str]) -> Output {
        self.tmerge_with_env(args, &[])
    }

    pub fn tmerge_with_env(&self, args: &[&str], env: &[(&str, &str)]) -> Output {
        self.command(args, env)
            .output()
            .expect("failed to execute tmerge")
    }

    /// The tmerge invocation `tmerge_with_env` runs, for tests that need to
    /// spawn it themselves.
    pub fn command(&self, args: &[&str], env: &[(&str, &str)]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tmerge"));
        cmd.args(args)
            .current_dir(self.root())
            .env_remove("TMERGE_CONFIG")
            .env_remove("TMERGE_BACKUPS_ENABLED")
            .env_remove("TMERGE_BACKUP_RETENTION_HOURS")
            .env_remove("TMERGE_BACKUP_GRACE_HOURS")
            .env_remove("TMERGE_MAX_BACKUPS")
            .env_remove("RUST_LOG")
            .env("TMERGE_LOCK_FILE", self.lock_path());
        for (k, v) in env {
            cmd.env(k, v);
        }
        cmd
    }

    /// Run tmerge and assert it succeeds. Returns stdout as string.
    pub fn tmerge_ok(&self, args: &[&str]) -> String {
        let out = self.tmerge(args);
        let stderr = String::from_utf8_lossy(&out.stderr);
        let stdout = String::from_utf8_lossy(&out.stdout);
        assert!(
            out.status.success(),
            "tmerge {} failed:\nstdout: {stdout}\nstderr: {stderr}",
            args.join(" "),
        );
        stdout.to_string()
    }

    /// Run tmerge and assert it exits with `code`. Returns stderr as string.
    pub fn tmerge_fails(&self, args: &[&str], code: i32) -> String {
        let out = self.tmerge(args);
        assert_eq!(
            out.status.code(),
            Some(code),
            "tmerge {}: unexpected exit status\nstdout: {}\nstderr: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr),
        );
        String::from_utf8_lossy(&out.stderr).to_string()
    }
}

/// A fixed instant on 2026-03-01 at `hour`:00 UTC.
pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
}
