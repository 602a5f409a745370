//! Single-host merge lock.
//!
//! The lock record is a file holding the owner's PID. Ownership is an
//! exclusive advisory lock (`flock`) on the record, taken before the PID is
//! written, so two acquirers can never both believe they hold it. The PID is
//! what other invocations report and what decides staleness: a record that
//! nobody has locked and whose PID is no longer running is rewritten in
//! place. A record that is empty or unparsable belongs to an acquirer that
//! has not written its PID yet and is reported as busy. Acquisition never
//! waits on a live holder: it gets [`MergeError::LockBusy`].
//!
//! [`LockHandle`] removes the record on drop, but only while the record is
//! still the file it locked and still names this process. The binary
//! additionally removes it from its signal handler.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::{debug, warn};

use crate::error::MergeError;

/// Rounds of acquisition before giving up on a record that keeps changing
/// underneath us.
const ACQUIRE_ATTEMPTS: usize = 4;

/// Acquires and inspects the lock record at a fixed path.
#[derive(Clone, Debug)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    /// Manage the lock record at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the lock record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock for the current process.
    ///
    /// # Errors
    /// [`MergeError::LockBusy`] if a live process holds it or the record is
    /// still being written, [`MergeError::Io`] if the record cannot be
    /// created or locked.
    pub fn acquire(&self) -> Result<LockHandle, MergeError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| MergeError::io("create lock dir", parent, e))?;
        }

        for _ in 0..ACQUIRE_ATTEMPTS {
            if let Some(handle) = self.try_acquire()? {
                return Ok(handle);
            }
        }

        // The record was released and recreated under us every round.
        Err(self.busy(self.recorded_pid().unwrap_or_default()))
    }

    /// One acquisition round. `Ok(None)` means the record we locked was
    /// unlinked by its previous owner and the caller should try again.
    fn try_acquire(&self) -> Result<Option<LockHandle>, MergeError> {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => {
                // Our own fresh record: others only hold it briefly to look.
                file.lock_exclusive()
                    .map_err(|e| MergeError::io("lock", &self.path, e))?;
                if !still_linked(&file, &self.path) {
                    return Ok(None);
                }
                return self.claim(file).map(Some);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(MergeError::io("create lock", &self.path, e)),
        }

        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MergeError::io("open lock", &self.path, e)),
        };
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                return Err(self.busy(self.recorded_pid().unwrap_or_default()));
            }
            Err(e) => return Err(MergeError::io("lock", &self.path, e)),
        }
        if !still_linked(&file, &self.path) {
            return Ok(None);
        }

        match read_pid(&file) {
            None => Err(self.busy(0)),
            Some(pid) if pid != std::process::id() && pid_alive(pid) => Err(self.busy(pid)),
            Some(pid) => {
                warn!(lock = %self.path.display(), stale_pid = pid, "replacing stale lock record");
                self.claim(file).map(Some)
            }
        }
    }

    /// Write our PID into a record we hold the advisory lock on.
    fn claim(&self, file: File) -> Result<LockHandle, MergeError> {
        let pid = std::process::id();
        write_pid(&file, pid).map_err(|e| {
            let _ = fs::remove_file(&self.path);
            MergeError::io("write lock", &self.path, e)
        })?;
        debug!(lock = %self.path.display(), pid, "lock acquired");
        Ok(LockHandle {
            path: self.path.clone(),
            file,
            released: false,
        })
    }

    fn busy(&self, pid: u32) -> MergeError {
        MergeError::LockBusy {
            pid,
            lock_path: self.path.clone(),
        }
    }

    fn recorded_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    /// PID of the live process holding the lock, if any.
    #[must_use]
    pub fn holder(&self) -> Option<u32> {
        self.recorded_pid().filter(|&pid| pid_alive(pid))
    }
}

/// Proof of lock ownership. Dropping it releases the lock.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the handle is dropped"]
pub struct LockHandle {
    path: PathBuf,
    // Closing it drops the advisory lock, so it must outlive the unlink.
    file: File,
    released: bool,
}

impl LockHandle {
    /// Location of the held lock record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if still_linked(&self.file, &self.path) {
            release_if_held(&self.path);
        } else {
            warn!(lock = %self.path.display(), "lock record was replaced; leaving it alone");
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.remove();
    }
}

fn read_pid(mut file: &File) -> Option<u32> {
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid(mut file: &File, pid: u32) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(format!("{pid}\n").as_bytes())?;
    file.sync_all()
}

/// `ERROR_LOCK_VIOLATION`, what Windows reports instead of `EWOULDBLOCK`.
const LOCK_VIOLATION: i32 = 33;

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || (cfg!(windows) && err.raw_os_error() == Some(LOCK_VIOLATION))
}

/// Whether `path` still names the file behind `file`. False once the owner
/// has unlinked it, even if a new record was created at the same path.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// Remove a lock record unconditionally. Safe to call from a signal handler
/// thread; a missing record is not an error.
pub fn release_path(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(lock = %path.display(), "lock released"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(lock = %path.display(), error = %e, "could not remove lock record"),
    }
}

/// Remove the lock record only if it names the current process. Used by the
/// signal handler, which may fire before or after this process acquired the
/// lock.
pub fn release_if_held(path: &Path) {
    let owned = fs::read_to_string(path)
        .ok()
        .and_then(|c| c.trim().parse::<u32>().ok())
        == Some(std::process::id());
    if owned {
        release_path(path);
    }
}

/// Whether a process with `pid` is currently running.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if pid == std::process::id() {
        return true;
    }
    pid_alive_os(pid)
}

#[cfg(target_os = "linux")]
fn pid_alive_os(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn pid_alive_os(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

#[cfg(not(unix))]
fn pid_alive_os(_pid: u32) -> bool {
    // No cheap liveness probe: treat the holder as alive.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // Above the largest pid_max Linux allows.
    const DEAD_PID: u32 = 999_999_999;

    #[test]
    fn acquire_writes_pid_and_release_removes() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("tmerge.lock"));

        let handle = mgr.acquire().unwrap();
        let recorded = fs::read_to_string(mgr.path()).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());
        assert_eq!(mgr.holder(), Some(std::process::id()));

        handle.release();
        assert!(!mgr.path().exists());
        assert_eq!(mgr.holder(), None);
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("tmerge.lock"));
        {
            let _handle = mgr.acquire().unwrap();
            assert!(mgr.path().exists());
        }
        assert!(!mgr.path().exists());
    }

    #[test]
    fn live_holder_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("tmerge.lock"));
        let _held = mgr.acquire().unwrap();

        match mgr.acquire().unwrap_err() {
            MergeError::LockBusy { pid, lock_path } => {
                assert_eq!(pid, std::process::id());
                assert_eq!(lock_path, mgr.path());
            }
            other => panic!("expected LockBusy, got {other:?}"),
        }
    }

    #[test]
    fn dead_holder_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("tmerge.lock"));
        fs::write(mgr.path(), format!("{DEAD_PID}\n")).unwrap();

        let handle = mgr.acquire().unwrap();
        assert_eq!(mgr.holder(), Some(std::process::id()));
        drop(handle);
    }

    #[test]
    fn unparsable_record_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("tmerge.lock"));

        // Empty is what another acquirer's record looks like before its PID
        // lands.
        for contents in ["", "not a pid"] {
            fs::write(mgr.path(), contents).unwrap();
            match mgr.acquire().unwrap_err() {
                MergeError::LockBusy { pid, .. } => assert_eq!(pid, 0),
                other => panic!("expected LockBusy, got {other:?}"),
            }
            assert_eq!(fs::read_to_string(mgr.path()).unwrap(), contents);
        }
    }

    #[test]
    fn unheld_record_naming_this_process_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("tmerge.lock"));
        fs::write(mgr.path(), format!("{}\n", std::process::id())).unwrap();

        let handle = mgr.acquire().unwrap();
        assert!(matches!(mgr.acquire(), Err(MergeError::LockBusy { .. })));
        drop(handle);
        assert!(!mgr.path().exists());
    }

    #[test]
    fn handle_leaves_replacement_record_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("tmerge.lock"));
        let handle = mgr.acquire().unwrap();

        // Someone removed our record and another process took the path.
        fs::remove_file(mgr.path()).unwrap();
        fs::write(mgr.path(), "1\n").unwrap();
        drop(handle);
        assert_eq!(fs::read_to_string(mgr.path()).unwrap(), "1\n");
    }

    /// Race `threads` acquirers for `rounds` rounds, each round starting from
    /// `seed` or no record. Returns the most holders seen at once and the
    /// number of successful acquisitions.
    fn race(seed: Option<&str>, threads: usize, rounds: usize) -> (usize, usize) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Barrier};

        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("tmerge.lock"));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let wins = Arc::new(AtomicUsize::new(0));

        for _ in 0..rounds {
            if let Some(contents) = seed {
                fs::write(mgr.path(), contents).unwrap();
            }
            let barrier = Arc::new(Barrier::new(threads));
            let workers: Vec<_> = (0..threads)
                .map(|_| {
                    let (mgr, barrier) = (mgr.clone(), Arc::clone(&barrier));
                    let (active, peak, wins) =
                        (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&wins));
                    std::thread::spawn(move || {
                        barrier.wait();
                        if let Ok(handle) = mgr.acquire() {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            wins.fetch_add(1, Ordering::SeqCst);
                            std::thread::yield_now();
                            active.fetch_sub(1, Ordering::SeqCst);
                            drop(handle);
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
            assert!(!mgr.path().exists(), "record left behind");
        }
        (peak.load(Ordering::SeqCst), wins.load(Ordering::SeqCst))
    }

    #[test]
    fn racing_acquirers_on_fresh_path_hold_one_at_a_time() {
        let (peak, wins) = race(None, 8, 200);
        assert_eq!(peak, 1);
        assert!(wins >= 200, "only {wins} acquisitions");
    }

    #[test]
    fn racing_acquirers_over_dead_record_hold_one_at_a_time() {
        let (peak, wins) = race(Some("999999999\n"), 8, 200);
        assert_eq!(peak, 1);
        assert!(wins >= 200, "only {wins} acquisitions");
    }

    #[test]
    fn creates_missing_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LockManager::new(dir.path().join("run").join("tmerge.lock"));
        assert!(mgr.acquire().is_ok());
    }

    #[test]
    fn liveness_probe() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(0));
        assert!(!pid_alive(DEAD_PID));
    }

    #[test]
    fn release_if_held_leaves_foreign_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmerge.lock");
        fs::write(&path, "1\n").unwrap();
        release_if_held(&path);
        assert!(path.exists());

        let mgr = LockManager::new(&path);
        fs::remove_file(&path).unwrap();
        let handle = mgr.acquire().unwrap();
        release_if_held(&path);
        assert!(!path.exists());
        drop(handle);
    }

    #[test]
    fn release_path_tolerates_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        release_path(&dir.path().join("absent.lock"));
    }
}
