//! Feature-gated failpoint injection.
//!
//! Compile with `--features failpoints` to enable injection. Without the
//! feature, the `fp!()` macro expands to `Ok(())`.
//!
//! Injection points used by the merge pipeline:
//!
//! | Name | Where |
//! |------|-------|
//! | `FP_SNAPSHOT` | before the target is copied to a backup |
//! | `FP_STAGE_WRITE` | before the temp file is created |
//! | `FP_BEFORE_COMMIT` | after validation, before the rename |

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

/// Actions a failpoint can take when triggered.
#[derive(Clone, Debug)]
pub enum FailpointAction {
    /// No-op (default).
    Off,
    /// Return an I/O error with the given message.
    Error(String),
    /// Return an I/O error once, then switch off.
    ErrorOnce(String),
    /// Panic with the given message.
    Panic(String),
}

/// Thread-safe global registry of active failpoints.
static REGISTRY: LazyLock<Mutex<HashMap<&'static str, FailpointAction>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Set a failpoint action.
pub fn set(name: &'static str, action: FailpointAction) {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name, action);
}

/// Clear a specific failpoint.
pub fn clear(name: &'static str) {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(name);
}

/// Clear all failpoints.
pub fn clear_all() {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

/// Check if a failpoint is set and execute its action.
///
/// # Errors
/// Returns an [`std::io::Error`] when the failpoint is set to `Error`.
///
/// # Panics
/// Panics when the failpoint is set to `Panic`.
pub fn check(name: &str) -> std::io::Result<()> {
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    match registry.get(name) {
        None | Some(FailpointAction::Off) => Ok(()),
        Some(FailpointAction::Error(msg)) => {
            Err(std::io::Error::other(format!("failpoint {name}: {msg}")))
        }
        Some(FailpointAction::ErrorOnce(msg)) => {
            let err = std::io::Error::other(format!("failpoint {name}: {msg}"));
            registry.remove(name);
            Err(err)
        }
        Some(FailpointAction::Panic(msg)) => {
            let msg = format!("failpoint {name}: {msg}");
            drop(registry);
            panic!("{msg}")
        }
    }
}

/// Failpoint injection point.
///
/// With `failpoints` feature: checks the registry and may return `Err` or panic.
/// Without `failpoints` feature: compiles to `Ok(())`.
///
/// Usage: `fp!("FP_BEFORE_COMMIT").map_err(...)?;`
#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        $crate::failpoints::check($name)
    };
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        Ok::<(), std::io::Error>(())
    };
}
