//! Merge state machine.
//!
//! # Lifecycle
//!
//! ```text
//! Start → Validated → Normalized → Compared → BackedUp → Assembled → Committed → Cleaned
//!                          │           │
//!                          │           └→ NoOpDone   (fingerprints equal)
//!                          └→ Committed              (target absent: plain copy)
//! ```
//!
//! `Aborted` can be entered from any non-terminal phase. The tracker is held
//! in memory for one invocation; the phase history is reported back to the
//! caller.

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// MergePhase
// ---------------------------------------------------------------------------

/// The current phase of a merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    /// Inputs not yet inspected.
    Start,
    /// Source and target passed integrity and self-merge checks.
    Validated,
    /// Source stripped of any prior merge output.
    Normalized,
    /// Fingerprints of target and source computed.
    Compared,
    /// Fingerprints matched; nothing to do.
    NoOpDone,
    /// Target snapshotted (or backups disabled).
    BackedUp,
    /// Merged document staged in a temp file.
    Assembled,
    /// Temp file validated and renamed over the target.
    Committed,
    /// Backup discarded and old backups pruned.
    Cleaned,
    /// Merge failed; target left as it was (or restored).
    Aborted,
}

impl MergePhase {
    /// Returns `true` for `NoOpDone`, `Cleaned` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::NoOpDone | Self::Cleaned | Self::Aborted)
    }

    /// Phases reachable from this one (excluding `Aborted`).
    #[must_use]
    pub const fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Start => &[Self::Validated],
            Self::Validated => &[Self::Normalized],
            Self::Normalized => &[Self::Compared, Self::Committed],
            Self::Compared => &[Self::NoOpDone, Self::BackedUp],
            Self::BackedUp => &[Self::Assembled],
            Self::Assembled => &[Self::Committed],
            Self::Committed => &[Self::Cleaned],
            Self::NoOpDone | Self::Cleaned | Self::Aborted => &[],
        }
    }

    /// Whether `next` is a legal successor.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if next == Self::Aborted {
            return !self.is_terminal();
        }
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Validated => "validated",
            Self::Normalized => "normalized",
            Self::Compared => "compared",
            Self::NoOpDone => "no-op",
            Self::BackedUp => "backed-up",
            Self::Assembled => "assembled",
            Self::Committed => "committed",
            Self::Cleaned => "cleaned",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// MergeState
// ---------------------------------------------------------------------------

/// Tracks the phase of one merge and the path it took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeState {
    phase: MergePhase,
    history: Vec<MergePhase>,
}

impl Default for MergeState {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeState {
    /// A fresh merge in `Start`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: MergePhase::Start,
            history: vec![MergePhase::Start],
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> MergePhase {
        self.phase
    }

    /// Every phase visited, in order.
    #[must_use]
    pub fn history(&self) -> &[MergePhase] {
        &self.history
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// [`InvalidTransition`] if `next` is not a legal successor.
    pub fn advance(&mut self, next: MergePhase) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to `Aborted` unless already terminal.
    pub fn abort(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = MergePhase::Aborted;
            self.history.push(MergePhase::Aborted);
        }
    }
}

/// An illegal phase transition (a bug in the engine, not a user error).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    /// The current phase.
    pub from: MergePhase,
    /// The attempted target phase.
    pub to: MergePhase,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid merge phase transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
