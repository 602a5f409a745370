//! Content fingerprints for template regions.
//!
//! The digest covers every non-blank line of a template body with trailing
//! whitespace trimmed. The generated timestamp line is removed by
//! [`crate::document::Document::parse`] before a body gets here, so two
//! merges of the same template compare equal even though they were written
//! at different times.

use std::fmt;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a normalized template body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Lowercase hex form (64 chars).
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(64);
        for b in &self.0 {
            use fmt::Write as _;
            let _ = write!(hex, "{b:02x}");
        }
        hex
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Fingerprint a template body.
///
/// Returns `None` when the body has no non-blank line, so an empty template
/// never matches a real digest.
#[must_use]
pub fn fingerprint_body(body: &str) -> Option<Fingerprint> {
    let mut hasher = Sha256::new();
    let mut seen = false;

    for line in body.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        if seen {
            hasher.update(b"\n");
        }
        hasher.update(line.as_bytes());
        seen = true;
    }

    seen.then(|| Fingerprint(hasher.finalize().into()))
}
