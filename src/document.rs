//! Parsed document model.
//!
//! A document is split by a single literal marker line into a user-owned
//! *custom region* (everything before the marker) and a generated *template
//! region* (the timestamp line plus the template body after it).
//!
//! ```text
//! # notes                      ┐
//! keep me                      │ custom
//!                              ┘ (separator)
//! <!-- BEGIN MANAGED ... -->     marker
//! # Auto-updated: <ts>           timestamp
//!                                (separator)
//! rule A                       ┐
//! rule B                       ┘ template
//! ```
//!
//! [`Document::parse`] and [`Document::render`] are inverse on the custom
//! region and the template body: the separators are produced by `render` and
//! consumed by `parse`, so re-rendering a parsed document never grows it.

use chrono::{DateTime, Utc};

use crate::fingerprint::{self, Fingerprint};

/// The structural marker separating the custom region from the template region.
pub const MARKER: &str = "<!-- BEGIN MANAGED TEMPLATE: content below is replaced on merge -->";

/// Distinguishing fragment of [`MARKER`]. Any line containing it that is not
/// an exact marker line is treated as a corrupted marker.
pub const MARKER_PREFIX: &str = "BEGIN MANAGED TEMPLATE";

/// Prefix of the generated timestamp line that follows the marker.
pub const TIMESTAMP_PREFIX: &str = "# Auto-updated:";

/// A document split into its custom and template regions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    /// Everything before the marker (or the whole text when no marker).
    pub custom: String,
    /// Whether the marker line was found.
    pub marker_present: bool,
    /// The generated timestamp line, if one follows the marker.
    pub timestamp: Option<String>,
    /// Template body after the timestamp line.
    pub template: String,
}

impl Document {
    /// Parse text into regions, splitting on the first exact marker line.
    ///
    /// Integrity (duplicate or partial markers) is not checked here; run
    /// [`crate::integrity::check`] first when the input is untrusted.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let Some((before, after)) = split_at_marker(text) else {
            return Self {
                custom: text.to_owned(),
                ..Self::default()
            };
        };

        let custom = before.strip_suffix("\n\n").map_or_else(
            || before.to_owned(),
            |trimmed| format!("{trimmed}\n"),
        );

        let (timestamp, rest) = match after.split_once('\n') {
            Some((first, rest)) if first.trim_end().starts_with(TIMESTAMP_PREFIX) => {
                (Some(first.trim_end().to_owned()), rest)
            }
            None if after.trim_end().starts_with(TIMESTAMP_PREFIX) => {
                (Some(after.trim_end().to_owned()), "")
            }
            _ => (None, after),
        };

        let template = if timestamp.is_some() {
            rest.strip_prefix("\r\n")
                .or_else(|| rest.strip_prefix('\n'))
                .unwrap_or(rest)
        } else {
            rest
        };

        Self {
            custom,
            marker_present: true,
            timestamp,
            template: template.to_owned(),
        }
    }

    /// Build a managed document from a custom region and a template body.
    #[must_use]
    pub fn assemble(custom: &str, template: &str, now: DateTime<Utc>) -> Self {
        Self {
            custom: custom.to_owned(),
            marker_present: true,
            timestamp: Some(timestamp_line(now)),
            template: template.to_owned(),
        }
    }

    /// Serialize back to text.
    #[must_use]
    pub fn render(&self) -> String {
        if !self.marker_present {
            return self.custom.clone();
        }

        let mut out = String::with_capacity(
            self.custom.len() + MARKER.len() + self.template.len() + 64,
        );
        if !self.custom.is_empty() {
            out.push_str(&self.custom);
            if !self.custom.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str(MARKER);
        out.push('\n');
        if let Some(ts) = &self.timestamp {
            out.push_str(ts);
            out.push_str("\n\n");
        }
        out.push_str(&self.template);
        out
    }

    /// Digest of the template region, or `None` when there is none.
    #[must_use]
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        if !self.marker_present {
            return None;
        }
        fingerprint::fingerprint_body(&self.template)
    }
}

/// Strip a prior merge out of a candidate source.
///
/// Without a marker the text is returned unchanged. With one, only the
/// custom region survives: the marker, timestamp and template body of the
/// earlier merge are dropped so they cannot nest inside the next merge.
#[must_use]
pub fn normalize(text: &str) -> String {
    let doc = Document::parse(text);
    if doc.marker_present {
        doc.custom
    } else {
        text.to_owned()
    }
}

/// Render the generated timestamp line for `now`.
#[must_use]
pub fn timestamp_line(now: DateTime<Utc>) -> String {
    format!("{TIMESTAMP_PREFIX} {}", now.format("%Y-%m-%d %H:%M:%S UTC"))
}

/// Split `text` around the first line that equals [`MARKER`].
///
/// Returns the text before the marker line and the text after its line
/// terminator.
fn split_at_marker(text: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches('\n').trim_end_matches('\r');
        if content == MARKER {
            return Some((&text[..offset], &text[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}
