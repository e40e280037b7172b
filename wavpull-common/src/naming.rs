//! Capture file naming
//!
//! Recorders upload captures as `<seq>_<YYYY>-<MM>-<DD>_<HH>_<MM>_<SS>.wav`.
//! Collected files are stored locally as
//! `<prefix>_<seq>-<DD>_<MM>_<YYYY>-<HH>_<MM>_<SS>.wav`.
//!
//! Matching is purely structural: the date and time fields are carried over
//! verbatim and never checked against a calendar.

use std::sync::LazyLock;

use regex::Regex;

/// Pattern every remote capture name must match exactly
pub const NAME_PATTERN: &str = r"^(\d+)_(\d{4})-(\d{2})-(\d{2})_(\d{2})_(\d{2})_(\d{2})\.wav$";

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NAME_PATTERN).expect("capture name pattern is valid"));

/// A remote capture filename split into its fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureName {
    /// Recorder sequence number (any number of digits)
    pub sequence: String,
    pub year: String,
    pub month: String,
    pub day: String,
    pub hour: String,
    pub minute: String,
    pub second: String,
}

/// Parse a remote filename
///
/// Returns `None` unless the whole name matches [`NAME_PATTERN`]. The match
/// is anchored and case-sensitive, so `1_2024-01-01_00_00_00.WAV` or a name
/// with a leading path component is rejected.
pub fn parse_capture_name(name: &str) -> Option<CaptureName> {
    let caps = NAME_REGEX.captures(name)?;
    let field = |i: usize| caps[i].to_string();
    Some(CaptureName {
        sequence: field(1),
        year: field(2),
        month: field(3),
        day: field(4),
        hour: field(5),
        minute: field(6),
        second: field(7),
    })
}

impl CaptureName {
    /// Build the local filename for this capture
    ///
    /// The date is written day first (`<DD>_<MM>_<YYYY>`). Consumers of the
    /// local store rely on this layout.
    #[must_use]
    pub fn normalize(&self, prefix: &str) -> String {
        format!(
            "{}_{}-{}_{}_{}-{}_{}_{}.wav",
            prefix,
            self.sequence,
            self.day,
            self.month,
            self.year,
            self.hour,
            self.minute,
            self.second
        )
    }
}
