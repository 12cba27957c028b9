//! Database query modules.

pub mod jobs;
pub mod segments;
pub mod sessions;

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp for storage.
///
/// Fixed-width UTC with millisecond precision so that lexical comparison in
/// SQL matches chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
