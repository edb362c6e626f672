//! ISO-8601 encoding shared by the SQLite tables and the REST client.
//!
//! Every stored timestamp uses the same fixed-width form (UTC, millisecond
//! precision, `Z` suffix) so that text comparison in SQL orders like time.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

pub fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Drops sub-millisecond precision, which the stored form cannot hold.
pub fn to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}
