// Credvault: Wall-clock timestamps
//
// All timestamps are timezone-naive UTC instants with microsecond precision.
// They are persisted as fixed-width text so lexical order equals time order.

use chrono::{NaiveDateTime, SubsecRound, Utc};

const TEXT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Current UTC wall-clock time, truncated to what the store can hold.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}

pub fn to_text(ts: &NaiveDateTime) -> String {
    ts.format(TEXT_FORMAT).to_string()
}

pub fn from_text(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, TEXT_FORMAT)
}
