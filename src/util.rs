//! Small shared helpers.

/// Current time as an ISO-8601 UTC string.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub const MAX_DESCRIPTION_LEN: usize = 10_000;
