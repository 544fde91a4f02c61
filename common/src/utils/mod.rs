pub mod config;

/// Millisecond count of a duration, saturating instead of wrapping.
pub fn duration_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
