/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a Snowflake-style i64 for use as resource ID.
///
/// Layout (53 bits, fits in JavaScript's Number.MAX_SAFE_INTEGER):
///   - 41 bits: milliseconds since 2024-01-01 UTC (~69 years)
///   - 12 bits: sequence within the millisecond
///
/// Strictly increasing within a process: ids issued in order sort in order,
/// and a burst of more than 4096 ids in one millisecond borrows from the
/// next one instead of repeating.
///
/// Subscriptions, events and reconciliation runs all draw ids from here.
pub fn snowflake_id() -> i64 {
    use std::sync::atomic::{AtomicI64, Ordering};
    // Custom epoch: 2024-01-01 00:00:00 UTC
    const EPOCH_MS: i64 = 1_704_067_200_000;
    static LAST_ID: AtomicI64 = AtomicI64::new(0);

    let ts = (now_millis() - EPOCH_MS) & 0x1FF_FFFF_FFFF; // 41 bits
    let floor = ts << 12;
    let previous = LAST_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(floor.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    floor.max(previous + 1)
}

/// Format Unix millis as RFC 3339 (UTC) for log lines and event metadata
pub fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| millis.to_string())
}
