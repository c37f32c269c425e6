use std::time::{SystemTime, UNIX_EPOCH};

// Fast path: returns 0 on a pre-epoch clock instead of double error handling
#[inline]
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
