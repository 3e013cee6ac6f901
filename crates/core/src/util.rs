use std::time::{SystemTime, UNIX_EPOCH};

use ulid::Ulid;

/// Returns current unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Generates a new entity id (ULID string).
pub fn new_id() -> String {
    Ulid::new().to_string()
}
