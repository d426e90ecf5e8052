use chrono::{DateTime, Utc};

/// Current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds since epoch, as carried on the wire
pub fn now_ms() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1000.0
}

/// Convert a milliseconds timestamp to `DateTime<Utc>`
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Convert `DateTime<Utc>` to a milliseconds timestamp
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_roundtrip() {
        let now = now();
        let millis = to_millis(now);
        let converted = from_millis(millis).unwrap();
        assert!((now.timestamp_millis() - converted.timestamp_millis()).abs() < 2);
    }

    #[test]
    fn now_ms_is_recent() {
        let ms = now_ms();
        // Some time after 2023-01-01 and before 2100
        assert!(ms > 1.6e12);
        assert!(ms < 4.1e12);
    }
}
