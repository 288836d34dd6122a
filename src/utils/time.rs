use chrono::{DateTime, Utc};

use crate::{EsflowError, Result};

#[allow(unused)]
pub fn time_millis() -> i64 {
    let time: DateTime<chrono::Utc> = Utc::now();
    time.timestamp_millis()
}

/// parse an RFC 3339 timestamp (e.g. a GCE creationTimestamp) to epoch millis
pub fn parse_millis(ts: &str) -> Result<i64> {
    let time = DateTime::parse_from_rfc3339(ts).map_err(|e| EsflowError::Convert(format!("invalid timestamp {ts}: {e}")))?;
    Ok(time.timestamp_millis())
}

#[cfg(test)]
mod test {
    use super::parse_millis;

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("1970-01-01T00:00:01Z").unwrap(), 1000);
        assert_eq!(parse_millis("2020-06-01T12:30:00.500-07:00").unwrap(), 1591039800500);
        assert!(parse_millis("not a timestamp").is_err());
    }
}
