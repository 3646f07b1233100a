// Timeframe helpers
// Exchange-style interval strings such as "5m", "1h", "4h", "1d"

/// Duration of a timeframe string in milliseconds, or `None` if the string
/// is not a recognised interval.
pub fn timeframe_millis(timeframe: &str) -> Option<i64> {
    let unit = timeframe.chars().last()?;
    let count: i64 = timeframe[..timeframe.len() - unit.len_utf8()].parse().ok()?;
    if count <= 0 {
        return None;
    }

    let unit_ms = match unit {
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 604_800_000,
        _ => return None,
    };

    Some(count * unit_ms)
}

pub fn is_known_timeframe(timeframe: &str) -> bool {
    timeframe_millis(timeframe).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_millis() {
        assert_eq!(timeframe_millis("5m"), Some(300_000));
        assert_eq!(timeframe_millis("1h"), Some(3_600_000));
        assert_eq!(timeframe_millis("4h"), Some(14_400_000));
        assert_eq!(timeframe_millis("1d"), Some(86_400_000));
    }

    #[test]
    fn test_unknown_timeframes() {
        assert_eq!(timeframe_millis(""), None);
        assert_eq!(timeframe_millis("h"), None);
        assert_eq!(timeframe_millis("0h"), None);
        assert_eq!(timeframe_millis("3y"), None);
        assert!(!is_known_timeframe("fast"));
    }
}
