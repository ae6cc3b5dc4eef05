use chrono::{DateTime, Utc};

/// IMF-fixdate, the form used by `If-Modified-Since` and `Last-Modified`.
pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date header. Servers send RFC 2822 style dates with a
/// `GMT` zone; RFC 3339 is accepted too since some feeds echo it back.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_http_date() {
        let date = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(format_http_date(&date), "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap());
    }

    #[test]
    fn test_parse_rfc3339() {
        let parsed = parse_http_date("2015-10-21T07:28:00Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap());
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_http_date("yesterday").is_none());
        assert!(parse_http_date("").is_none());
    }
}
