//! Date parsing: RFC 2616 for signed request dates, `YYYY-MM-DD[ hh:mm:ss]`
//! for human input on the admin side.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Parse an HTTP request date.
///
/// Accepts RFC 2822/2616 (`Tue, 27 Mar 2007 19:36:42 +0000`), the common
/// GMT-suffixed variant, and the ISO-basic form some clients send in
/// `x-amz-date` (`20070327T193642Z`).
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%a, %d %b %Y %H:%M:%S GMT") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%SZ") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    None
}

/// Format a timestamp the way S3 response headers expect it.
pub fn http_date(t: &DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Format a timestamp for XML bodies (`2007-03-27T19:36:42.000Z`).
pub fn xml_time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parse an admin-supplied date: `YYYY-MM-DD` with an optional
/// ` hh:mm:ss` suffix. Returns the UTC timestamp.
pub fn parse_admin_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Epoch seconds for an admin date, for usage-range queries.
pub fn parse_admin_epoch(s: &str) -> Option<u64> {
    parse_admin_date(s).map(|t| t.timestamp().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_rfc2822() {
        let t = parse_http_date("Tue, 27 Mar 2007 19:36:42 +0000").unwrap();
        assert_eq!(t.timestamp(), 1175024202);
    }

    #[test]
    fn test_parse_gmt_suffix() {
        let t = parse_http_date("Tue, 27 Mar 2007 19:36:42 GMT").unwrap();
        assert_eq!(t.timestamp(), 1175024202);
    }

    #[test]
    fn test_parse_iso_basic() {
        let t = parse_http_date("20070327T193642Z").unwrap();
        assert_eq!(t.timestamp(), 1175024202);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_http_date("not a date").is_none());
        assert!(parse_http_date("").is_none());
    }

    #[test]
    fn test_http_date_round_trip() {
        let t = Utc.with_ymd_and_hms(2007, 3, 27, 19, 36, 42).unwrap();
        assert_eq!(http_date(&t), "Tue, 27 Mar 2007 19:36:42 GMT");
        assert_eq!(parse_http_date(&http_date(&t)).unwrap(), t);
    }

    #[test]
    fn test_admin_date_day_only() {
        let t = parse_admin_date("2011-05-03").unwrap();
        assert_eq!(t.hour(), 0);
        assert_eq!(t.format("%Y-%m-%d").to_string(), "2011-05-03");
    }

    #[test]
    fn test_admin_date_with_time() {
        let t = parse_admin_date("2011-05-03 14:30:09").unwrap();
        assert_eq!(t.hour(), 14);
        assert_eq!(t.minute(), 30);
    }

    #[test]
    fn test_admin_date_rejects_bad_input() {
        assert!(parse_admin_date("05/03/2011").is_none());
        assert!(parse_admin_date("2011-13-01").is_none());
    }
}
