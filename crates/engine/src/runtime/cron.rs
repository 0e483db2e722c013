//! Cron expression evaluator (UTC).
//!
//! Accepts the classic 5-field form (`min hour dom month dow`) and the
//! seconds-prefixed 6-field form (`sec min hour dom month dow`).
//! Fields support `*`, `*/n`, ranges `a-b`, and comma lists.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use sw_domain::error::{Error, Result};

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    sec: String,
    min: String,
    hour: String,
    dom: String,
    month: String,
    dow: String,
}

impl CronExpr {
    /// Parse and validate an expression. 5-field forms get an implicit
    /// `0` seconds field.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let (sec, rest): (&str, &[&str]) = match fields.len() {
            5 => ("0", &fields[..]),
            6 => (fields[0], &fields[1..]),
            n => {
                return Err(Error::ConfigInvalid(format!(
                    "cron expression '{expr}' has {n} fields, expected 5 or 6"
                )));
            }
        };

        let bounds = [
            (sec, 0u32, 59u32, "seconds"),
            (rest[0], 0, 59, "minutes"),
            (rest[1], 0, 23, "hours"),
            (rest[2], 1, 31, "day-of-month"),
            (rest[3], 1, 12, "month"),
            (rest[4], 0, 6, "day-of-week"),
        ];
        for (field, lo, hi, name) in bounds {
            validate_field(field, lo, hi)
                .map_err(|e| Error::ConfigInvalid(format!("cron '{expr}' {name}: {e}")))?;
        }

        Ok(Self {
            sec: sec.to_owned(),
            min: rest[0].to_owned(),
            hour: rest[1].to_owned(),
            dom: rest[2].to_owned(),
            month: rest[3].to_owned(),
            dow: rest[4].to_owned(),
        })
    }

    /// Whether this expression matches the given instant (UTC, second
    /// resolution).
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minute_matches(dt) && field_matches(&self.sec, dt.second())
    }

    fn minute_matches(&self, dt: &DateTime<Utc>) -> bool {
        field_matches(&self.min, dt.minute())
            && field_matches(&self.hour, dt.hour())
            && field_matches(&self.dom, dt.day())
            && field_matches(&self.month, dt.month())
            && field_matches(&self.dow, dt.weekday().num_days_from_sunday())
    }

    /// Next occurrence strictly after `after`. Walks minute candidates
    /// (bounded to one year) and picks the first matching second inside
    /// a matching minute, so second-resolution schedules stay cheap.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = (*after + Duration::seconds(1))
            .with_nanosecond(0)
            .unwrap_or(*after);

        let mut minute_cursor = start;
        let max_minutes = 366 * 24 * 60;
        for i in 0..max_minutes {
            if self.minute_matches(&minute_cursor) {
                // Inside the first candidate minute, seconds start at the
                // cursor; later minutes scan from zero.
                let from_sec = if i == 0 { minute_cursor.second() } else { 0 };
                for s in from_sec..60 {
                    if field_matches(&self.sec, s) {
                        return minute_cursor.with_second(s);
                    }
                }
            }
            minute_cursor = (minute_cursor + Duration::minutes(1))
                .with_second(0)
                .unwrap_or(minute_cursor);
        }
        None
    }
}

/// Validate and return whether a cron expression parses.
pub fn validate(expr: &str) -> Result<()> {
    CronExpr::parse(expr).map(|_| ())
}

/// Convenience: next occurrence for a raw expression.
pub fn next_after(expr: &str, after: &DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(CronExpr::parse(expr)?.next_after(after))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field matching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn validate_field(field: &str, lo: u32, hi: u32) -> std::result::Result<(), String> {
    if field == "*" {
        return Ok(());
    }
    if let Some(step) = field.strip_prefix("*/") {
        return match step.parse::<u32>() {
            Ok(n) if n > 0 => Ok(()),
            _ => Err(format!("bad step '{field}'")),
        };
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start = start_s
                .parse::<u32>()
                .map_err(|_| format!("bad range start '{part}'"))?;
            let end = end_s
                .parse::<u32>()
                .map_err(|_| format!("bad range end '{part}'"))?;
            if start > end || start < lo || end > hi {
                return Err(format!("range '{part}' outside {lo}-{hi}"));
            }
        } else {
            let n = part
                .parse::<u32>()
                .map_err(|_| format!("bad value '{part}'"))?;
            if n < lo || n > hi {
                return Err(format!("value '{part}' outside {lo}-{hi}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn five_field_every_5_minutes() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        assert!(expr.matches(&at(2024, 6, 15, 10, 0, 0)));
        assert!(!expr.matches(&at(2024, 6, 15, 10, 3, 0)));
        // Implicit seconds field: only second zero matches.
        assert!(!expr.matches(&at(2024, 6, 15, 10, 5, 30)));
    }

    #[test]
    fn six_field_every_second() {
        let expr = CronExpr::parse("* * * * * *").unwrap();
        assert!(expr.matches(&at(2024, 6, 15, 10, 3, 17)));
    }

    #[test]
    fn six_field_every_10_seconds() {
        let expr = CronExpr::parse("*/10 * * * * *").unwrap();
        assert!(expr.matches(&at(2024, 6, 15, 10, 3, 20)));
        assert!(!expr.matches(&at(2024, 6, 15, 10, 3, 25)));
    }

    #[test]
    fn specific_time() {
        let expr = CronExpr::parse("30 9 * * *").unwrap();
        assert!(expr.matches(&at(2024, 6, 15, 9, 30, 0)));
        assert!(!expr.matches(&at(2024, 6, 15, 10, 30, 0)));
    }

    #[test]
    fn ranges_and_lists() {
        let expr = CronExpr::parse("0 9-17 * * *").unwrap();
        assert!(expr.matches(&at(2024, 6, 15, 10, 0, 0)));
        assert!(!expr.matches(&at(2024, 6, 15, 20, 0, 0)));

        let expr = CronExpr::parse("0,15,30,45 * * * *").unwrap();
        assert!(expr.matches(&at(2024, 6, 15, 10, 15, 0)));
        assert!(!expr.matches(&at(2024, 6, 15, 10, 20, 0)));
    }

    #[test]
    fn weekday_field() {
        // 2024-06-16 is a Sunday (dow 0).
        let expr = CronExpr::parse("0 12 * * 0").unwrap();
        assert!(expr.matches(&at(2024, 6, 16, 12, 0, 0)));
        assert!(!expr.matches(&at(2024, 6, 17, 12, 0, 0)));
    }

    #[test]
    fn next_after_minute_schedule() {
        let next = next_after("30 * * * *", &at(2024, 6, 15, 10, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, at(2024, 6, 15, 10, 30, 0));
    }

    #[test]
    fn next_after_is_strictly_after() {
        // Sitting exactly on a match must move to the next window.
        let next = next_after("0 * * * *", &at(2024, 6, 15, 10, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, at(2024, 6, 15, 11, 0, 0));
    }

    #[test]
    fn next_after_seconds_schedule() {
        let next = next_after("*/1 * * * * *", &at(2024, 6, 15, 10, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, at(2024, 6, 15, 10, 0, 1));

        let next = next_after("*/15 * * * * *", &at(2024, 6, 15, 10, 0, 46))
            .unwrap()
            .unwrap();
        assert_eq!(next, at(2024, 6, 15, 10, 1, 0));
    }

    #[test]
    fn next_after_daily_schedule_crosses_midnight() {
        let next = next_after("0 9 * * *", &at(2024, 6, 15, 10, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, at(2024, 6, 16, 9, 0, 0));
    }

    #[test]
    fn successive_next_calls_walk_forward() {
        let mut cursor = at(2024, 6, 15, 0, 0, 0);
        let expr = CronExpr::parse("0 */2 * * *").unwrap();
        let mut hits = Vec::new();
        for _ in 0..3 {
            cursor = expr.next_after(&cursor).unwrap();
            hits.push(cursor);
        }
        assert_eq!(hits[0], at(2024, 6, 15, 2, 0, 0));
        assert_eq!(hits[1], at(2024, 6, 15, 4, 0, 0));
        assert_eq!(hits[2], at(2024, 6, 15, 6, 0, 0));
    }

    #[test]
    fn invalid_expressions_rejected() {
        assert!(validate("* * *").is_err());
        assert!(validate("* * * * * * *").is_err());
        assert!(validate("61 * * * *").is_err());
        assert!(validate("* 25 * * *").is_err());
        assert!(validate("*/0 * * * *").is_err());
        assert!(validate("5-2 * * * *").is_err());
        assert!(validate("banana * * * *").is_err());
    }

    #[test]
    fn valid_expressions_accepted() {
        for expr in [
            "* * * * *",
            "*/5 * * * *",
            "0 9 * * 1-5",
            "*/30 * * * * *",
            "0 0 1 1 *",
            "0,30 9,18 * * *",
        ] {
            assert!(validate(expr).is_ok(), "{expr} should parse");
        }
    }
}
