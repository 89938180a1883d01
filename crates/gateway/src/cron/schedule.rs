//! Timezone-aware 5-field cron evaluator (min hour dom month dow).
//!
//! Expressions are parsed once into a [`CronExpr`]; malformed input is a
//! parse error at job-creation time rather than a silent never-fires.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

use sb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldPart {
    Any,
    Step(u32),
    Exact(u32),
    Range(u32, u32),
}

#[derive(Debug, Clone)]
struct Field {
    parts: Vec<FieldPart>,
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        self.parts.iter().any(|p| match p {
            FieldPart::Any => true,
            FieldPart::Step(n) => value % n == 0,
            FieldPart::Exact(n) => value == *n,
            FieldPart::Range(lo, hi) => value >= *lo && value <= *hi,
        })
    }
}

fn parse_field(raw: &str, min: u32, max: u32) -> Result<Field> {
    let mut parts = Vec::new();
    for piece in raw.split(',') {
        let part = if piece == "*" {
            FieldPart::Any
        } else if let Some(step) = piece.strip_prefix("*/") {
            let n: u32 = step
                .parse()
                .map_err(|_| Error::parse("schedule", format!("bad step '{piece}'")))?;
            if n == 0 {
                return Err(Error::parse("schedule", "step of zero"));
            }
            FieldPart::Step(n)
        } else if let Some((lo, hi)) = piece.split_once('-') {
            let lo: u32 = lo
                .parse()
                .map_err(|_| Error::parse("schedule", format!("bad range '{piece}'")))?;
            let hi: u32 = hi
                .parse()
                .map_err(|_| Error::parse("schedule", format!("bad range '{piece}'")))?;
            if lo > hi || hi > max {
                return Err(Error::parse("schedule", format!("range '{piece}' out of bounds")));
            }
            FieldPart::Range(lo, hi)
        } else {
            let n: u32 = piece
                .parse()
                .map_err(|_| Error::parse("schedule", format!("bad value '{piece}'")))?;
            if n < min || n > max {
                return Err(Error::parse(
                    "schedule",
                    format!("value {n} outside {min}..={max}"),
                ));
            }
            FieldPart::Exact(n)
        };
        parts.push(part);
    }
    if parts.is_empty() {
        return Err(Error::parse("schedule", "empty field"));
    }
    Ok(Field { parts })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Expression
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpr {
    /// Parse a 5-field expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::parse(
                "schedule",
                format!("expected 5 fields, got {}", fields.len()),
            ));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Whether a local naive datetime matches.
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day_of_month.matches(dt.day())
            && self.month.matches(dt.month())
            && self
                .day_of_week
                .matches(dt.weekday().num_days_from_sunday())
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`.
    ///
    /// DST handling: local times inside a spring-forward gap are skipped;
    /// fall-back overlaps take the earliest mapping.
    pub fn next_after(&self, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
        use chrono::TimeZone;

        let local_after = after.with_timezone(&tz).naive_local();
        let to_next_minute = 60 - i64::from(local_after.second());
        let mut candidate = local_after + chrono::Duration::seconds(to_next_minute);
        candidate = candidate.with_second(0).unwrap_or(candidate);

        let max_checks = 366 * 24 * 60; // one year of minutes
        for _ in 0..max_checks {
            if self.matches(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc));
                    }
                    chrono::LocalResult::None => {
                        // DST gap: this local minute does not exist.
                    }
                }
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

/// Parse a timezone name, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parse_rejects_malformed_expressions() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("a * * * *").is_err());
        assert!(CronExpr::parse("5-2 * * * *").is_err());
    }

    #[test]
    fn every_five_minutes() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        assert!(expr.matches(&at(2026, 6, 15, 10, 0).naive_utc()));
        assert!(expr.matches(&at(2026, 6, 15, 10, 25).naive_utc()));
        assert!(!expr.matches(&at(2026, 6, 15, 10, 3).naive_utc()));
    }

    #[test]
    fn specific_time_and_ranges() {
        let expr = CronExpr::parse("30 9 * * *").unwrap();
        assert!(expr.matches(&at(2026, 6, 15, 9, 30).naive_utc()));
        assert!(!expr.matches(&at(2026, 6, 15, 10, 30).naive_utc()));

        let expr = CronExpr::parse("0 9-17 * * *").unwrap();
        assert!(expr.matches(&at(2026, 6, 15, 10, 0).naive_utc()));
        assert!(!expr.matches(&at(2026, 6, 15, 20, 0).naive_utc()));
    }

    #[test]
    fn comma_separated_values() {
        let expr = CronExpr::parse("0,15,30,45 * * * *").unwrap();
        assert!(expr.matches(&at(2026, 6, 15, 10, 15).naive_utc()));
        assert!(!expr.matches(&at(2026, 6, 15, 10, 20).naive_utc()));
    }

    #[test]
    fn weekday_field_uses_sunday_zero() {
        // 2026-06-14 is a Sunday.
        let expr = CronExpr::parse("0 0 * * 0").unwrap();
        assert!(expr.matches(&at(2026, 6, 14, 0, 0).naive_utc()));
        assert!(!expr.matches(&at(2026, 6, 15, 0, 0).naive_utc()));
    }

    #[test]
    fn next_after_finds_upcoming_minute() {
        let expr = CronExpr::parse("30 * * * *").unwrap();
        let next = expr
            .next_after(&at(2026, 6, 15, 10, 0), chrono_tz::UTC)
            .unwrap();
        assert_eq!(next, at(2026, 6, 15, 10, 30));
    }

    #[test]
    fn next_after_is_strictly_after() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let next = expr
            .next_after(&at(2026, 6, 15, 10, 0), chrono_tz::UTC)
            .unwrap();
        assert_eq!(next, at(2026, 6, 15, 11, 0));
    }

    #[test]
    fn next_after_respects_timezone() {
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        let tz = parse_tz("US/Eastern");
        let next = expr.next_after(&at(2026, 6, 15, 12, 0), tz).unwrap();
        // 9:00 EDT = 13:00 UTC.
        assert_eq!(next, at(2026, 6, 15, 13, 0));
    }

    #[test]
    fn spring_forward_gap_is_skipped() {
        // US DST 2026 starts Mar 8; 02:30 local does not exist that day.
        let expr = CronExpr::parse("30 2 * * *").unwrap();
        let tz = parse_tz("US/Eastern");
        let next = expr.next_after(&at(2026, 3, 8, 6, 0), tz).unwrap();
        assert_eq!(next, at(2026, 3, 9, 6, 30)); // next day, 02:30 EDT
    }

    #[test]
    fn parse_tz_falls_back_to_utc() {
        assert_eq!(parse_tz("Not/Real"), chrono_tz::UTC);
        assert_eq!(parse_tz("Europe/London"), chrono_tz::Europe::London);
    }
}
