//! Date helpers for the date operators, window ranges and densify

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Default `$dateToString` format
pub const DEFAULT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%LZ";

/// Calendar and clock units accepted by date arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl TimeUnit {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "year" => Some(TimeUnit::Year),
            "quarter" => Some(TimeUnit::Quarter),
            "month" => Some(TimeUnit::Month),
            "week" => Some(TimeUnit::Week),
            "day" => Some(TimeUnit::Day),
            "hour" => Some(TimeUnit::Hour),
            "minute" => Some(TimeUnit::Minute),
            "second" => Some(TimeUnit::Second),
            "millisecond" => Some(TimeUnit::Millisecond),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Year => "year",
            TimeUnit::Quarter => "quarter",
            TimeUnit::Month => "month",
            TimeUnit::Week => "week",
            TimeUnit::Day => "day",
            TimeUnit::Hour => "hour",
            TimeUnit::Minute => "minute",
            TimeUnit::Second => "second",
            TimeUnit::Millisecond => "millisecond",
        }
    }

    /// Length in milliseconds for fixed-length units, `None` for calendar units
    pub fn fixed_millis(&self) -> Option<i64> {
        match self {
            TimeUnit::Week => Some(7 * 86_400_000),
            TimeUnit::Day => Some(86_400_000),
            TimeUnit::Hour => Some(3_600_000),
            TimeUnit::Minute => Some(60_000),
            TimeUnit::Second => Some(1_000),
            TimeUnit::Millisecond => Some(1),
            TimeUnit::Year | TimeUnit::Quarter | TimeUnit::Month => None,
        }
    }
}

/// Adds `amount` units to `date`. Month arithmetic clamps to the last day
/// of the target month. Returns `None` on overflow.
pub fn add_units(date: DateTime<Utc>, unit: TimeUnit, amount: i64) -> Option<DateTime<Utc>> {
    let months = match unit {
        TimeUnit::Year => amount.checked_mul(12)?,
        TimeUnit::Quarter => amount.checked_mul(3)?,
        TimeUnit::Month => amount,
        _ => {
            let millis = amount.checked_mul(unit.fixed_millis()?)?;
            return date.checked_add_signed(Duration::milliseconds(millis));
        }
    };
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        date.checked_add_months(magnitude)
    } else {
        date.checked_sub_months(magnitude)
    }
}

/// Number of `unit` boundaries crossed between `start` and `end`.
///
/// Weeks start on Sunday.
pub fn date_diff(start: DateTime<Utc>, end: DateTime<Utc>, unit: TimeUnit) -> i64 {
    let month_index = |d: &DateTime<Utc>| d.year() as i64 * 12 + d.month0() as i64;
    match unit {
        TimeUnit::Year => end.year() as i64 - start.year() as i64,
        TimeUnit::Quarter => {
            let q = |d: &DateTime<Utc>| d.year() as i64 * 4 + d.month0() as i64 / 3;
            q(&end) - q(&start)
        }
        TimeUnit::Month => month_index(&end) - month_index(&start),
        TimeUnit::Week => {
            let week_start = |d: &DateTime<Utc>| {
                d.date_naive() - Duration::days(d.weekday().num_days_from_sunday() as i64)
            };
            (week_start(&end) - week_start(&start)).num_days() / 7
        }
        TimeUnit::Day => (end.date_naive() - start.date_naive()).num_days(),
        _ => {
            // fixed_millis is always Some for the remaining units
            let unit_ms = unit.fixed_millis().unwrap_or(1);
            end.timestamp_millis().div_euclid(unit_ms) - start.timestamp_millis().div_euclid(unit_ms)
        }
    }
}

/// Converts a date format string to chrono's dialect (`%L` is milliseconds)
fn to_chrono_format(format: &str) -> String {
    format.replace("%L", "%3f")
}

/// Parses `input` with an explicit format, or with the common ISO layouts
/// when `format` is `None`.
pub fn parse_date(input: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    match format {
        Some(fmt) => parse_with_format(input, &to_chrono_format(fmt)),
        None => {
            if let Ok(d) = DateTime::parse_from_rfc3339(input) {
                return Some(d.with_timezone(&Utc));
            }
            [
                "%Y-%m-%dT%H:%M:%S%.f",
                "%Y-%m-%d %H:%M:%S%.f",
                "%Y-%m-%dT%H:%M:%S%.fZ",
                "%Y-%m-%d",
            ]
            .iter()
            .find_map(|fmt| parse_with_format(input, fmt))
        }
    }
}

fn parse_with_format(input: &str, fmt: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, fmt) {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(input, fmt) {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    DateTime::parse_from_str(input, fmt)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Formats `date` with a `$dateToString` format string
pub fn format_date(date: DateTime<Utc>, format: &str) -> String {
    date.format(&to_chrono_format(format)).to_string()
}

/// Calendar parts exposed by `$year`, `$month` and friends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    DayOfMonth,
    DayOfWeek,
    DayOfYear,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    pub fn extract(&self, date: DateTime<Utc>) -> i64 {
        match self {
            DatePart::Year => date.year() as i64,
            DatePart::Month => date.month() as i64,
            DatePart::DayOfMonth => date.day() as i64,
            // 1 = Sunday
            DatePart::DayOfWeek => date.weekday().num_days_from_sunday() as i64 + 1,
            DatePart::DayOfYear => date.ordinal() as i64,
            DatePart::Hour => date.hour() as i64,
            DatePart::Minute => date.minute() as i64,
            DatePart::Second => date.second() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_date_only_format() {
        assert_eq!(parse_date("2021-03-15", Some("%Y-%m-%d")), Some(ymd(2021, 3, 15)));
        assert_eq!(parse_date("2021-03-15", None), Some(ymd(2021, 3, 15)));
        assert_eq!(parse_date("not a date", Some("%Y-%m-%d")), None);
    }

    #[test]
    fn test_format_with_milliseconds() {
        let d = Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_date(d, DEFAULT_FORMAT), "2021-01-02T03:04:05.000Z");
        assert_eq!(format_date(d, "%Y-%m"), "2021-01");
    }

    #[test]
    fn test_add_month_clamps_to_month_end() {
        assert_eq!(add_units(ymd(2021, 1, 31), TimeUnit::Month, 1), Some(ymd(2021, 2, 28)));
        assert_eq!(add_units(ymd(2021, 3, 1), TimeUnit::Month, -2), Some(ymd(2021, 1, 1)));
        assert_eq!(add_units(ymd(2021, 3, 1), TimeUnit::Day, 7), Some(ymd(2021, 3, 8)));
    }

    #[test]
    fn test_date_diff_counts_boundaries() {
        let a = Utc.with_ymd_and_hms(2021, 1, 1, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 1, 2, 1, 0, 0).unwrap();
        assert_eq!(date_diff(a, b, TimeUnit::Day), 1);
        assert_eq!(date_diff(ymd(2020, 12, 31), ymd(2021, 1, 1), TimeUnit::Year), 1);
        assert_eq!(date_diff(ymd(2021, 1, 15), ymd(2021, 3, 1), TimeUnit::Month), 2);
        assert_eq!(date_diff(a, b, TimeUnit::Hour), 2);
    }

    #[test]
    fn test_date_parts() {
        // 2021-03-14 was a Sunday
        let d = ymd(2021, 3, 14);
        assert_eq!(DatePart::DayOfWeek.extract(d), 1);
        assert_eq!(DatePart::Month.extract(d), 3);
        assert_eq!(DatePart::DayOfYear.extract(d), 73);
    }
}
