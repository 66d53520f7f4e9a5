//! Parses the authored-date text the reviews panel renders next to each review.
//!
//! The panel shows either a calendar date or a coarse relative phrase
//! ("3 weeks ago", "2 個月前"). Relative phrases resolve against the scrape
//! time; anything else yields `None`.

use chrono::{DateTime, Duration, Months, NaiveDate, TimeZone as _, Utc};

const EDITED_PREFIXES: &[&str] = &["Edited", "edited", "已編輯", "編輯於", "已编辑"];

const ABSOLUTE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日", "%Y.%m.%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

pub fn parse_authored(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut text = text.trim();
    for prefix in EDITED_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start_matches([':', '：', ' ']).trim();
        }
    }
    if text.is_empty() {
        return None;
    }

    parse_absolute(text).or_else(|| parse_relative(text, now))
}

fn parse_absolute(text: &str) -> Option<DateTime<Utc>> {
    ABSOLUTE_FORMATS.iter().find_map(|format| {
        let date = NaiveDate::parse_from_str(text, format).ok()?;
        let midnight = date.and_hms_opt(0, 0, 0)?;
        Some(Utc.from_utc_datetime(&midnight))
    })
}

fn parse_relative(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_lowercase();
    if lower == "just now" || lower == "剛剛" {
        return Some(now);
    }

    let (amount, unit) = parse_english(&lower).or_else(|| parse_cjk(text))?;
    subtract(now, amount, unit)
}

fn parse_english(text: &str) -> Option<(u32, Unit)> {
    let rest = text.strip_suffix("ago")?.trim();
    let (amount, unit) = rest.split_once(' ')?;
    let amount = match amount {
        "a" | "an" | "one" => 1,
        digits => digits.parse().ok()?,
    };
    let unit = match unit.trim().trim_end_matches('s') {
        "minute" | "min" => Unit::Minute,
        "hour" => Unit::Hour,
        "day" => Unit::Day,
        "week" => Unit::Week,
        "month" => Unit::Month,
        "year" => Unit::Year,
        _ => return None,
    };
    Some((amount, unit))
}

fn parse_cjk(text: &str) -> Option<(u32, Unit)> {
    let rest = text.strip_suffix('前')?.trim();
    let split = rest
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit() && *ch != '一')
        .map(|(idx, _)| idx)?;
    let (amount, unit) = rest.split_at(split);
    let amount = match amount.trim() {
        "一" => 1,
        digits => digits.parse().ok()?,
    };
    let unit = match unit.trim() {
        "分鐘" | "分钟" => Unit::Minute,
        "小時" | "小时" => Unit::Hour,
        "天" | "日" => Unit::Day,
        "週" | "周" | "星期" => Unit::Week,
        "個月" | "个月" | "月" => Unit::Month,
        "年" => Unit::Year,
        _ => return None,
    };
    Some((amount, unit))
}

fn subtract(now: DateTime<Utc>, amount: u32, unit: Unit) -> Option<DateTime<Utc>> {
    let amount_i64 = i64::from(amount);
    match unit {
        Unit::Minute => now.checked_sub_signed(Duration::minutes(amount_i64)),
        Unit::Hour => now.checked_sub_signed(Duration::hours(amount_i64)),
        Unit::Day => now.checked_sub_signed(Duration::days(amount_i64)),
        Unit::Week => now.checked_sub_signed(Duration::weeks(amount_i64)),
        Unit::Month => now.checked_sub_months(Months::new(amount)),
        Unit::Year => now.checked_sub_months(Months::new(amount.checked_mul(12)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn absolute_dates() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(parse_authored("2024-01-10", now()), Some(expected));
        assert_eq!(parse_authored("2024/01/10", now()), Some(expected));
        assert_eq!(parse_authored("2024年1月10日", now()), Some(expected));
    }

    #[test]
    fn english_relative() {
        assert_eq!(
            parse_authored("3 weeks ago", now()),
            Some(now() - Duration::weeks(3))
        );
        assert_eq!(
            parse_authored("a month ago", now()),
            Some(Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_authored("Edited 2 years ago", now()),
            Some(Utc.with_ymd_and_hms(2022, 6, 15, 12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_authored("an hour ago", now()),
            Some(now() - Duration::hours(1))
        );
    }

    #[test]
    fn chinese_relative() {
        assert_eq!(
            parse_authored("5 天前", now()),
            Some(now() - Duration::days(5))
        );
        assert_eq!(
            parse_authored("2 週前", now()),
            Some(now() - Duration::weeks(2))
        );
        assert_eq!(
            parse_authored("已編輯：1 個月前", now()),
            Some(Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_authored("一年前", now()),
            Some(Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn unparseable_is_none() {
        assert_eq!(parse_authored("", now()), None);
        assert_eq!(parse_authored("sometime last spring", now()), None);
        assert_eq!(parse_authored("幾天前", now()), None);
    }
}
