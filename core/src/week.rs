//! Calendar identity of a plan week.
//!
//! A week is named by a token (`this`, `next`, `YYYY-MM-DD` or `YYYY-Www`) and resolves
//! to its Monday plus the ISO-8601 (year, week) pair. ISO years differ from calendar
//! years around New Year: 2024-12-30 is the Monday of 2025-W01.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Local, NaiveDate, Weekday};
use serde::Serialize;

use crate::error::{DietError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekToken {
    This,
    Next,
    Date(NaiveDate),
    Iso { year: i32, week: u32 },
}

impl FromStr for WeekToken {
    type Err = DietError;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        let invalid = || DietError::InvalidWeekToken(s.to_string());

        if token.eq_ignore_ascii_case("this") {
            return Ok(Self::This);
        }
        if token.eq_ignore_ascii_case("next") {
            return Ok(Self::Next);
        }

        let upper = token.to_ascii_uppercase();
        if let Some((year, week)) = upper.split_once("-W") {
            let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
            if year.len() != 4 || week.is_empty() || week.len() > 2 || !digits(year) || !digits(week) {
                return Err(invalid());
            }
            let year: i32 = year.parse().map_err(|_| invalid())?;
            let week: u32 = week.parse().map_err(|_| invalid())?;
            // Rejects week 0 and W53 in 52-week years.
            monday_of_iso_week(year, week).ok_or_else(invalid)?;
            return Ok(Self::Iso { year, week });
        }

        if token.len() != 10 || !token.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
            return Err(invalid());
        }
        NaiveDate::parse_from_str(token, "%Y-%m-%d")
            .map(Self::Date)
            .map_err(|_| invalid())
    }
}

/// `this` or `next`; the granularity the week cache is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekType {
    This,
    Next,
}

impl WeekType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WeekType::This => "this",
            WeekType::Next => "next",
        }
    }

    /// Which relative week `monday` is, seen from `today`, if either.
    #[must_use]
    pub fn classify(monday: NaiveDate, today: NaiveDate) -> Option<WeekType> {
        let this = monday_of(today);
        if monday == this {
            Some(WeekType::This)
        } else if Some(monday) == this.checked_add_days(Days::new(7)) {
            Some(WeekType::Next)
        } else {
            None
        }
    }
}

impl fmt::Display for WeekType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WeekType {
    type Err = DietError;

    fn from_str(s: &str) -> Result<Self> {
        match s.parse::<WeekToken>()? {
            WeekToken::This => Ok(WeekType::This),
            WeekToken::Next => Ok(WeekType::Next),
            _ => Err(DietError::InvalidWeekToken(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekInfo {
    pub week_start_date: NaiveDate,
    pub week_year: i32,
    pub week_number: u32,
}

impl WeekInfo {
    /// Monday through Sunday.
    #[must_use]
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.week_start_date.iter_days().take(7).collect()
    }

    #[must_use]
    pub fn iso_token(&self) -> String {
        format!("{}-W{:02}", self.week_year, self.week_number)
    }
}

#[must_use]
pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

#[must_use]
pub fn this_monday() -> NaiveDate {
    monday_of(Local::now().date_naive())
}

#[must_use]
pub fn monday_of_iso_week(year: i32, week: u32) -> Option<NaiveDate> {
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
}

/// ISO identity of the week containing `date`.
#[must_use]
pub fn week_info(date: NaiveDate) -> WeekInfo {
    let iso = date.iso_week();
    WeekInfo {
        week_start_date: monday_of(date),
        week_year: iso.year(),
        week_number: iso.week(),
    }
}

pub fn resolve(token: WeekToken, today: NaiveDate) -> Result<WeekInfo> {
    let monday = match token {
        WeekToken::This => monday_of(today),
        WeekToken::Next => monday_of(today)
            .checked_add_days(Days::new(7))
            .ok_or_else(|| DietError::InvalidWeekToken("next".to_string()))?,
        WeekToken::Date(date) => monday_of(date),
        WeekToken::Iso { year, week } => monday_of_iso_week(year, week)
            .ok_or_else(|| DietError::InvalidWeekToken(format!("{year}-W{week:02}")))?,
    };
    Ok(week_info(monday))
}

/// Parse and resolve a token against the local calendar.
pub fn resolve_token(token: &str) -> Result<WeekInfo> {
    resolve(token.parse()?, Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_relative_tokens() {
        assert_eq!("this".parse::<WeekToken>().unwrap(), WeekToken::This);
        assert_eq!(" Next ".parse::<WeekToken>().unwrap(), WeekToken::Next);
    }

    #[test]
    fn test_parse_iso_token() {
        assert_eq!(
            "2025-W01".parse::<WeekToken>().unwrap(),
            WeekToken::Iso { year: 2025, week: 1 }
        );
        assert_eq!(
            "2020-w53".parse::<WeekToken>().unwrap(),
            WeekToken::Iso { year: 2020, week: 53 }
        );
    }

    #[test]
    fn test_parse_rejects_impossible_weeks() {
        assert!("2025-W00".parse::<WeekToken>().is_err());
        // 2025 has 52 ISO weeks
        assert!("2025-W53".parse::<WeekToken>().is_err());
        assert!("2025-W100".parse::<WeekToken>().is_err());
        assert!("25-W10".parse::<WeekToken>().is_err());
        assert!("2025-Wxx".parse::<WeekToken>().is_err());
        assert!("2025-W+1".parse::<WeekToken>().is_err());
        assert!("+025-W01".parse::<WeekToken>().is_err());
        assert!("+025-01-06".parse::<WeekToken>().is_err());
    }

    #[test]
    fn test_parse_date_token() {
        assert_eq!(
            "2025-01-06".parse::<WeekToken>().unwrap(),
            WeekToken::Date(date(2025, 1, 6))
        );
        assert!("2025-02-30".parse::<WeekToken>().is_err());
        assert!("2025-1-6".parse::<WeekToken>().is_err());
        assert!("last".parse::<WeekToken>().is_err());
        assert!("".parse::<WeekToken>().is_err());
    }

    #[test]
    fn test_invalid_token_error_kind() {
        let err = "someday".parse::<WeekToken>().unwrap_err();
        assert!(matches!(err, DietError::InvalidWeekToken(ref t) if t == "someday"));
    }

    #[test]
    fn test_week_info_year_boundary() {
        // Monday 2024-12-30 belongs to ISO week 1 of 2025
        let info = week_info(date(2024, 12, 30));
        assert_eq!(info.week_year, 2025);
        assert_eq!(info.week_number, 1);
        // Friday 2021-01-01 is still in 2020-W53
        let info = week_info(date(2021, 1, 1));
        assert_eq!(info.week_year, 2020);
        assert_eq!(info.week_number, 53);
        assert_eq!(info.week_start_date, date(2020, 12, 28));
    }

    #[test]
    fn test_week_info_sunday_belongs_to_previous_monday() {
        let info = week_info(date(2025, 1, 12));
        assert_eq!(info.week_start_date, date(2025, 1, 6));
        assert_eq!(info.week_number, 2);
    }

    #[test]
    fn test_iso_roundtrip_all_weeks() {
        for year in [2019, 2020, 2024, 2025, 2026, 2032] {
            for week in 1..=53 {
                let Some(monday) = monday_of_iso_week(year, week) else {
                    continue;
                };
                assert_eq!(monday.weekday(), Weekday::Mon);
                let info = week_info(monday);
                assert_eq!(info.iso_token(), format!("{year}-W{week:02}"));
            }
        }
    }

    #[test]
    fn test_this_monday_matches_today() {
        let today = Local::now().date_naive();
        let info = week_info(this_monday());
        let iso = today.iso_week();
        assert_eq!(info.week_year, iso.year());
        assert_eq!(info.week_number, iso.week());
    }

    #[test]
    fn test_resolve_relative_weeks() {
        let today = date(2025, 1, 8);
        let this = resolve(WeekToken::This, today).unwrap();
        assert_eq!(this.week_start_date, date(2025, 1, 6));
        let next = resolve(WeekToken::Next, today).unwrap();
        assert_eq!(next.week_start_date, date(2025, 1, 13));
        assert_eq!(next.week_number, 3);
    }

    #[test]
    fn test_resolve_snaps_date_to_monday() {
        let info = resolve(WeekToken::Date(date(2025, 1, 9)), date(2025, 1, 1)).unwrap();
        assert_eq!(info.week_start_date, date(2025, 1, 6));
    }

    #[test]
    fn test_resolve_iso_2025_w01() {
        let info = resolve(WeekToken::Iso { year: 2025, week: 1 }, date(2030, 1, 1)).unwrap();
        assert_eq!(info.week_start_date, date(2024, 12, 30));
        assert_eq!(info.iso_token(), "2025-W01");
    }

    #[test]
    fn test_dates_cover_monday_to_sunday() {
        let info = week_info(date(2025, 1, 6));
        let dates = info.dates();
        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], date(2025, 1, 6));
        assert_eq!(dates[6], date(2025, 1, 12));
    }

    #[test]
    fn test_week_type_classify() {
        let today = date(2025, 1, 8);
        assert_eq!(WeekType::classify(date(2025, 1, 6), today), Some(WeekType::This));
        assert_eq!(WeekType::classify(date(2025, 1, 13), today), Some(WeekType::Next));
        assert_eq!(WeekType::classify(date(2025, 1, 20), today), None);
    }

    #[test]
    fn test_week_type_parse() {
        assert_eq!("this".parse::<WeekType>().unwrap(), WeekType::This);
        assert_eq!("NEXT".parse::<WeekType>().unwrap(), WeekType::Next);
        assert!("2025-W01".parse::<WeekType>().is_err());
    }
}
