use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// Date format used in the report tables, e.g. "January 3, 2024"
const REPORT_DATE_FORMAT: &str = "%B %d, %Y";

/// Anything that carries the calendar date it is ordered by.
pub trait Dated {
  fn date(&self) -> NaiveDate;
}

/// A single row of the mass shootings report table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassShootingRecord {
  pub incident_id: u64,
  /// Calendar date in the archive's reporting timezone
  pub incident_date: NaiveDate,
  pub state: String,
  pub city_county: String,
  pub address: String,
  pub killed: u32,
  pub injured: u32,
  pub incident_url: String,
  pub source_url: String,
}

impl Dated for MassShootingRecord {
  fn date(&self) -> NaiveDate {
    self.incident_date
  }
}

/// Parse a report date such as "January 3, 2024".
pub fn parse_date(text: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(text.trim(), REPORT_DATE_FORMAT)
    .map_err(|e| eyre!("Failed to parse date '{}': {}", text.trim(), e))
}

/// The calendar date of `now` in the given timezone.
pub fn today_at<Z: TimeZone>(now: DateTime<Utc>, tz: &Z) -> NaiveDate {
  now.with_timezone(tz).date_naive()
}

/// Midnight of `date` in the given timezone, as a UTC instant.
pub fn start_of_day<Z: TimeZone>(date: NaiveDate, tz: &Z) -> DateTime<Utc> {
  let midnight = date.and_time(NaiveTime::MIN);

  // When midnight falls in a DST gap the day starts an hour later
  tz.from_local_datetime(&midnight)
    .earliest()
    .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
    .map(|start| start.with_timezone(&Utc))
    .unwrap_or_else(|| midnight.and_utc())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::FixedOffset;
  use chrono_tz::America::New_York;

  #[test]
  fn test_parse_report_date() {
    let date = parse_date("January 3, 2024").unwrap();
    assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());

    let date = parse_date(" December 25, 2023 ").unwrap();
    assert_eq!(date, NaiveDate::from_ymd_opt(2023, 12, 25).unwrap());
  }

  #[test]
  fn test_parse_invalid_date() {
    assert!(parse_date("2024-01-03").is_err());
    assert!(parse_date("").is_err());
  }

  #[test]
  fn test_today_uses_timezone() {
    // 03:00 UTC is still the previous evening in New York
    let now = Utc.with_ymd_and_hms(2024, 1, 4, 3, 0, 0).unwrap();
    assert_eq!(
      today_at(now, &New_York),
      NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
    );
  }

  #[test]
  fn test_today_during_daylight_saving() {
    // 00:30 EDT on July 4th
    let now = Utc.with_ymd_and_hms(2024, 7, 4, 4, 30, 0).unwrap();
    assert_eq!(
      today_at(now, &New_York),
      NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()
    );
  }

  #[test]
  fn test_start_of_day() {
    let winter = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
    assert_eq!(
      start_of_day(winter, &New_York),
      Utc.with_ymd_and_hms(2024, 1, 3, 5, 0, 0).unwrap()
    );

    let summer = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
    assert_eq!(
      start_of_day(summer, &New_York),
      Utc.with_ymd_and_hms(2024, 7, 4, 4, 0, 0).unwrap()
    );
  }

  #[test]
  fn test_start_of_day_fixed_offset() {
    let tz = FixedOffset::east_opt(2 * 3600).unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
    assert_eq!(
      start_of_day(date, &tz),
      Utc.with_ymd_and_hms(2024, 1, 2, 22, 0, 0).unwrap()
    );
  }

  #[test]
  fn test_start_of_day_in_midnight_gap() {
    // Santiago springs forward at midnight: 2024-09-08 00:00 does not exist
    let date = NaiveDate::from_ymd_opt(2024, 9, 8).unwrap();
    assert_eq!(
      start_of_day(date, &chrono_tz::America::Santiago),
      Utc.with_ymd_and_hms(2024, 9, 8, 4, 0, 0).unwrap()
    );
  }
}
