//! Window boundaries for incoming readings.
//!
//! The processor never does calendar arithmetic. This resolver sits in front
//! of it and attaches the half-hour, hour, day and month windows that contain
//! a reading, computed on the wall clock of the configured time zone.

use crate::core::{EventTimeParser, RawReading, WindowBounds, WindowSet};
use crate::source::InputReading;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike};

/// Errors computing window boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    InvalidTime(String),
    Boundary(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::InvalidTime(e) => write!(f, "Invalid time: {e}"),
            ResolveError::Boundary(e) => write!(f, "Boundary error: {e}"),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Attaches window boundaries to readings.
#[derive(Debug, Clone, Default)]
pub struct WindowResolver {
    parser: EventTimeParser,
}

impl WindowResolver {
    pub fn new(parser: EventTimeParser) -> Self {
        Self { parser }
    }

    /// Turn an input line into a reading the processor accepts.
    pub fn resolve(&self, input: InputReading) -> Result<RawReading, ResolveError> {
        let instant = self
            .parser
            .parse(&input.time)
            .map_err(|e| ResolveError::InvalidTime(e.to_string()))?;
        let windows = self.windows_at(instant)?;

        Ok(RawReading {
            feed_id: input.feed_id,
            code: input.code,
            value: input.value,
            time: input.time,
            windows,
        })
    }

    /// Windows of every granularity containing `instant`.
    ///
    /// Half-hour and hour windows are floored on the wall clock of the offset
    /// in force at `instant`, so a reading in the repeated hour of a DST fold
    /// gets the occurrence it belongs to. Day and month boundaries come from
    /// the zone's calendar.
    pub fn windows_at(&self, instant: DateTime<FixedOffset>) -> Result<WindowSet, ResolveError> {
        let zoned = instant
            .with_timezone(&self.parser.timezone())
            .fixed_offset();
        let offset = *zoned.offset();
        let local = zoned.naive_local();
        let date = local.date();

        let half_minute = if local.minute() < 30 { 0 } else { 30 };
        let half_start = in_offset(at(date, local.hour(), half_minute)?, offset)?;
        let hour_start = in_offset(at(date, local.hour(), 0)?, offset)?;
        let day_start = at(date, 0, 0)?;
        let next_day = date
            .succ_opt()
            .ok_or_else(|| ResolveError::Boundary(format!("no day after {date}")))?;

        let month_first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .ok_or_else(|| ResolveError::Boundary(format!("no first of month for {date}")))?;
        let (next_year, next_month) = if date.month() == 12 {
            (date.year() + 1, 1)
        } else {
            (date.year(), date.month() + 1)
        };
        let next_month_first = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .ok_or_else(|| ResolveError::Boundary(format!("no month after {date}")))?;

        Ok(WindowSet {
            half_hour: self.stepped(half_start, Duration::minutes(30)),
            hour: self.stepped(hour_start, Duration::hours(1)),
            day: self.bounds(day_start, at(next_day, 0, 0)?)?,
            month: self.bounds(at(month_first, 0, 0)?, at(next_month_first, 0, 0)?)?,
        })
    }

    /// A window of fixed length from `start`, both ends in the zone's offset.
    fn stepped(&self, start: DateTime<FixedOffset>, length: Duration) -> WindowBounds {
        let tz = self.parser.timezone();
        WindowBounds::new(
            start.with_timezone(&tz).fixed_offset(),
            (start + length).with_timezone(&tz).fixed_offset(),
        )
    }

    fn bounds(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<WindowBounds, ResolveError> {
        Ok(WindowBounds::new(self.localize(start)?, self.localize(end)?))
    }

    /// A boundary inside a DST gap moves to the first instant after the gap.
    fn localize(&self, naive: NaiveDateTime) -> Result<DateTime<FixedOffset>, ResolveError> {
        self.parser
            .localize(naive)
            .or_else(|| self.parser.localize(naive + Duration::hours(1)))
            .ok_or_else(|| {
                ResolveError::Boundary(format!(
                    "{naive} does not exist in {}",
                    self.parser.timezone().name()
                ))
            })
    }
}

fn in_offset(
    naive: NaiveDateTime,
    offset: FixedOffset,
) -> Result<DateTime<FixedOffset>, ResolveError> {
    naive
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| ResolveError::Boundary(format!("{naive} has no instant at {offset}")))
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Result<NaiveDateTime, ResolveError> {
    date.and_hms_opt(hour, minute, 0)
        .ok_or_else(|| ResolveError::Boundary(format!("invalid time {hour}:{minute} on {date}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_TIMESTAMP_FORMAT;

    fn input(time: &str) -> InputReading {
        InputReading {
            feed_id: "F1".to_string(),
            code: "ep".to_string(),
            value: 1.0,
            time: time.to_string(),
        }
    }

    fn keys(set: &WindowSet) -> [String; 4] {
        [
            set.half_hour.bucket_key(),
            set.hour.bucket_key(),
            set.day.bucket_key(),
            set.month.bucket_key(),
        ]
    }

    #[test]
    fn test_windows_in_utc() {
        let resolver = WindowResolver::default();
        let reading = resolver.resolve(input("2024-03-01 00:35:00")).unwrap();

        assert_eq!(
            keys(&reading.windows),
            [
                "2024-03-01 00:30:00+00:00_2024-03-01 01:00:00+00:00".to_string(),
                "2024-03-01 00:00:00+00:00_2024-03-01 01:00:00+00:00".to_string(),
                "2024-03-01 00:00:00+00:00_2024-03-02 00:00:00+00:00".to_string(),
                "2024-03-01 00:00:00+00:00_2024-04-01 00:00:00+00:00".to_string(),
            ]
        );
        assert_eq!(reading.time, "2024-03-01 00:35:00");
    }

    #[test]
    fn test_day_and_hour_windows_differ() {
        let resolver = WindowResolver::default();
        let set = resolver
            .resolve(input("2024-03-01 13:10:00"))
            .unwrap()
            .windows;
        assert_ne!(set.hour, set.day);
        assert_eq!(set.day.end_epoch_secs() - set.day.start_epoch_secs(), 86_400);
    }

    #[test]
    fn test_month_rollover_and_leap_february() {
        let resolver = WindowResolver::default();

        let dec = resolver.resolve(input("2023-12-31 23:59:59")).unwrap();
        assert_eq!(dec.windows.month.end_label(), "2024-01-01 00:00:00");
        assert_eq!(dec.windows.half_hour.end_label(), "2024-01-01 00:00:00");

        let feb = resolver.resolve(input("2024-02-29 12:00:00")).unwrap();
        assert_eq!(
            feb.windows.month.end_epoch_secs() - feb.windows.month.start_epoch_secs(),
            29 * 86_400
        );
    }

    #[test]
    fn test_boundaries_follow_configured_zone() {
        let parser = EventTimeParser::new(
            DEFAULT_TIMESTAMP_FORMAT.to_string(),
            chrono_tz::Asia::Shanghai,
        );
        let resolver = WindowResolver::new(parser);

        // 23:50 UTC is already the next morning in Shanghai.
        let reading = resolver.resolve(input("2024-03-01T23:50:00Z")).unwrap();
        assert_eq!(
            reading.windows.day.bucket_key(),
            "2024-03-02 00:00:00+08:00_2024-03-03 00:00:00+08:00"
        );
        assert_eq!(reading.windows.day.start_epoch_secs(), 1_709_308_800);
    }

    fn new_york() -> WindowResolver {
        WindowResolver::new(EventTimeParser::new(
            DEFAULT_TIMESTAMP_FORMAT.to_string(),
            chrono_tz::America::New_York,
        ))
    }

    fn contains(bounds: &WindowBounds, time: &str) -> bool {
        let t = DateTime::parse_from_rfc3339(time).unwrap().timestamp();
        bounds.start_epoch_secs() <= t && t < bounds.end_epoch_secs()
    }

    #[test]
    fn test_repeated_hour_of_dst_fold_gets_its_own_windows() {
        let resolver = new_york();
        let first_time = "2024-11-03T01:10:00-04:00";
        let second_time = "2024-11-03T01:10:00-05:00";
        let first = resolver.resolve(input(first_time)).unwrap().windows;
        let second = resolver.resolve(input(second_time)).unwrap().windows;

        assert!(contains(&first.half_hour, first_time));
        assert!(contains(&first.hour, first_time));
        assert!(contains(&second.half_hour, second_time));
        assert!(contains(&second.hour, second_time));

        assert_eq!(first.half_hour.start_epoch_secs(), 1_730_610_000);
        assert_eq!(second.half_hour.start_epoch_secs(), 1_730_613_600);
        assert_eq!(second.half_hour.end_epoch_secs(), 1_730_615_400);
        assert_eq!(
            second.half_hour.bucket_key(),
            "2024-11-03 01:00:00-05:00_2024-11-03 01:30:00-05:00"
        );
        assert_ne!(first.half_hour.bucket_key(), second.half_hour.bucket_key());
        assert_ne!(first.hour.bucket_key(), second.hour.bucket_key());

        // The first occurrence's hour ends where the repeat begins.
        assert_eq!(first.hour.end_epoch_secs(), 1_730_613_600);
        assert_eq!(first.hour.end_label(), "2024-11-03 01:00:00");
        assert_eq!(second.hour.end_label(), "2024-11-03 02:00:00");

        assert_eq!(first.day, second.day);
        assert_eq!(first.day.end_epoch_secs() - first.day.start_epoch_secs(), 25 * 3600);
    }

    #[test]
    fn test_windows_across_dst_gap_keep_their_length() {
        let resolver = new_york();
        let set = resolver.resolve(input("2024-03-10 01:45:00")).unwrap().windows;

        assert_eq!(set.half_hour.end_epoch_secs() - set.half_hour.start_epoch_secs(), 1800);
        assert_eq!(set.half_hour.end_label(), "2024-03-10 03:00:00");
        assert_eq!(set.hour.end_epoch_secs() - set.hour.start_epoch_secs(), 3600);
        assert_eq!(set.day.end_epoch_secs() - set.day.start_epoch_secs(), 23 * 3600);
    }

    #[test]
    fn test_bad_time_is_rejected() {
        let resolver = WindowResolver::default();
        assert!(matches!(
            resolver.resolve(input("01/03/2024")),
            Err(ResolveError::InvalidTime(_))
        ));
    }
}
