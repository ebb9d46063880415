use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{
    DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

/// Hour of the local day at which a business day starts.
pub const DEFAULT_BOUNDARY_HOUR: u32 = 5;

const ARGENTINA_OFFSET: FixedOffset = match FixedOffset::west_opt(3 * 3600) {
    Some(offset) => offset,
    None => panic!("UTC-3 is a valid offset"),
};

const FIVE_AM: NaiveTime = match NaiveTime::from_hms_opt(DEFAULT_BOUNDARY_HOUR, 0, 0) {
    Some(t) => t,
    None => panic!("05:00 is a valid time"),
};

/// Returns the business day `instant` belongs to.
///
/// A business day runs from `boundary_hour:00` local time to just before
/// `boundary_hour:00` on the next calendar day, so anything earlier than the
/// boundary is credited to the previous date.
pub fn business_day_of<Z: TimeZone>(
    instant: DateTime<Utc>,
    zone: &Z,
    boundary_hour: u32,
) -> NaiveDate {
    let local = instant.with_timezone(zone).naive_local();
    let date = local.date();
    if local.hour() < boundary_hour {
        // Only NaiveDate::MIN has no predecessor.
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Parses a `YYYY-MM-DD` business day label.
pub fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date {raw:?}, expected YYYY-MM-DD"))
}

/// Time zone a business calendar is kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl Zone {
    /// Accepts `UTC`, a `+HH:MM` / `-HH` offset, or an IANA name such as
    /// `America/Argentina/Buenos_Aires`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("utc") || raw == "Z" {
            return Ok(Self::Fixed(Utc.fix()));
        }
        if let Some(rest) = raw.strip_prefix('+') {
            return parse_offset(rest, 1).map(Self::Fixed);
        }
        if let Some(rest) = raw.strip_prefix('-') {
            return parse_offset(rest, -1).map(Self::Fixed);
        }
        let tz: Tz = raw.parse().map_err(|_| anyhow!("invalid tz: {raw}"))?;
        Ok(Self::Named(tz))
    }
}

fn parse_offset(raw: &str, sign: i32) -> Result<FixedOffset> {
    let (hours, minutes) = match raw.split_once(':') {
        Some((h, m)) => (h, m),
        None => (raw, "0"),
    };
    let hours: i32 = hours.parse().with_context(|| format!("invalid utc offset hours: {raw}"))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("invalid utc offset minutes: {raw}"))?;
    if !(0..60).contains(&minutes) {
        bail!("invalid utc offset minutes: {raw}");
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("utc offset out of range: {raw}"))
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(offset) => write!(f, "{offset}"),
            Self::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

/// Half-open UTC interval covering a run of business days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub created_after: DateTime<Utc>,
    /// `None` means "up to now".
    pub created_before: Option<DateTime<Utc>>,
}

/// A zone plus the local hour at which each business day starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    zone: Zone,
    boundary: NaiveTime,
}

impl BusinessCalendar {
    pub fn new(zone: Zone, boundary_hour: u32) -> Result<Self> {
        let boundary = NaiveTime::from_hms_opt(boundary_hour, 0, 0)
            .ok_or_else(|| anyhow!("day start hour must be 0..=23, got {boundary_hour}"))?;
        Ok(Self { zone, boundary })
    }

    /// UTC-3, business day starting at 05:00.
    pub fn argentina() -> Self {
        Self {
            zone: Zone::Fixed(ARGENTINA_OFFSET),
            boundary: FIVE_AM,
        }
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn boundary_hour(&self) -> u32 {
        self.boundary.hour()
    }

    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        match &self.zone {
            Zone::Fixed(offset) => business_day_of(instant, offset, self.boundary_hour()),
            Zone::Named(tz) => business_day_of(instant, tz, self.boundary_hour()),
        }
    }

    /// First instant of `day`.
    pub fn day_start_utc(&self, day: NaiveDate) -> DateTime<Utc> {
        let local = day.and_time(self.boundary);
        match &self.zone {
            Zone::Fixed(offset) => local_to_utc(offset, local),
            Zone::Named(tz) => local_to_utc(tz, local),
        }
    }

    /// First instant after `day`, i.e. the start of the following business day.
    pub fn day_end_utc(&self, day: NaiveDate) -> Result<DateTime<Utc>> {
        let next = day
            .succ_opt()
            .ok_or_else(|| anyhow!("date out of range: {day}"))?;
        Ok(self.day_start_utc(next))
    }

    /// Open-ended window starting `days_back` business days before the one
    /// containing `now`.
    pub fn window_for_days_back(&self, now: DateTime<Utc>, days_back: u32) -> Result<QueryWindow> {
        let today = self.day_of(now);
        let first_day = today
            .checked_sub_days(Days::new(days_back.into()))
            .ok_or_else(|| anyhow!("days_back out of range: {days_back}"))?;
        Ok(QueryWindow {
            first_day,
            last_day: today,
            created_after: self.day_start_utc(first_day),
            created_before: None,
        })
    }

    /// Window covering `start..=end`, both business days.
    pub fn window_for_range(&self, start: NaiveDate, end: NaiveDate) -> Result<QueryWindow> {
        if end < start {
            bail!("end_date {end} precedes start_date {start}");
        }
        Ok(QueryWindow {
            first_day: start,
            last_day: end,
            created_after: self.day_start_utc(start),
            created_before: Some(self.day_end_utc(end)?),
        })
    }
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::argentina()
    }
}

/// Longest stretch of skipped wall time to walk across; Pacific/Apia dropped
/// all of 2011-12-30.
const MAX_GAP_STEPS: u32 = 26 * 4;

// Walk forward past a DST gap in 15 minute steps; an ambiguous wall time
// resolves to its earlier instant.
fn local_to_utc<Z: TimeZone>(zone: &Z, local: NaiveDateTime) -> DateTime<Utc> {
    (0..=MAX_GAP_STEPS)
        .find_map(|step| {
            let wall = local + TimeDelta::minutes(15 * i64::from(step));
            zone.from_local_datetime(&wall).earliest()
        })
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| {
            // No zone has a gap this long; read the wall time with the offset
            // in force around it.
            let offset = zone.offset_from_utc_datetime(&local).fix();
            Utc.from_utc_datetime(&(local - TimeDelta::seconds(offset.local_minus_utc().into())))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    // About +/- 300 years around the epoch.
    const SPAN_SECS: i64 = 10_000_000_000;

    fn utc(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    fn day(raw: &str) -> NaiveDate {
        parse_day(raw).unwrap()
    }

    fn instant(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs % SPAN_SECS, 0).unwrap()
    }

    #[test]
    fn minute_before_boundary_belongs_to_previous_day() {
        let cal = BusinessCalendar::argentina();
        assert_eq!(cal.day_of(utc("2024-03-10T07:59:00Z")), day("2024-03-09"));
        assert_eq!(cal.day_of(utc("2024-03-10T07:59:59Z")), day("2024-03-09"));
    }

    #[test]
    fn boundary_belongs_to_its_own_day() {
        let cal = BusinessCalendar::argentina();
        assert_eq!(cal.day_of(utc("2024-03-10T08:00:00Z")), day("2024-03-10"));
    }

    #[test]
    fn free_function_matches_calendar() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let t = utc("2024-01-01T02:30:00Z");
        // 23:30 on Dec 31 local.
        assert_eq!(business_day_of(t, &offset, 5), day("2023-12-31"));
        assert_eq!(business_day_of(t, &offset, 0), day("2023-12-31"));
        assert_eq!(BusinessCalendar::argentina().day_of(t), day("2023-12-31"));
    }

    #[test]
    fn midnight_boundary_is_plain_calendar_date() {
        let cal = BusinessCalendar::new(Zone::parse("UTC").unwrap(), 0).unwrap();
        assert_eq!(cal.day_of(utc("2024-02-29T00:00:00Z")), day("2024-02-29"));
        assert_eq!(cal.day_of(utc("2024-02-28T23:59:59Z")), day("2024-02-28"));
    }

    #[test]
    fn day_start_and_end_in_utc() {
        let cal = BusinessCalendar::argentina();
        assert_eq!(cal.day_start_utc(day("2024-03-10")), utc("2024-03-10T08:00:00Z"));
        assert_eq!(cal.day_end_utc(day("2024-03-10")).unwrap(), utc("2024-03-11T08:00:00Z"));
    }

    #[test]
    fn days_back_window_before_boundary_counts_from_yesterday() {
        let cal = BusinessCalendar::argentina();
        // 03:00 local on Mar 10 is still the Mar 9 business day.
        let w = cal.window_for_days_back(utc("2024-03-10T06:00:00Z"), 2).unwrap();
        assert_eq!(w.first_day, day("2024-03-07"));
        assert_eq!(w.last_day, day("2024-03-09"));
        assert_eq!(w.created_after, utc("2024-03-07T08:00:00Z"));
        assert_eq!(w.created_before, None);
    }

    #[test]
    fn range_window_is_half_open() {
        let cal = BusinessCalendar::argentina();
        let w = cal.window_for_range(day("2024-02-28"), day("2024-02-29")).unwrap();
        assert_eq!(w.created_after, utc("2024-02-28T08:00:00Z"));
        assert_eq!(w.created_before, Some(utc("2024-03-01T08:00:00Z")));
    }

    #[test]
    fn reversed_range_is_rejected() {
        let cal = BusinessCalendar::argentina();
        let err = cal.window_for_range(day("2024-03-02"), day("2024-03-01")).unwrap_err();
        assert!(err.to_string().contains("precedes"));
    }

    #[test]
    fn parse_day_rejects_garbage() {
        assert!(parse_day("2024-13-01").is_err());
        assert!(parse_day("10/03/2024").is_err());
        assert_eq!(parse_day(" 2024-03-10 ").unwrap(), day("2024-03-10"));
    }

    #[test]
    fn zone_parsing() {
        assert_eq!(Zone::parse("-03:00").unwrap(), Zone::Fixed(ARGENTINA_OFFSET));
        assert_eq!(Zone::parse("-3").unwrap(), Zone::Fixed(ARGENTINA_OFFSET));
        assert_eq!(
            Zone::parse("+05:30").unwrap(),
            Zone::Fixed(FixedOffset::east_opt(5 * 3600 + 1800).unwrap())
        );
        assert_eq!(
            Zone::parse("America/Argentina/Buenos_Aires").unwrap(),
            Zone::Named(chrono_tz::America::Argentina::Buenos_Aires)
        );
        assert!(Zone::parse("Mars/Olympus").is_err());
        assert!(Zone::parse("-03:75").is_err());
    }

    #[test]
    fn boundary_hour_is_validated() {
        assert!(BusinessCalendar::new(Zone::Fixed(ARGENTINA_OFFSET), 24).is_err());
        assert_eq!(
            BusinessCalendar::new(Zone::Fixed(ARGENTINA_OFFSET), 5).unwrap(),
            BusinessCalendar::argentina()
        );
    }

    #[test]
    fn named_zone_honors_dst() {
        // New York springs forward on 2024-03-10; 05:00 EDT is 09:00Z.
        let cal = BusinessCalendar::new(Zone::parse("America/New_York").unwrap(), 5).unwrap();
        assert_eq!(cal.day_start_utc(day("2024-03-09")), utc("2024-03-09T10:00:00Z"));
        assert_eq!(cal.day_start_utc(day("2024-03-10")), utc("2024-03-10T09:00:00Z"));
        assert_eq!(cal.day_of(utc("2024-03-10T08:59:59Z")), day("2024-03-09"));
    }

    #[test]
    fn named_zone_start_inside_gap_moves_past_it() {
        // 02:00 does not exist in New York on 2024-03-10.
        let cal = BusinessCalendar::new(Zone::parse("America/New_York").unwrap(), 2).unwrap();
        assert_eq!(cal.day_start_utc(day("2024-03-10")), utc("2024-03-10T07:00:00Z"));
    }

    #[test]
    fn skipped_calendar_day_still_brackets_instants() {
        // Samoa jumped from 2011-12-29 23:59 (-10) to 2011-12-31 00:00 (+14).
        let cal = BusinessCalendar::new(Zone::parse("Pacific/Apia").unwrap(), 5).unwrap();

        let evening = utc("2011-12-30T06:00:00Z");
        assert_eq!(cal.day_of(evening), day("2011-12-29"));
        assert_eq!(cal.day_start_utc(day("2011-12-29")), utc("2011-12-29T15:00:00Z"));
        assert_eq!(cal.day_end_utc(day("2011-12-29")).unwrap(), utc("2011-12-30T10:00:00Z"));

        // 02:00 on Dec 31 local, before the boundary, so credited to the
        // skipped date.
        let night = utc("2011-12-30T12:00:00Z");
        assert_eq!(cal.day_of(night), day("2011-12-30"));
        assert_eq!(cal.day_start_utc(day("2011-12-30")), utc("2011-12-30T10:00:00Z"));
        assert_eq!(cal.day_end_utc(day("2011-12-30")).unwrap(), utc("2011-12-30T15:00:00Z"));

        for t in [evening, night] {
            let bucket = cal.day_of(t);
            assert!(cal.day_start_utc(bucket) <= t && t < cal.day_end_utc(bucket).unwrap());
        }
    }

    #[quickcheck]
    fn bucket_is_local_date_or_day_before(secs: i64) -> bool {
        let cal = BusinessCalendar::argentina();
        let t = instant(secs);
        let local = t.with_timezone(&ARGENTINA_OFFSET).date_naive();
        let bucket = cal.day_of(t);
        bucket == local || Some(bucket) == local.pred_opt()
    }

    #[quickcheck]
    fn buckets_never_decrease(a: i64, b: i64) -> bool {
        let cal = BusinessCalendar::argentina();
        let (t1, t2) = (instant(a), instant(b));
        let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        cal.day_of(lo) <= cal.day_of(hi)
    }

    #[quickcheck]
    fn rebucketing_noon_of_a_label_is_stable(secs: i64) -> bool {
        let cal = BusinessCalendar::argentina();
        let label = cal.day_of(instant(secs));
        let noon = ARGENTINA_OFFSET
            .from_local_datetime(&label.and_hms_opt(12, 0, 0).unwrap())
            .unwrap()
            .with_timezone(&Utc);
        cal.day_of(noon) == label
    }

    #[quickcheck]
    fn instant_lies_inside_its_bucket(secs: i64, hour: u8) -> TestResult {
        let Ok(cal) = BusinessCalendar::new(Zone::Fixed(ARGENTINA_OFFSET), u32::from(hour % 24))
        else {
            return TestResult::discard();
        };
        let t = instant(secs);
        let bucket = cal.day_of(t);
        let end = cal.day_end_utc(bucket).unwrap();
        TestResult::from_bool(cal.day_start_utc(bucket) <= t && t < end)
    }
}
