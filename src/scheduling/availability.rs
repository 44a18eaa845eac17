//! Free-slot computation for appointment booking.
//!
//! This is the single place that defines the overlap policy: appointment
//! intervals are expanded by the buffer on both sides, blocked times are
//! taken verbatim, and two half-open intervals conflict when they
//! intersect. Sundays and anything outside the booking window are never
//! offered.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AvailabilityError {
    #[error("date range end precedes start")]
    InvalidRange,
    #[error("duration must be a positive number of minutes")]
    InvalidDuration,
}

/// Half-open interval `[start, end)` in naive UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn expanded(&self, minutes: i64) -> Interval {
        Interval {
            start: self.start - Duration::minutes(minutes),
            end: self.end + Duration::minutes(minutes),
        }
    }
}

/// Workday geometry taken from `appointment_settings`.
#[derive(Debug, Clone, Copy)]
pub struct SlotGrid {
    pub workday_start_min: i32,
    pub workday_end_min: i32,
    pub buffer_minutes: i32,
    pub slot_granularity_minutes: i32,
    pub booking_window_days: i32,
}

/// Computes bookable start times for `duration_minutes`-long appointments
/// over the inclusive date range `[from, to]`.
pub fn available_slots(
    grid: &SlotGrid,
    from: NaiveDate,
    to: NaiveDate,
    duration_minutes: i32,
    appointments: &[Interval],
    blocked: &[Interval],
    now: NaiveDateTime,
) -> Result<Vec<NaiveDateTime>, AvailabilityError> {
    if to < from {
        return Err(AvailabilityError::InvalidRange);
    }
    if duration_minutes <= 0 {
        return Err(AvailabilityError::InvalidDuration);
    }

    let step = Duration::minutes(grid.slot_granularity_minutes.max(1) as i64);
    let duration = Duration::minutes(duration_minutes as i64);
    let window_end = now + Duration::days(grid.booking_window_days.max(0) as i64);

    let mut busy: Vec<Interval> = appointments
        .iter()
        .map(|interval| interval.expanded(grid.buffer_minutes as i64))
        .collect();
    busy.extend_from_slice(blocked);

    let mut slots = Vec::new();
    let mut day = from;
    loop {
        if day.weekday() != Weekday::Sun {
            let midnight = day.and_hms_opt(0, 0, 0).expect("midnight is valid");
            let day_start = midnight + Duration::minutes(grid.workday_start_min as i64);
            let day_end = midnight + Duration::minutes(grid.workday_end_min as i64);

            let mut candidate = day_start;
            while candidate + duration <= day_end {
                let slot = Interval::new(candidate, candidate + duration);
                let in_window = candidate >= now && candidate <= window_end;
                if in_window && !busy.iter().any(|b| b.overlaps(&slot)) {
                    slots.push(candidate);
                }
                candidate += step;
            }
        }

        if day == to {
            break;
        }
        day = day.succ_opt().ok_or(AvailabilityError::InvalidRange)?;
    }

    Ok(slots)
}

/// Why a specific requested slot cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRejection {
    Sunday,
    OutsideWorkday,
    InPast,
    OutsideWindow,
    Conflict,
}

impl SlotRejection {
    pub const fn message(&self) -> &'static str {
        match self {
            SlotRejection::Sunday => "appointments cannot be booked on Sundays",
            SlotRejection::OutsideWorkday => "slot falls outside working hours",
            SlotRejection::InPast => "slot is in the past",
            SlotRejection::OutsideWindow => "slot is beyond the booking window",
            SlotRejection::Conflict => "slot is no longer available",
        }
    }
}

/// Validates one requested start time against the same rules
/// `available_slots` uses to enumerate candidates.
pub fn check_slot(
    grid: &SlotGrid,
    start: NaiveDateTime,
    duration_minutes: i32,
    appointments: &[Interval],
    blocked: &[Interval],
    now: NaiveDateTime,
) -> Result<(), SlotRejection> {
    if start.date().weekday() == Weekday::Sun {
        return Err(SlotRejection::Sunday);
    }

    let midnight = start
        .date()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid");
    let day_start = midnight + Duration::minutes(grid.workday_start_min as i64);
    let day_end = midnight + Duration::minutes(grid.workday_end_min as i64);
    let end = start + Duration::minutes(duration_minutes.max(0) as i64);
    if start < day_start || end > day_end {
        return Err(SlotRejection::OutsideWorkday);
    }

    if start < now {
        return Err(SlotRejection::InPast);
    }
    if start > now + Duration::days(grid.booking_window_days.max(0) as i64) {
        return Err(SlotRejection::OutsideWindow);
    }

    let slot = Interval::new(start, end);
    let buffer = grid.buffer_minutes as i64;
    let conflict = appointments
        .iter()
        .any(|interval| interval.expanded(buffer).overlaps(&slot))
        || blocked.iter().any(|interval| interval.overlaps(&slot));
    if conflict {
        return Err(SlotRejection::Conflict);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(day: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        day.and_hms_opt(h, m, 0).unwrap()
    }

    fn grid() -> SlotGrid {
        SlotGrid {
            workday_start_min: 11 * 60,
            workday_end_min: 16 * 60,
            buffer_minutes: 15,
            slot_granularity_minutes: 15,
            booking_window_days: 30,
        }
    }

    #[test]
    fn buffer_expansion_rejects_adjacent_slot() {
        // Workday 11-16, buffer 15, one appointment 13:00-14:00.
        let day = date(2026, 9, 7); // a Monday
        let appointments = [Interval::new(at(day, 13, 0), at(day, 14, 0))];
        let slots = available_slots(
            &grid(),
            day,
            day,
            60,
            &appointments,
            &[],
            at(day, 0, 0),
        )
        .unwrap();

        // 12:45-13:45 collides with the buffered 12:45-14:15 window.
        assert!(!slots.contains(&at(day, 12, 45)));
        // 14:15-15:15 starts exactly where the buffer ends.
        assert!(slots.contains(&at(day, 14, 15)));
        // Unrelated morning slot survives.
        assert!(slots.contains(&at(day, 11, 0)));
    }

    #[test]
    fn blocked_times_are_excluded_verbatim() {
        let day = date(2026, 9, 8);
        let blocked = [Interval::new(at(day, 11, 0), at(day, 12, 0))];
        let slots =
            available_slots(&grid(), day, day, 60, &[], &blocked, at(day, 0, 0)).unwrap();

        assert!(!slots.contains(&at(day, 11, 0)));
        assert!(!slots.contains(&at(day, 11, 30)));
        // Blocked times carry no buffer: 12:00 is bookable.
        assert!(slots.contains(&at(day, 12, 0)));
    }

    #[test]
    fn sundays_are_always_excluded() {
        let sunday = date(2026, 9, 6);
        assert_eq!(sunday.weekday(), Weekday::Sun);
        let slots =
            available_slots(&grid(), sunday, sunday, 60, &[], &[], at(sunday, 0, 0)).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn slots_must_fit_inside_the_workday() {
        let day = date(2026, 9, 7);
        let slots = available_slots(&grid(), day, day, 60, &[], &[], at(day, 0, 0)).unwrap();
        // Last start that still ends by 16:00.
        assert_eq!(slots.last().copied(), Some(at(day, 15, 0)));
        assert_eq!(slots.first().copied(), Some(at(day, 11, 0)));
    }

    #[test]
    fn past_and_out_of_window_slots_are_dropped() {
        let day = date(2026, 9, 7);
        let now = at(day, 14, 0);
        let slots = available_slots(&grid(), day, day, 60, &[], &[], now).unwrap();
        assert!(slots.iter().all(|slot| *slot >= now));

        let mut short_window = grid();
        short_window.booking_window_days = 0;
        let far_day = date(2026, 9, 14);
        let slots =
            available_slots(&short_window, far_day, far_day, 60, &[], &[], now).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn inverted_range_is_an_error() {
        let day = date(2026, 9, 7);
        let result = available_slots(&grid(), day, date(2026, 9, 1), 60, &[], &[], at(day, 0, 0));
        assert_eq!(result.unwrap_err(), AvailabilityError::InvalidRange);
    }

    #[test]
    fn zero_duration_is_an_error() {
        let day = date(2026, 9, 7);
        let result = available_slots(&grid(), day, day, 0, &[], &[], at(day, 0, 0));
        assert_eq!(result.unwrap_err(), AvailabilityError::InvalidDuration);
    }
}
