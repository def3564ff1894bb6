//! Send-window alignment. Stage due times are pushed forward to the next
//! allowed hour-of-day slot so automated messages land at humane times.

use chrono::{DateTime, TimeZone, Timelike, Utc};

/// Returns the earliest instant at or after `at` that falls inside an
/// allowed hour slot. An instant already inside a slot hour is kept
/// unchanged; otherwise the result is the top of the next slot hour,
/// wrapping to the first slot of the following day. An empty slot list
/// disables alignment.
pub fn align_to_window(at: DateTime<Utc>, allowed_hours: &[u32]) -> DateTime<Utc> {
    if allowed_hours.is_empty() {
        return at;
    }
    let mut slots: Vec<u32> = allowed_hours.to_vec();
    slots.sort_unstable();

    let hour = at.hour();
    if slots.contains(&hour) {
        return at;
    }

    let date = at.date_naive();
    let (slot_date, slot_hour) = match slots.iter().find(|&&h| h > hour) {
        Some(&h) => (date, h),
        None => (date + chrono::Duration::days(1), slots[0]),
    };

    // A slot hour of 24 or more has no wall-clock representation; such a
    // misconfigured slot leaves the instant unaligned instead of panicking.
    let naive = slot_date
        .and_hms_opt(slot_hour, 0, 0)
        .unwrap_or_else(|| at.naive_utc());
    Utc.from_utc_datetime(&naive)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        let naive = NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap();
        Utc.from_utc_datetime(&naive)
    }

    #[test]
    fn test_inside_slot_hour_is_unchanged() {
        let aligned = align_to_window(at(14, 37), &[9, 14, 19]);
        assert_eq!(aligned, at(14, 37));
    }

    #[test]
    fn test_between_slots_moves_to_next_slot_top() {
        let aligned = align_to_window(at(11, 15), &[9, 14, 19]);
        assert_eq!(aligned, at(14, 0));
    }

    #[test]
    fn test_after_last_slot_wraps_to_next_day() {
        let aligned = align_to_window(at(21, 0), &[9, 14, 19]);
        assert_eq!(aligned, at(9, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn test_before_first_slot_moves_to_first_slot() {
        let aligned = align_to_window(at(6, 30), &[9, 14, 19]);
        assert_eq!(aligned, at(9, 0));
    }

    #[test]
    fn test_empty_slots_disable_alignment() {
        let aligned = align_to_window(at(3, 12), &[]);
        assert_eq!(aligned, at(3, 12));
    }

    #[test]
    fn test_out_of_range_slot_hour_falls_back_unaligned() {
        let aligned = align_to_window(at(11, 0), &[24]);
        assert_eq!(aligned, at(11, 0));
    }

    #[test]
    fn test_unsorted_slot_list() {
        let aligned = align_to_window(at(11, 0), &[19, 9, 14]);
        assert_eq!(aligned, at(14, 0));
    }
}
