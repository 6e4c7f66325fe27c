use chrono::NaiveDate;

use crate::model::*;

use super::BookingError;

/// First live interval on the resource overlapping `span`, if any.
pub(crate) fn find_conflict(rs: &ResourceSchedule, span: &Span) -> Option<BookingId> {
    rs.overlapping(span).next().map(|i| i.booking_id)
}

/// Check a requested range and turn it into a [`Span`].
///
/// Rejects empty or reversed ranges, ranges starting before `today`, and ranges
/// longer than `max_span_days`.
pub(crate) fn validate_range(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
    max_span_days: i64,
) -> Result<Span, BookingError> {
    if end <= start {
        return Err(BookingError::InvalidDateRange(format!(
            "end date {end} must be after start date {start}"
        )));
    }
    if start < today {
        return Err(BookingError::InvalidDateRange(format!(
            "start date {start} is in the past"
        )));
    }
    let span = Span::new(start, end);
    if span.days() > max_span_days {
        return Err(BookingError::InvalidDateRange(format!(
            "{} days exceeds the {max_span_days}-day maximum",
            span.days()
        )));
    }
    Ok(span)
}

/// Nights for a stay, days for a guide. Both are `end - start` under half-open ranges.
pub(crate) fn unit_count(kind: BookingType, span: &Span) -> i64 {
    match kind.unit_kind() {
        UnitKind::Night => span.days(),
        UnitKind::Day => span.days().max(1),
    }
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    #[test]
    fn range_checks() {
        let today = d(1);
        assert_eq!(validate_range(d(1), d(5), today, 30).unwrap(), Span::new(d(1), d(5)));
        assert!(matches!(
            validate_range(d(5), d(5), today, 30),
            Err(BookingError::InvalidDateRange(_))
        ));
        assert!(matches!(
            validate_range(d(6), d(5), today, 30),
            Err(BookingError::InvalidDateRange(_))
        ));
        assert!(matches!(
            validate_range(d(2), d(20), today, 7),
            Err(BookingError::InvalidDateRange(_))
        ));
        assert!(matches!(
            validate_range(d(1), d(3), d(2), 30),
            Err(BookingError::InvalidDateRange(_))
        ));
    }

    #[test]
    fn units() {
        let three = Span::new(d(1), d(4));
        assert_eq!(unit_count(BookingType::Homestay, &three), 3);
        let one = Span::new(d(1), d(2));
        assert_eq!(unit_count(BookingType::Guide, &one), 1);
    }

    #[test]
    fn conflict_lookup() {
        let mut rs = ResourceSchedule::new();
        let holder = Ulid::new();
        rs.insert_interval(Interval {
            booking_id: holder,
            span: Span::new(d(3), d(5)),
        });
        assert_eq!(find_conflict(&rs, &Span::new(d(4), d(6))), Some(holder));
        assert_eq!(find_conflict(&rs, &Span::new(d(5), d(6))), None);
        assert_eq!(find_conflict(&rs, &Span::new(d(1), d(3))), None);
    }
}
