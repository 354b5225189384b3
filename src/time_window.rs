/// Time windows bounding a retrieval or a pool.
///
/// Every bound is optional; a missing bound is unbounded. Lower bounds are
/// exclusive and upper bounds inclusive, so a window selects `(lower, upper]`.
/// When a lower and upper bound are equal the window selects that exact
/// instant or duration.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimeWindow {
    pub earliest_reference_time: Option<DateTime<Utc>>,
    pub latest_reference_time: Option<DateTime<Utc>>,
    pub earliest_valid_time: Option<DateTime<Utc>>,
    pub latest_valid_time: Option<DateTime<Utc>>,
    pub earliest_lead_duration: Option<Duration>,
    pub latest_lead_duration: Option<Duration>,
}

/// Applies the `(lower, upper]` rule, collapsing to equality when the
/// bounds coincide.
pub fn within<T: PartialOrd + Copy>(value: T, lower: Option<T>, upper: Option<T>) -> bool {
    if let (Some(lower), Some(upper)) = (lower, upper) {
        if lower == upper {
            return value == lower;
        }
    }
    lower.is_none_or(|lower| value > lower) && upper.is_none_or(|upper| value <= upper)
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        TimeWindow::default()
    }

    pub fn with_reference_times(
        mut self,
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Self {
        self.earliest_reference_time = earliest;
        self.latest_reference_time = latest;
        self
    }

    pub fn with_valid_times(
        mut self,
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Self {
        self.earliest_valid_time = earliest;
        self.latest_valid_time = latest;
        self
    }

    pub fn with_lead_durations(mut self, earliest: Option<Duration>, latest: Option<Duration>) -> Self {
        self.earliest_lead_duration = earliest;
        self.latest_lead_duration = latest;
        self
    }

    pub fn admits_reference_time(&self, time: DateTime<Utc>) -> bool {
        within(time, self.earliest_reference_time, self.latest_reference_time)
    }

    pub fn admits_valid_time(&self, time: DateTime<Utc>) -> bool {
        within(time, self.earliest_valid_time, self.latest_valid_time)
    }

    pub fn admits_lead(&self, lead: Duration) -> bool {
        within(lead, self.earliest_lead_duration, self.latest_lead_duration)
    }

    /// Valid-time bounds, or reference-time plus lead bounds where a valid
    /// bound is missing.
    pub fn inferred_valid_bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let lower = self.earliest_valid_time.or_else(|| {
            match (self.earliest_reference_time, self.earliest_lead_duration) {
                (Some(reference), Some(lead)) => Some(reference + lead),
                _ => None,
            }
        });
        let upper = self.latest_valid_time.or_else(|| {
            match (self.latest_reference_time, self.latest_lead_duration) {
                (Some(reference), Some(lead)) => Some(reference + lead),
                _ => None,
            }
        });
        (lower, upper)
    }

    /// Smallest window containing every window given. An unbounded side in
    /// any input leaves that side unbounded.
    pub fn union(windows: &[TimeWindow]) -> TimeWindow {
        let Some(first) = windows.first() else {
            return TimeWindow::unbounded();
        };

        let mut union = *first;
        for window in &windows[1..] {
            union.earliest_reference_time =
                lowest(union.earliest_reference_time, window.earliest_reference_time);
            union.latest_reference_time =
                highest(union.latest_reference_time, window.latest_reference_time);
            union.earliest_valid_time = lowest(union.earliest_valid_time, window.earliest_valid_time);
            union.latest_valid_time = highest(union.latest_valid_time, window.latest_valid_time);
            union.earliest_lead_duration =
                lowest(union.earliest_lead_duration, window.earliest_lead_duration);
            union.latest_lead_duration = highest(union.latest_lead_duration, window.latest_lead_duration);
        }
        union
    }
}

fn lowest<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    Some(a?.min(b?))
}

fn highest<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    Some(a?.max(b?))
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn bound<T: fmt::Display>(value: &Option<T>) -> String {
            value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
        }
        fn lead(value: &Option<Duration>) -> String {
            value.map(|d| format!("{}h", d.num_minutes() as f64 / 60.0)).unwrap_or_else(|| "-".to_string())
        }
        write!(
            f,
            "reference ({}, {}] valid ({}, {}] lead ({}, {}]",
            bound(&self.earliest_reference_time),
            bound(&self.latest_reference_time),
            bound(&self.earliest_valid_time),
            bound(&self.latest_valid_time),
            lead(&self.earliest_lead_duration),
            lead(&self.latest_lead_duration),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_lower_bound_exclusive_upper_inclusive() {
        let window = TimeWindow::unbounded().with_valid_times(Some(at(1)), Some(at(3)));
        assert!(!window.admits_valid_time(at(1)), "Lower bound should be exclusive");
        assert!(window.admits_valid_time(at(2)));
        assert!(window.admits_valid_time(at(3)), "Upper bound should be inclusive");
        assert!(!window.admits_valid_time(at(4)));
    }

    #[test]
    fn test_equal_bounds_select_exact_value() {
        let window = TimeWindow::unbounded()
            .with_lead_durations(Some(Duration::hours(6)), Some(Duration::hours(6)));
        assert!(window.admits_lead(Duration::hours(6)));
        assert!(!window.admits_lead(Duration::hours(5)));
        assert!(!window.admits_lead(Duration::hours(7)));
    }

    #[test]
    fn test_missing_bounds_are_unbounded() {
        let window = TimeWindow::unbounded();
        assert!(window.admits_reference_time(at(0)));
        assert!(window.admits_lead(Duration::hours(-3)));
    }

    #[test]
    fn test_inferred_valid_bounds_from_reference_and_lead() {
        let window = TimeWindow::unbounded()
            .with_reference_times(Some(at(0)), Some(at(6)))
            .with_lead_durations(Some(Duration::hours(1)), Some(Duration::hours(12)));
        assert_eq!(window.inferred_valid_bounds(), (Some(at(1)), Some(at(18))));
    }

    #[test]
    fn test_declared_valid_bounds_take_precedence() {
        let window = TimeWindow::unbounded()
            .with_reference_times(Some(at(0)), Some(at(6)))
            .with_lead_durations(Some(Duration::hours(1)), Some(Duration::hours(12)))
            .with_valid_times(Some(at(2)), None);
        assert_eq!(window.inferred_valid_bounds(), (Some(at(2)), Some(at(18))));
    }

    #[test]
    fn test_union_spans_all_windows() {
        let a = TimeWindow::unbounded().with_lead_durations(Some(Duration::hours(0)), Some(Duration::hours(23)));
        let b = TimeWindow::unbounded().with_lead_durations(Some(Duration::hours(17)), Some(Duration::hours(40)));
        let union = TimeWindow::union(&[a, b]);
        assert_eq!(union.earliest_lead_duration, Some(Duration::hours(0)));
        assert_eq!(union.latest_lead_duration, Some(Duration::hours(40)));
        assert_eq!(union.earliest_valid_time, None);
    }

    #[test]
    fn test_union_keeps_unbounded_side() {
        let a = TimeWindow::unbounded().with_valid_times(Some(at(1)), Some(at(2)));
        let b = TimeWindow::unbounded().with_valid_times(None, Some(at(5)));
        let union = TimeWindow::union(&[a, b]);
        assert_eq!(union.earliest_valid_time, None);
        assert_eq!(union.latest_valid_time, Some(at(5)));
    }
}
