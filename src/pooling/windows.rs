/// Pool boundaries.
///
/// Each pooled axis (lead duration, reference date, valid date) is sliced
/// into regular windows: the i-th window is
/// `(min + i * frequency, min + i * frequency + period]`, enumerated while
/// its upper bound stays within the axis maximum. Pools are the full cross
/// product of the pooled axes; an axis without pools contributes one window
/// spanning its declared bounds.

use chrono::{DateTime, Duration, Utc};
use std::ops::Add;

use crate::config::Declaration;
use crate::error::RetrievalError;
use crate::time_window::TimeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePools {
    pub period: Duration,
    /// Offset between consecutive windows; the period when unset.
    pub frequency: Option<Duration>,
}

impl TimePools {
    pub fn new(period: Duration, frequency: Option<Duration>) -> Self {
        TimePools { period, frequency }
    }

    pub fn step(&self) -> Duration {
        self.frequency.unwrap_or(self.period)
    }
}

/// Slices `[min, max]` into `(lower, upper]` pairs. A zero step yields the
/// first window only.
fn slice_axis<T>(min: T, max: T, pools: &TimePools) -> Vec<(T, T)>
where
    T: Copy + PartialOrd + Add<Duration, Output = T>,
{
    let step = pools.step();
    let mut earliest = min;
    let mut latest = min + pools.period;

    if step <= Duration::zero() {
        return vec![(earliest, latest)];
    }

    let mut slices = Vec::new();
    while latest <= max {
        slices.push((earliest, latest));
        earliest = earliest + step;
        latest = latest + step;
    }
    slices
}

/// Lead-duration windows between `min` and `max`.
pub fn lead_bounds(min: Duration, max: Duration, pools: TimePools) -> Vec<TimeWindow> {
    slice_axis(min, max, &pools)
        .into_iter()
        .map(|(earliest, latest)| {
            TimeWindow::unbounded().with_lead_durations(Some(earliest), Some(latest))
        })
        .collect()
}

pub fn reference_date_windows(min: DateTime<Utc>, max: DateTime<Utc>, pools: TimePools) -> Vec<TimeWindow> {
    slice_axis(min, max, &pools)
        .into_iter()
        .map(|(earliest, latest)| {
            TimeWindow::unbounded().with_reference_times(Some(earliest), Some(latest))
        })
        .collect()
}

pub fn valid_date_windows(min: DateTime<Utc>, max: DateTime<Utc>, pools: TimePools) -> Vec<TimeWindow> {
    slice_axis(min, max, &pools)
        .into_iter()
        .map(|(earliest, latest)| TimeWindow::unbounded().with_valid_times(Some(earliest), Some(latest)))
        .collect()
}

// ---------------------------------------------------------------------------
// Combined boundaries
// ---------------------------------------------------------------------------

/// Bounds and optional pools for each of the three axes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolBoundaries {
    pub lead_bounds: (Option<Duration>, Option<Duration>),
    pub lead_pools: Option<TimePools>,
    pub reference_bounds: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    pub reference_pools: Option<TimePools>,
    pub valid_bounds: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    pub valid_pools: Option<TimePools>,
}

impl PoolBoundaries {
    pub fn from_declaration(declaration: &Declaration) -> Self {
        PoolBoundaries {
            lead_bounds: declaration.lead_bounds(),
            lead_pools: declaration.lead_time_pools.as_ref().map(|p| p.time_pools()),
            reference_bounds: declaration.reference_bounds(),
            reference_pools: declaration.reference_date_pools.as_ref().map(|p| p.time_pools()),
            valid_bounds: declaration.valid_bounds(),
            valid_pools: declaration.valid_date_pools.as_ref().map(|p| p.time_pools()),
        }
    }

    /// Every pool window, lead-major, then reference date, then valid date.
    pub fn time_windows(&self) -> Result<Vec<TimeWindow>, RetrievalError> {
        let leads = match self.lead_pools {
            Some(pools) => {
                let (min, max) = required("lead_time_pools", "lead_times", self.lead_bounds)?;
                non_empty("lead_time_pools", lead_bounds(min, max, pools))?
            }
            None => vec![TimeWindow::unbounded().with_lead_durations(self.lead_bounds.0, self.lead_bounds.1)],
        };
        let references = match self.reference_pools {
            Some(pools) => {
                let (min, max) = required("reference_date_pools", "reference_dates", self.reference_bounds)?;
                non_empty("reference_date_pools", reference_date_windows(min, max, pools))?
            }
            None => vec![TimeWindow::unbounded()
                .with_reference_times(self.reference_bounds.0, self.reference_bounds.1)],
        };
        let valids = match self.valid_pools {
            Some(pools) => {
                let (min, max) = required("valid_date_pools", "valid_dates", self.valid_bounds)?;
                non_empty("valid_date_pools", valid_date_windows(min, max, pools))?
            }
            None => vec![TimeWindow::unbounded().with_valid_times(self.valid_bounds.0, self.valid_bounds.1)],
        };

        let mut windows = Vec::with_capacity(leads.len() * references.len() * valids.len());
        for lead in &leads {
            for reference in &references {
                for valid in &valids {
                    windows.push(
                        TimeWindow::unbounded()
                            .with_lead_durations(lead.earliest_lead_duration, lead.latest_lead_duration)
                            .with_reference_times(
                                reference.earliest_reference_time,
                                reference.latest_reference_time,
                            )
                            .with_valid_times(valid.earliest_valid_time, valid.latest_valid_time),
                    );
                }
            }
        }
        Ok(windows)
    }
}

fn required<T>(pools: &str, bounds: &str, (min, max): (Option<T>, Option<T>)) -> Result<(T, T), RetrievalError> {
    match (min, max) {
        (Some(min), Some(max)) => Ok((min, max)),
        _ => Err(RetrievalError::Declaration(format!(
            "{} require both a minimum and a maximum in {}",
            pools, bounds
        ))),
    }
}

fn non_empty(pools: &str, windows: Vec<TimeWindow>) -> Result<Vec<TimeWindow>, RetrievalError> {
    if windows.is_empty() {
        return Err(RetrievalError::Declaration(format!(
            "{} period is longer than the declared bounds, so no pools fit",
            pools
        )));
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn leads(windows: &[TimeWindow]) -> Vec<(i64, i64)> {
        windows
            .iter()
            .map(|w| {
                (
                    w.earliest_lead_duration.unwrap().num_hours(),
                    w.latest_lead_duration.unwrap().num_hours(),
                )
            })
            .collect()
    }

    #[test]
    fn test_lead_bounds_with_frequency() {
        let windows = lead_bounds(
            Duration::hours(0),
            Duration::hours(40),
            TimePools::new(Duration::hours(23), Some(Duration::hours(17))),
        );
        assert_eq!(leads(&windows), vec![(0, 23), (17, 40)]);
    }

    #[test]
    fn test_lead_bounds_default_frequency_is_period() {
        let windows = lead_bounds(
            Duration::hours(0),
            Duration::hours(24),
            TimePools::new(Duration::hours(6), None),
        );
        assert_eq!(leads(&windows), vec![(0, 6), (6, 12), (12, 18), (18, 24)]);
    }

    #[test]
    fn test_zero_frequency_yields_one_window() {
        let windows = lead_bounds(
            Duration::hours(0),
            Duration::hours(24),
            TimePools::new(Duration::hours(6), Some(Duration::zero())),
        );
        assert_eq!(leads(&windows), vec![(0, 6)]);
    }

    #[test]
    fn test_issued_date_windows() {
        let start = Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap();
        let windows = reference_date_windows(
            start,
            start + Duration::hours(72),
            TimePools::new(Duration::hours(13), Some(Duration::hours(7))),
        );
        assert_eq!(windows.len(), 9);
        assert_eq!(windows[8].earliest_reference_time, Some(start + Duration::hours(56)));
        assert_eq!(windows[8].latest_reference_time, Some(start + Duration::hours(69)));
    }

    #[test]
    fn test_cross_product_of_pooled_axes() {
        let start = Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap();
        let boundaries = PoolBoundaries {
            lead_bounds: (Some(Duration::hours(0)), Some(Duration::hours(40))),
            lead_pools: Some(TimePools::new(Duration::hours(23), Some(Duration::hours(17)))),
            reference_bounds: (Some(start), Some(start + Duration::hours(72))),
            reference_pools: Some(TimePools::new(Duration::hours(13), Some(Duration::hours(7)))),
            ..PoolBoundaries::default()
        };
        let windows = boundaries.time_windows().unwrap();
        assert_eq!(windows.len(), 18);
        assert!(windows.iter().all(|w| w.earliest_valid_time.is_none()));
    }

    #[test]
    fn test_no_pools_yields_one_window_over_declared_bounds() {
        let boundaries = PoolBoundaries {
            lead_bounds: (Some(Duration::hours(0)), Some(Duration::hours(48))),
            ..PoolBoundaries::default()
        };
        let windows = boundaries.time_windows().unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].latest_lead_duration, Some(Duration::hours(48)));
        assert_eq!(windows[0].earliest_reference_time, None);
    }

    #[test]
    fn test_pools_without_bounds_are_rejected() {
        let boundaries = PoolBoundaries {
            lead_pools: Some(TimePools::new(Duration::hours(6), None)),
            ..PoolBoundaries::default()
        };
        assert!(matches!(boundaries.time_windows(), Err(RetrievalError::Declaration(_))));
    }

    #[test]
    fn test_period_longer_than_bounds_is_rejected() {
        let boundaries = PoolBoundaries {
            lead_bounds: (Some(Duration::hours(0)), Some(Duration::hours(4))),
            lead_pools: Some(TimePools::new(Duration::hours(6), None)),
            ..PoolBoundaries::default()
        };
        assert!(boundaries.time_windows().is_err());
    }
}
