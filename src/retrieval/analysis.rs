/// Analysis time-series composed from overlapping analysis runs.
///
/// Each run is stored like a forecast, issued at its analysis start time.
/// With no duration bounds every run becomes one series and the duplicate
/// policy reconciles valid times covered by more than one run. With either
/// duration bound set, each event whose lead lies in `(earliest, latest]`
/// becomes a single-event snapshot series and no policy applies.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::RetrievalError;
use crate::model::{DuplicatePolicy, Event, Feature, ReferenceTimeType, TimeSeries};
use crate::retrieval::builder::{group_rows, reference_times, SeriesSource};
use crate::retrieval::{series_iter, unsupported, IdentifierIter, Retriever, RetrieverKind, TimeSeriesIter};
use crate::store::RowQuery;
use crate::time_window::{within, TimeWindow};

const NO_IDENTIFIERS: &str = "There is no existing identifier stored for an analysis time-series, rather it is composed on demand.";

pub struct AnalysisRetriever {
    source: SeriesSource,
    duplicate_policy: DuplicatePolicy,
    earliest_duration: Option<Duration>,
    latest_duration: Option<Duration>,
}

impl AnalysisRetriever {
    pub(crate) fn new(
        source: SeriesSource,
        duplicate_policy: DuplicatePolicy,
        (earliest_duration, latest_duration): (Option<Duration>, Option<Duration>),
    ) -> Self {
        AnalysisRetriever {
            source,
            duplicate_policy,
            earliest_duration,
            latest_duration,
        }
    }

    fn is_snapshot(&self) -> bool {
        self.earliest_duration.is_some() || self.latest_duration.is_some()
    }

    /// Every run with events in the window's valid bounds, ascending by
    /// reference time. Reference bounds never select runs: a run issued
    /// after the window still supersedes the early leads of earlier runs.
    fn runs(&self) -> Result<Vec<(DateTime<Utc>, TimeSeries<f64>)>, RetrievalError> {
        let feature_ids = self.source.feature_ids()?;
        if feature_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Only valid bounds apply; leads belong to the duration bounds.
        let window = &self.source.window;
        let earliest_valid = window.earliest_valid_time.map(|t| t - self.source.scale_padding());
        let query = RowQuery::new(feature_ids, &self.source.variable_name, self.source.orientation)
            .with_window(TimeWindow::unbounded().with_valid_times(earliest_valid, window.latest_valid_time))
            .with_reference_time_type(ReferenceTimeType::AnalysisStartTime);
        let rows = self.source.fetch(&query)?;

        let mut runs = Vec::new();
        for rows in group_rows(&rows, |row| (row.feature_id, row.reference_time, row.series_id)).values() {
            let Some(reference_time) = rows[0].reference_time else {
                log::warn!("skipping analysis series {} without a reference time", rows[0].series_id);
                continue;
            };
            runs.push((reference_time, self.source.single_valued_series(rows, reference_times(rows[0]))?));
        }
        runs.sort_by(|(a_time, a), (b_time, b)| {
            (&a.metadata().feature, a_time).cmp(&(&b.metadata().feature, b_time))
        });
        Ok(runs)
    }

    fn snapshots(&self, runs: Vec<(DateTime<Utc>, TimeSeries<f64>)>) -> Result<Vec<TimeSeries<f64>>, RetrievalError> {
        let mut snapshots = Vec::new();
        for (reference_time, run) in runs {
            let (metadata, events) = run.into_parts();
            for event in events {
                let lead = event.valid_time - reference_time;
                if within(lead, self.earliest_duration, self.latest_duration) {
                    snapshots.push(TimeSeries::of(metadata.clone(), vec![event])?);
                }
            }
        }
        Ok(snapshots)
    }
}

/// Applies the duplicate policy to the runs of one feature, given in
/// ascending reference-time order.
///
/// Under `KeepLatestReferenceTime` each run keeps only events strictly
/// before the next later run's reference time and the latest run is kept
/// whole. Valid times already taken by a preferred run are dropped in both
/// keep policies, so no two results share a valid time.
fn resolve_duplicates(
    policy: DuplicatePolicy,
    runs: Vec<(DateTime<Utc>, TimeSeries<f64>)>,
) -> Vec<TimeSeries<f64>> {
    match policy {
        DuplicatePolicy::KeepAll => runs.into_iter().map(|(_, series)| series).collect(),
        DuplicatePolicy::KeepEarliestReferenceTime => {
            let mut taken = BTreeSet::new();
            runs.into_iter()
                .map(|(_, series)| keep_untaken(series, &mut taken, |_: &Event<f64>| true))
                .filter(|series| !series.is_empty())
                .collect()
        }
        DuplicatePolicy::KeepLatestReferenceTime => {
            let mut taken = BTreeSet::new();
            let mut later_reference: Option<DateTime<Utc>> = None;
            let mut previous_reference: Option<DateTime<Utc>> = None;
            let mut kept = Vec::new();
            for (reference_time, series) in runs.into_iter().rev() {
                if previous_reference.is_some_and(|previous| previous > reference_time) {
                    later_reference = previous_reference;
                }
                previous_reference = Some(reference_time);

                let cutoff = later_reference;
                let series = keep_untaken(series, &mut taken, |e: &Event<f64>| {
                    cutoff.is_none_or(|cutoff| e.valid_time < cutoff)
                });
                if !series.is_empty() {
                    kept.push(series);
                }
            }
            kept.reverse();
            kept
        }
    }
}

fn keep_untaken(
    series: TimeSeries<f64>,
    taken: &mut BTreeSet<DateTime<Utc>>,
    mut keep: impl FnMut(&Event<f64>) -> bool,
) -> TimeSeries<f64> {
    let series = series.retain(|e| keep(e) && !taken.contains(&e.valid_time));
    taken.extend(series.events().iter().map(|e| e.valid_time));
    series
}

impl Retriever<f64> for AnalysisRetriever {
    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Analysis
    }

    fn get(&self) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        let runs = self.runs()?;
        if self.is_snapshot() {
            return Ok(series_iter(self.snapshots(runs)?));
        }

        // Duplicates are resolved among the runs of each feature separately.
        let mut by_feature: BTreeMap<Feature, Vec<(DateTime<Utc>, TimeSeries<f64>)>> = BTreeMap::new();
        for run in runs {
            by_feature.entry(run.1.metadata().feature.clone()).or_default().push(run);
        }
        let series: Vec<TimeSeries<f64>> = by_feature
            .into_values()
            .flat_map(|runs| resolve_duplicates(self.duplicate_policy, runs))
            .collect();
        Ok(series_iter(series))
    }

    fn get_by_id(&self, _id: i64) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        unsupported(NO_IDENTIFIERS)
    }

    fn get_by_ids(&self, _ids: &[i64]) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        unsupported(NO_IDENTIFIERS)
    }

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
        unsupported(NO_IDENTIFIERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeSeriesMetadata;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 1, hour, 0, 0).unwrap()
    }

    /// A run issued at `reference` with hourly events at leads 1h..=6h.
    fn run(reference: u32) -> (DateTime<Utc>, TimeSeries<f64>) {
        let metadata = TimeSeriesMetadata::of(
            BTreeMap::from([(ReferenceTimeType::AnalysisStartTime, at(reference))]),
            None,
            "QINE",
            Feature::of("DRRC2"),
            "CMS",
        );
        let events = (1..=6).map(|lead| Event::of(at(reference + lead), lead as f64)).collect();
        (at(reference), TimeSeries::of(metadata, events).unwrap())
    }

    fn hours(series: &TimeSeries<f64>) -> Vec<u32> {
        use chrono::Timelike;
        series.events().iter().map(|e| e.valid_time.hour()).collect()
    }

    #[test]
    fn test_keep_latest_truncates_at_next_reference_time() {
        let kept = resolve_duplicates(DuplicatePolicy::KeepLatestReferenceTime, vec![run(0), run(3), run(6)]);
        assert_eq!(kept.len(), 3);
        assert_eq!(hours(&kept[0]), vec![1, 2]);
        assert_eq!(hours(&kept[1]), vec![4, 5]);
        assert_eq!(hours(&kept[2]), vec![7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_keep_earliest_drops_later_duplicates() {
        let kept = resolve_duplicates(DuplicatePolicy::KeepEarliestReferenceTime, vec![run(0), run(3), run(6)]);
        assert_eq!(hours(&kept[0]), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(hours(&kept[1]), vec![7, 8, 9]);
        assert_eq!(hours(&kept[2]), vec![10, 11, 12]);
    }

    #[test]
    fn test_keep_all_leaves_runs_whole() {
        let kept = resolve_duplicates(DuplicatePolicy::KeepAll, vec![run(0), run(3)]);
        assert_eq!(kept.iter().map(TimeSeries::len).collect::<Vec<_>>(), vec![6, 6]);
    }

    #[test]
    fn test_runs_sharing_reference_time_share_cutoff() {
        let kept = resolve_duplicates(DuplicatePolicy::KeepLatestReferenceTime, vec![run(0), run(3), run(3)]);
        // The duplicate 03:00 run adds nothing new once the first is kept.
        assert_eq!(kept.len(), 2);
        assert_eq!(hours(&kept[0]), vec![1, 2]);
    }
}
