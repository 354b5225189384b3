/// Core data types for hydrologic time-series retrieval.
///
/// Every retriever produces `TimeSeries` values built from these types.
/// They are constructed fresh for each retrieval, never mutated afterwards,
/// and do not outlive the pool that consumes them.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::RetrievalError;

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// A named geographic feature, e.g. a gauge location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Feature {
    pub fn of(name: impl Into<String>) -> Self {
        Feature {
            name: name.into(),
            description: None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Features correlated across the left, right and baseline datasets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureTuple {
    pub left: Feature,
    pub right: Feature,
    pub baseline: Option<Feature>,
}

impl FeatureTuple {
    pub fn get(&self, orientation: DatasetOrientation) -> Option<&Feature> {
        match orientation {
            DatasetOrientation::Left => Some(&self.left),
            DatasetOrientation::Right => Some(&self.right),
            DatasetOrientation::Baseline => self.baseline.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dataset roles and kinds
// ---------------------------------------------------------------------------

/// Role of a dataset within an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetOrientation {
    Left,
    Right,
    Baseline,
}

impl DatasetOrientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetOrientation::Left => "left",
            DatasetOrientation::Right => "right",
            DatasetOrientation::Baseline => "baseline",
        }
    }
}

impl fmt::Display for DatasetOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared kind of data held by a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Observations,
    Simulations,
    Analyses,
    SingleValuedForecasts,
    EnsembleForecasts,
}

/// How overlapping analysis runs are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    KeepAll,
    #[default]
    KeepLatestReferenceTime,
    KeepEarliestReferenceTime,
}

// ---------------------------------------------------------------------------
// Reference times and time scales
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceTimeType {
    T0,
    AnalysisStartTime,
    IssuedTime,
    LatestObservation,
    Unknown,
}

impl ReferenceTimeType {
    /// Parses the stored name. Case, spaces and underscores are ignored;
    /// anything unrecognized becomes `Unknown`.
    pub fn from_name(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "T0" => ReferenceTimeType::T0,
            "ANALYSISSTARTTIME" => ReferenceTimeType::AnalysisStartTime,
            "ISSUEDTIME" => ReferenceTimeType::IssuedTime,
            "LATESTOBSERVATION" => ReferenceTimeType::LatestObservation,
            _ => ReferenceTimeType::Unknown,
        }
    }

    /// The name without underscores, as `from_name` compares it.
    pub fn normalized_name(&self) -> String {
        self.to_string().replace('_', "")
    }
}

impl fmt::Display for ReferenceTimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceTimeType::T0 => write!(f, "T0"),
            ReferenceTimeType::AnalysisStartTime => write!(f, "ANALYSIS_START_TIME"),
            ReferenceTimeType::IssuedTime => write!(f, "ISSUED_TIME"),
            ReferenceTimeType::LatestObservation => write!(f, "LATEST_OBSERVATION"),
            ReferenceTimeType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeScaleFunction {
    Mean,
    Minimum,
    Maximum,
    Total,
    Unknown,
}

impl TimeScaleFunction {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "mean" => TimeScaleFunction::Mean,
            "minimum" | "min" => TimeScaleFunction::Minimum,
            "maximum" | "max" => TimeScaleFunction::Maximum,
            "total" | "sum" => TimeScaleFunction::Total,
            _ => TimeScaleFunction::Unknown,
        }
    }
}

/// Period and aggregation function over which a value applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeScale {
    pub period: Duration,
    pub function: TimeScaleFunction,
}

impl TimeScale {
    pub fn new(period: Duration, function: TimeScaleFunction) -> Self {
        TimeScale { period, function }
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}m, {:?}]", self.period.num_minutes(), self.function)
    }
}

// ---------------------------------------------------------------------------
// Seasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

/// A month-day range that may wrap the end of the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub start: MonthDay,
    pub end: MonthDay,
}

impl Season {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let day = MonthDay {
            month: instant.month(),
            day: instant.day(),
        };
        if self.start <= self.end {
            self.start <= day && day <= self.end
        } else {
            day >= self.start || day <= self.end
        }
    }
}

// ---------------------------------------------------------------------------
// Events and metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub valid_time: DateTime<Utc>,
    pub value: T,
}

impl<T> Event<T> {
    pub fn of(valid_time: DateTime<Utc>, value: T) -> Self {
        Event { valid_time, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesMetadata {
    /// At most one instant per reference-time kind. Empty for observations.
    pub reference_times: BTreeMap<ReferenceTimeType, DateTime<Utc>>,
    /// `None` when instantaneous or unknown.
    pub time_scale: Option<TimeScale>,
    pub variable_name: String,
    pub feature: Feature,
    pub unit: String,
}

impl TimeSeriesMetadata {
    pub fn of(
        reference_times: BTreeMap<ReferenceTimeType, DateTime<Utc>>,
        time_scale: Option<TimeScale>,
        variable_name: impl Into<String>,
        feature: Feature,
        unit: impl Into<String>,
    ) -> Self {
        TimeSeriesMetadata {
            reference_times,
            time_scale,
            variable_name: variable_name.into(),
            feature,
            unit: unit.into(),
        }
    }

    pub fn reference_time(&self, kind: ReferenceTimeType) -> Option<DateTime<Utc>> {
        self.reference_times.get(&kind).copied()
    }
}

// ---------------------------------------------------------------------------
// Time-series
// ---------------------------------------------------------------------------

/// Metadata plus events sorted ascending by valid time, one event per
/// valid time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries<T> {
    metadata: TimeSeriesMetadata,
    events: Vec<Event<T>>,
}

impl<T> TimeSeries<T> {
    /// Sorts the events and rejects duplicate valid times.
    pub fn of(metadata: TimeSeriesMetadata, events: Vec<Event<T>>) -> Result<Self, RetrievalError> {
        let mut builder = TimeSeriesBuilder::new(metadata);
        for event in events {
            builder.add_event(event)?;
        }
        Ok(builder.build())
    }

    pub fn metadata(&self) -> &TimeSeriesMetadata {
        &self.metadata
    }

    pub fn events(&self) -> &[Event<T>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_parts(self) -> (TimeSeriesMetadata, Vec<Event<T>>) {
        (self.metadata, self.events)
    }

    /// Keeps the events matching `keep`. Order and uniqueness are preserved.
    pub fn retain(mut self, keep: impl FnMut(&Event<T>) -> bool) -> Self {
        self.events.retain(keep);
        self
    }
}

/// Accumulates events for one series. Each valid time may be added once.
pub struct TimeSeriesBuilder<T> {
    metadata: TimeSeriesMetadata,
    events: BTreeMap<DateTime<Utc>, T>,
}

impl<T> TimeSeriesBuilder<T> {
    pub fn new(metadata: TimeSeriesMetadata) -> Self {
        TimeSeriesBuilder {
            metadata,
            events: BTreeMap::new(),
        }
    }

    pub fn add_event(&mut self, event: Event<T>) -> Result<&mut Self, RetrievalError> {
        if self.events.contains_key(&event.valid_time) {
            return Err(RetrievalError::InvalidSeries(format!(
                "duplicate event at {} for {} at feature {}",
                event.valid_time, self.metadata.variable_name, self.metadata.feature
            )));
        }
        self.events.insert(event.valid_time, event.value);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn build(self) -> TimeSeries<T> {
        TimeSeries {
            metadata: self.metadata,
            events: self
                .events
                .into_iter()
                .map(|(valid_time, value)| Event::of(valid_time, value))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ensembles
// ---------------------------------------------------------------------------

/// Member labels, parallel to an ensemble's values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels(Vec<String>);

impl Labels {
    pub fn of(labels: Vec<String>) -> Self {
        Labels(labels)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.0.iter().position(|l| l == label)
    }
}

/// One multi-member forecast value.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    members: Vec<f64>,
    labels: Labels,
}

impl Ensemble {
    pub fn of(members: Vec<f64>, labels: Labels) -> Result<Self, RetrievalError> {
        if members.len() != labels.len() {
            return Err(RetrievalError::InvalidSeries(format!(
                "ensemble has {} members but {} labels",
                members.len(),
                labels.len()
            )));
        }
        Ok(Ensemble { members, labels })
    }

    pub fn members(&self) -> &[f64] {
        &self.members
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, label: &str) -> Option<f64> {
        self.labels.index_of(label).map(|i| self.members[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn metadata() -> TimeSeriesMetadata {
        TimeSeriesMetadata::of(BTreeMap::new(), None, "QINE", Feature::of("DRRC2"), "CMS")
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_series_events_are_sorted_by_valid_time() {
        let series = TimeSeries::of(
            metadata(),
            vec![Event::of(at(3), 3.0), Event::of(at(1), 1.0), Event::of(at(2), 2.0)],
        )
        .unwrap();

        let times: Vec<u32> = series.events().iter().map(|e| e.valid_time.hour()).collect();
        assert_eq!(times, vec![1, 2, 3], "Events should ascend by valid time");
    }

    #[test]
    fn test_duplicate_valid_time_is_rejected() {
        let result = TimeSeries::of(metadata(), vec![Event::of(at(1), 1.0), Event::of(at(1), 2.0)]);
        assert!(matches!(result, Err(RetrievalError::InvalidSeries(_))));
    }

    #[test]
    fn test_series_equality_covers_metadata_and_events() {
        let a = TimeSeries::of(metadata(), vec![Event::of(at(1), 1.0)]).unwrap();
        let b = TimeSeries::of(metadata(), vec![Event::of(at(1), 1.0)]).unwrap();
        let mut other = metadata();
        other.unit = "CFS".to_string();
        let c = TimeSeries::of(other, vec![Event::of(at(1), 1.0)]).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c, "Different units should make series unequal");
    }

    #[test]
    fn test_retain_keeps_order() {
        let series = TimeSeries::of(
            metadata(),
            (1..=5).map(|h| Event::of(at(h), h as f64)).collect(),
        )
        .unwrap()
        .retain(|e| e.value % 2.0 == 1.0);

        let values: Vec<f64> = series.events().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_ensemble_requires_one_label_per_member() {
        let labels = Labels::of(vec!["1985".to_string(), "1986".to_string()]);
        assert!(Ensemble::of(vec![1.0, 2.0], labels.clone()).is_ok());
        assert!(Ensemble::of(vec![1.0], labels).is_err());
    }

    #[test]
    fn test_ensemble_member_lookup_by_label() {
        let labels = Labels::of(vec!["1985".to_string(), "1986".to_string()]);
        let ensemble = Ensemble::of(vec![10.0, 20.0], labels).unwrap();
        assert_eq!(ensemble.member("1986"), Some(20.0));
        assert_eq!(ensemble.member("1999"), None);
    }

    #[test]
    fn test_reference_time_type_names() {
        assert_eq!(ReferenceTimeType::from_name("T0"), ReferenceTimeType::T0);
        assert_eq!(
            ReferenceTimeType::from_name("analysis start time"),
            ReferenceTimeType::AnalysisStartTime
        );
        assert_eq!(
            ReferenceTimeType::from_name("ANALYSIS_START_TIME"),
            ReferenceTimeType::AnalysisStartTime
        );
        assert_eq!(ReferenceTimeType::from_name("bogus"), ReferenceTimeType::Unknown);
    }

    #[test]
    fn test_season_within_year() {
        let season = Season {
            start: MonthDay { month: 4, day: 1 },
            end: MonthDay { month: 9, day: 30 },
        };
        assert!(season.contains(Utc.with_ymd_and_hms(2023, 6, 15, 0, 0, 0).unwrap()));
        assert!(!season.contains(Utc.with_ymd_and_hms(2023, 12, 15, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_season_wrapping_year_end() {
        let season = Season {
            start: MonthDay { month: 11, day: 1 },
            end: MonthDay { month: 2, day: 28 },
        };
        assert!(season.contains(Utc.with_ymd_and_hms(2023, 12, 25, 0, 0, 0).unwrap()));
        assert!(season.contains(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()));
        assert!(!season.contains(Utc.with_ymd_and_hms(2023, 7, 4, 0, 0, 0).unwrap()));
    }
}
