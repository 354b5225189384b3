/// Access to persisted time-series rows.
///
/// The relational schema is owned by the ingest pipeline; this crate only
/// reads it. Retrievers talk to a `TimeSeriesStore` so the PostgreSQL
/// implementation can be swapped for the in-memory one in tests.

pub mod caches;
pub mod memory;
pub mod pg;

use chrono::{DateTime, Duration, Utc};

use crate::error::RetrievalError;
use crate::model::{DatasetOrientation, Feature, ReferenceTimeType, TimeScale};
use crate::time_window::TimeWindow;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One stored value with the identity of the series it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesRow {
    pub series_id: i64,
    pub feature_id: i64,
    pub variable_name: String,
    pub orientation: DatasetOrientation,
    pub measurement_unit_id: i64,
    /// Set for ensemble members only.
    pub ensemble_id: Option<i64>,
    /// `None` for observations and simulations.
    pub reference_time: Option<DateTime<Utc>>,
    pub reference_time_type: ReferenceTimeType,
    /// `valid_time - reference_time` when a reference time exists.
    pub lead: Option<Duration>,
    pub valid_time: DateTime<Utc>,
    pub value: f64,
    pub time_scale: Option<TimeScale>,
}

impl TimeSeriesRow {
    /// An observation-shaped row; chain `issued_at` for forecasts.
    pub fn new(
        series_id: i64,
        feature_id: i64,
        variable_name: &str,
        orientation: DatasetOrientation,
        measurement_unit_id: i64,
        valid_time: DateTime<Utc>,
        value: f64,
    ) -> Self {
        TimeSeriesRow {
            series_id,
            feature_id,
            variable_name: variable_name.to_string(),
            orientation,
            measurement_unit_id,
            ensemble_id: None,
            reference_time: None,
            reference_time_type: ReferenceTimeType::Unknown,
            lead: None,
            valid_time,
            value,
            time_scale: None,
        }
    }

    pub fn issued_at(mut self, reference_time: DateTime<Utc>, kind: ReferenceTimeType) -> Self {
        self.reference_time = Some(reference_time);
        self.reference_time_type = kind;
        self.lead = Some(self.valid_time - reference_time);
        self
    }

    pub fn for_member(mut self, ensemble_id: i64) -> Self {
        self.ensemble_id = Some(ensemble_id);
        self
    }

    pub fn with_time_scale(mut self, time_scale: TimeScale) -> Self {
        self.time_scale = Some(time_scale);
        self
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Selects rows for a set of features, one variable and one orientation,
/// bounded by a time window.
///
/// Window bounds apply only where a row has the matching field: reference
/// and lead bounds never exclude rows without a reference time.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub feature_ids: Vec<i64>,
    pub variable_name: String,
    pub orientation: DatasetOrientation,
    pub window: TimeWindow,
    pub series_ids: Option<Vec<i64>>,
    pub reference_time_type: Option<ReferenceTimeType>,
}

impl RowQuery {
    pub fn new(feature_ids: Vec<i64>, variable_name: &str, orientation: DatasetOrientation) -> Self {
        RowQuery {
            feature_ids,
            variable_name: variable_name.to_string(),
            orientation,
            window: TimeWindow::unbounded(),
            series_ids: None,
            reference_time_type: None,
        }
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_series_ids(mut self, series_ids: Vec<i64>) -> Self {
        self.series_ids = Some(series_ids);
        self
    }

    pub fn with_reference_time_type(mut self, kind: ReferenceTimeType) -> Self {
        self.reference_time_type = Some(kind);
        self
    }

    pub fn admits(&self, row: &TimeSeriesRow) -> bool {
        if !self.feature_ids.contains(&row.feature_id)
            || row.variable_name != self.variable_name
            || row.orientation != self.orientation
        {
            return false;
        }
        if let Some(ids) = &self.series_ids {
            if !ids.contains(&row.series_id) {
                return false;
            }
        }
        if let Some(kind) = self.reference_time_type {
            if row.reference_time_type != kind {
                return false;
            }
        }
        if !self.window.admits_valid_time(row.valid_time) {
            return false;
        }
        if let Some(reference_time) = row.reference_time {
            if !self.window.admits_reference_time(reference_time) {
                return false;
            }
        }
        row.lead.is_none_or(|lead| self.window.admits_lead(lead))
    }
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

pub trait TimeSeriesStore: Send + Sync {
    /// Rows admitted by the query, in no particular order.
    fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<TimeSeriesRow>, RetrievalError>;

    /// Distinct ids of the series with at least one admitted row, ascending.
    fn series_ids(&self, query: &RowQuery) -> Result<Vec<i64>, RetrievalError>;

    /// Ids of the named features known to the store. Unknown names are
    /// absent from the result.
    fn features_named(&self, names: &[String]) -> Result<Vec<(i64, Feature)>, RetrievalError>;

    fn measurement_unit_name(&self, unit_id: i64) -> Result<Option<String>, RetrievalError>;

    fn ensemble_name(&self, ensemble_id: i64) -> Result<Option<String>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 1, hour, 0, 0).unwrap()
    }

    fn forecast_row(reference: u32, valid: u32) -> TimeSeriesRow {
        TimeSeriesRow::new(7, 1, "QINE", DatasetOrientation::Right, 1, at(valid), 1.0)
            .issued_at(at(reference), ReferenceTimeType::T0)
    }

    #[test]
    fn test_issued_at_sets_lead() {
        let row = forecast_row(0, 6);
        assert_eq!(row.lead, Some(Duration::hours(6)));
    }

    #[test]
    fn test_query_matches_identity() {
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Right);
        assert!(query.admits(&forecast_row(0, 6)));

        let other_variable = RowQuery::new(vec![1], "QOBS", DatasetOrientation::Right);
        assert!(!other_variable.admits(&forecast_row(0, 6)));

        let other_side = RowQuery::new(vec![1], "QINE", DatasetOrientation::Left);
        assert!(!other_side.admits(&forecast_row(0, 6)));
    }

    #[test]
    fn test_query_applies_lead_bounds() {
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Right).with_window(
            TimeWindow::unbounded().with_lead_durations(Some(Duration::hours(0)), Some(Duration::hours(6))),
        );
        assert!(!query.admits(&forecast_row(0, 0)), "Lead 0h is outside (0h, 6h]");
        assert!(query.admits(&forecast_row(0, 6)));
        assert!(!query.admits(&forecast_row(0, 7)));
    }

    #[test]
    fn test_reference_bounds_ignore_observations() {
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Left)
            .with_window(TimeWindow::unbounded().with_reference_times(Some(at(3)), Some(at(6))));
        let observation = TimeSeriesRow::new(1, 1, "QINE", DatasetOrientation::Left, 1, at(1), 2.0);
        assert!(query.admits(&observation));
    }

    #[test]
    fn test_query_restricts_series_ids() {
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Right).with_series_ids(vec![8]);
        assert!(!query.admits(&forecast_row(0, 6)));
    }
}
