/// Builder shared by every retriever variant, plus the row handling the
/// variants have in common: feature resolution, query construction, season
/// filtering, unit conversion and time-scale checks.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RetrievalError;
use crate::model::{
    DatasetOrientation, DuplicatePolicy, Event, Feature, ReferenceTimeType, Season, TimeScale,
    TimeSeries, TimeSeriesBuilder, TimeSeriesMetadata,
};
use crate::retrieval::{
    AnalysisRetriever, EnsembleForecastRetriever, MemberFilter, ObservationRetriever,
    SingleValuedForecastRetriever,
};
use crate::store::caches::StoreCaches;
use crate::store::{RowQuery, TimeSeriesRow, TimeSeriesStore};
use crate::time_window::TimeWindow;
use crate::units::UnitMapper;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct RetrieverBuilder {
    store: Arc<dyn TimeSeriesStore>,
    caches: StoreCaches,
    variable_name: Option<String>,
    features: Vec<Feature>,
    orientation: Option<DatasetOrientation>,
    window: Option<TimeWindow>,
    unit_mapper: Option<Arc<UnitMapper>>,
    declared_time_scale: Option<TimeScale>,
    desired_time_scale: Option<TimeScale>,
    season: Option<Season>,
    member_filter: MemberFilter,
    duplicate_policy: DuplicatePolicy,
    earliest_analysis_duration: Option<Duration>,
    latest_analysis_duration: Option<Duration>,
}

impl RetrieverBuilder {
    pub fn new(store: Arc<dyn TimeSeriesStore>, caches: StoreCaches) -> Self {
        RetrieverBuilder {
            store,
            caches,
            variable_name: None,
            features: Vec::new(),
            orientation: None,
            window: None,
            unit_mapper: None,
            declared_time_scale: None,
            desired_time_scale: None,
            season: None,
            member_filter: MemberFilter::default(),
            duplicate_policy: DuplicatePolicy::default(),
            earliest_analysis_duration: None,
            latest_analysis_duration: None,
        }
    }

    pub fn variable_name(mut self, variable_name: &str) -> Self {
        self.variable_name = Some(variable_name.to_string());
        self
    }

    pub fn features(mut self, features: Vec<Feature>) -> Self {
        self.features = features;
        self
    }

    pub fn orientation(mut self, orientation: DatasetOrientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn time_window(mut self, window: Option<TimeWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn unit_mapper(mut self, unit_mapper: Arc<UnitMapper>) -> Self {
        self.unit_mapper = Some(unit_mapper);
        self
    }

    /// Time scale assumed for stored values that carry none.
    pub fn declared_time_scale(mut self, time_scale: Option<TimeScale>) -> Self {
        self.declared_time_scale = time_scale;
        self
    }

    /// Widens the lower bound by the desired period so that values feeding
    /// the first upscaled event are retrieved.
    pub fn desired_time_scale(mut self, time_scale: Option<TimeScale>) -> Self {
        self.desired_time_scale = time_scale;
        self
    }

    pub fn season(mut self, season: Option<Season>) -> Self {
        self.season = season;
        self
    }

    pub fn member_filter(mut self, filter: MemberFilter) -> Self {
        self.member_filter = filter;
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Setting either bound switches analysis retrieval to snapshot mode.
    pub fn analysis_durations(mut self, earliest: Option<Duration>, latest: Option<Duration>) -> Self {
        self.earliest_analysis_duration = earliest;
        self.latest_analysis_duration = latest;
        self
    }

    pub fn observation(self) -> Result<ObservationRetriever, RetrievalError> {
        Ok(ObservationRetriever::new(self.into_source()?))
    }

    pub fn single_valued_forecast(self) -> Result<SingleValuedForecastRetriever, RetrievalError> {
        Ok(SingleValuedForecastRetriever::new(self.into_source()?))
    }

    pub fn ensemble_forecast(self) -> Result<EnsembleForecastRetriever, RetrievalError> {
        let filter = self.member_filter.clone();
        Ok(EnsembleForecastRetriever::new(self.into_source()?, filter))
    }

    pub fn analysis(self) -> Result<AnalysisRetriever, RetrievalError> {
        let policy = self.duplicate_policy;
        let durations = (self.earliest_analysis_duration, self.latest_analysis_duration);
        Ok(AnalysisRetriever::new(self.into_source()?, policy, durations))
    }

    fn into_source(self) -> Result<SeriesSource, RetrievalError> {
        let variable_name = self
            .variable_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| RetrievalError::Declaration("a variable name is required".to_string()))?;
        let orientation = self
            .orientation
            .ok_or_else(|| RetrievalError::Declaration("a dataset orientation is required".to_string()))?;

        Ok(SeriesSource {
            store: self.store,
            caches: self.caches,
            variable_name,
            features: self.features,
            orientation,
            window: self.window.unwrap_or_default(),
            unit_mapper: self.unit_mapper,
            declared_time_scale: self.declared_time_scale,
            desired_time_scale: self.desired_time_scale,
            season: self.season,
        })
    }
}

// ---------------------------------------------------------------------------
// Shared row handling
// ---------------------------------------------------------------------------

pub(crate) struct SeriesSource {
    pub store: Arc<dyn TimeSeriesStore>,
    pub caches: StoreCaches,
    pub variable_name: String,
    pub features: Vec<Feature>,
    pub orientation: DatasetOrientation,
    pub window: TimeWindow,
    pub unit_mapper: Option<Arc<UnitMapper>>,
    pub declared_time_scale: Option<TimeScale>,
    pub desired_time_scale: Option<TimeScale>,
    pub season: Option<Season>,
}

impl SeriesSource {
    pub fn feature_ids(&self) -> Result<Vec<i64>, RetrievalError> {
        self.caches.features.resolve(&self.features)
    }

    pub fn scale_padding(&self) -> Duration {
        self.desired_time_scale.map(|s| s.period).unwrap_or_else(Duration::zero)
    }

    /// Valid-time bounds only, inferred from reference and lead bounds when
    /// no valid bounds are set.
    pub fn observation_query(&self, feature_ids: Vec<i64>) -> RowQuery {
        let (lower, upper) = self.window.inferred_valid_bounds();
        let lower = lower.map(|l| l - self.scale_padding());
        RowQuery::new(feature_ids, &self.variable_name, self.orientation)
            .with_window(TimeWindow::unbounded().with_valid_times(lower, upper))
    }

    pub fn forecast_query(&self, feature_ids: Vec<i64>) -> RowQuery {
        let mut window = self.window;
        window.earliest_lead_duration = window.earliest_lead_duration.map(|l| l - self.scale_padding());
        RowQuery::new(feature_ids, &self.variable_name, self.orientation).with_window(window)
    }

    /// Runs the query and applies the season, by reference time for
    /// forecast rows and by valid time otherwise.
    pub fn fetch(&self, query: &RowQuery) -> Result<Vec<TimeSeriesRow>, RetrievalError> {
        let mut rows = self.store.fetch_rows(query)?;
        if let Some(season) = &self.season {
            rows.retain(|row| season.contains(row.reference_time.unwrap_or(row.valid_time)));
        }
        log::debug!(
            "retrieved {} {} rows of {} for {} features",
            rows.len(),
            self.orientation,
            self.variable_name,
            query.feature_ids.len()
        );
        Ok(rows)
    }

    pub fn value(&self, row: &TimeSeriesRow) -> Result<f64, RetrievalError> {
        match &self.unit_mapper {
            Some(mapper) => Ok(mapper.get_unit_mapper_by_id(row.measurement_unit_id)?.apply(row.value)),
            None => Ok(row.value),
        }
    }

    /// The desired unit, or the single stored unit of the rows.
    pub fn unit_name(&self, rows: &[&TimeSeriesRow]) -> Result<String, RetrievalError> {
        if let Some(mapper) = &self.unit_mapper {
            return Ok(mapper.desired_unit_name().to_string());
        }
        let mut unit: Option<String> = None;
        for row in rows {
            let name = self.caches.units.name_of(row.measurement_unit_id)?;
            match &unit {
                None => unit = Some(name),
                Some(existing) if *existing != name => {
                    return Err(RetrievalError::InvalidSeries(format!(
                        "series mixes units {} and {} and no desired unit is set",
                        existing, name
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(unit.unwrap_or_default())
    }

    /// Rows of one series must agree on their time scale. The declared
    /// existing scale stands in when none is stored and must not contradict
    /// a stored one.
    pub fn time_scale(&self, rows: &[&TimeSeriesRow]) -> Result<Option<TimeScale>, RetrievalError> {
        let mut stored: Option<TimeScale> = None;
        for scale in rows.iter().filter_map(|row| row.time_scale) {
            match stored {
                None => stored = Some(scale),
                Some(existing) if existing != scale => {
                    return Err(RetrievalError::InvalidSeries(format!(
                        "inconsistent time scales {} and {} within one {} series",
                        existing, scale, self.variable_name
                    )));
                }
                Some(_) => {}
            }
        }
        match (stored, self.declared_time_scale) {
            (Some(stored), Some(declared)) if stored != declared => Err(RetrievalError::InvalidSeries(
                format!("declared time scale {} contradicts stored time scale {}", declared, stored),
            )),
            (Some(stored), _) => Ok(Some(stored)),
            (None, declared) => Ok(declared),
        }
    }

    pub fn metadata(
        &self,
        rows: &[&TimeSeriesRow],
        reference_times: BTreeMap<ReferenceTimeType, DateTime<Utc>>,
    ) -> Result<TimeSeriesMetadata, RetrievalError> {
        let Some(first) = rows.first() else {
            return Err(RetrievalError::InvalidSeries("a series needs at least one row".to_string()));
        };
        Ok(TimeSeriesMetadata::of(
            reference_times,
            self.time_scale(rows)?,
            &self.variable_name,
            self.caches.features.feature(first.feature_id)?,
            self.unit_name(rows)?,
        ))
    }

    /// One single-valued series from rows sharing a feature and, for
    /// forecasts, a reference time.
    pub fn single_valued_series(
        &self,
        rows: &[&TimeSeriesRow],
        reference_times: BTreeMap<ReferenceTimeType, DateTime<Utc>>,
    ) -> Result<TimeSeries<f64>, RetrievalError> {
        let mut builder = TimeSeriesBuilder::new(self.metadata(rows, reference_times)?);
        for row in rows {
            builder.add_event(Event::of(row.valid_time, self.value(row)?))?;
        }
        Ok(builder.build())
    }
}

pub(crate) fn reference_times(row: &TimeSeriesRow) -> BTreeMap<ReferenceTimeType, DateTime<Utc>> {
    row.reference_time
        .map(|time| BTreeMap::from([(row.reference_time_type, time)]))
        .unwrap_or_default()
}

pub(crate) fn group_rows<K: Ord>(
    rows: &[TimeSeriesRow],
    key: impl Fn(&TimeSeriesRow) -> K,
) -> BTreeMap<K, Vec<&TimeSeriesRow>> {
    let mut groups: BTreeMap<K, Vec<&TimeSeriesRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(key(row)).or_default().push(row);
    }
    groups
}
