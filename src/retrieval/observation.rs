/// Observed (and simulated) time-series: one series per feature.
///
/// Observations have no reference time, so their metadata carries none and
/// only the valid-time bounds of the window apply.

use crate::error::RetrievalError;
use crate::retrieval::builder::{group_rows, SeriesSource};
use crate::retrieval::{series_iter, unsupported, IdentifierIter, Retriever, RetrieverKind, TimeSeriesIter};
use std::collections::BTreeMap;

const NO_IDENTIFIERS: &str =
    "Retrieval of observed time-series by identifier is not currently possible.";

pub struct ObservationRetriever {
    source: SeriesSource,
}

impl ObservationRetriever {
    pub(crate) fn new(source: SeriesSource) -> Self {
        ObservationRetriever { source }
    }
}

impl Retriever<f64> for ObservationRetriever {
    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Observation
    }

    fn get(&self) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        let feature_ids = self.source.feature_ids()?;
        if feature_ids.is_empty() {
            return Ok(series_iter(Vec::new()));
        }

        let rows = self.source.fetch(&self.source.observation_query(feature_ids))?;
        let series = group_rows(&rows, |row| row.feature_id)
            .values()
            .map(|rows| self.source.single_valued_series(rows, BTreeMap::new()))
            .collect::<Result<Vec<_>, _>>()?;
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
