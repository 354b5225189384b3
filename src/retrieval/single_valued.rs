/// Single-valued forecasts: one series per stored forecast, keyed by its
/// series id, which also serves as the retrieval identifier.

use crate::error::RetrievalError;
use crate::model::TimeSeries;
use crate::retrieval::builder::{group_rows, reference_times, SeriesSource};
use crate::retrieval::{series_iter, IdentifierIter, Retriever, RetrieverKind, TimeSeriesIter};
use crate::store::RowQuery;

pub struct SingleValuedForecastRetriever {
    source: SeriesSource,
}

impl SingleValuedForecastRetriever {
    pub(crate) fn new(source: SeriesSource) -> Self {
        SingleValuedForecastRetriever { source }
    }

    fn retrieve(&self, restrict: impl FnOnce(RowQuery) -> RowQuery) -> Result<Vec<TimeSeries<f64>>, RetrievalError> {
        let feature_ids = self.source.feature_ids()?;
        if feature_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = restrict(self.source.forecast_query(feature_ids));
        let rows = self.source.fetch(&query)?;
        group_rows(&rows, |row| row.series_id)
            .values()
            .map(|rows| self.source.single_valued_series(rows, reference_times(rows[0])))
            .collect()
    }
}

impl Retriever<f64> for SingleValuedForecastRetriever {
    fn kind(&self) -> RetrieverKind {
        RetrieverKind::SingleValuedForecast
    }

    fn get(&self) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        Ok(series_iter(self.retrieve(|query| query)?))
    }

    fn get_by_id(&self, id: i64) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        self.get_by_ids(&[id])
    }

    fn get_by_ids(&self, ids: &[i64]) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        let ids = ids.to_vec();
        Ok(series_iter(self.retrieve(|query| query.with_series_ids(ids))?))
    }

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
        let feature_ids = self.source.feature_ids()?;
        if feature_ids.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let ids = self.source.store.series_ids(&self.source.forecast_query(feature_ids))?;
        Ok(Box::new(ids.into_iter()))
    }
}
