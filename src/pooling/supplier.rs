/// Pool suppliers.
///
/// A supplier holds the retrievers for one pool window. The left retriever
/// is shared by every supplier of an evaluation and reads the union of all
/// windows once; each supplier trims that data to its own window. Right and
/// baseline retrievers are built per window and read on demand.

use chrono::Duration;
use std::sync::Arc;

use crate::error::RetrievalError;
use crate::model::{FeatureTuple, TimeSeries};
use crate::retrieval::Retriever;
use crate::time_window::{within, TimeWindow};

/// A retriever shared across pool threads.
pub type SharedRetriever<T> = Arc<dyn Retriever<T> + Send + Sync>;

/// A retriever owned by one pool.
pub type PoolRetriever<T> = Box<dyn Retriever<T> + Send>;

/// The data of one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool<L, R> {
    pub window: TimeWindow,
    pub features: Arc<[FeatureTuple]>,
    pub left: Vec<TimeSeries<L>>,
    pub right: Vec<TimeSeries<R>>,
    pub baseline: Option<Vec<TimeSeries<R>>>,
}

impl<L, R> Pool<L, R> {
    pub fn event_count(&self) -> usize {
        let left: usize = self.left.iter().map(TimeSeries::len).sum();
        let right: usize = self.right.iter().map(TimeSeries::len).sum();
        let baseline: usize = self
            .baseline
            .iter()
            .flatten()
            .map(TimeSeries::len)
            .sum();
        left + right + baseline
    }
}

pub struct PoolSupplier<L, R> {
    window: TimeWindow,
    features: Arc<[FeatureTuple]>,
    left: SharedRetriever<L>,
    right: PoolRetriever<R>,
    baseline: Option<PoolRetriever<R>>,
    /// Extra left history kept before the window for upscaling.
    left_padding: Duration,
}

impl<L: Clone, R> PoolSupplier<L, R> {
    pub fn new(
        window: TimeWindow,
        features: Arc<[FeatureTuple]>,
        left: SharedRetriever<L>,
        right: PoolRetriever<R>,
        baseline: Option<PoolRetriever<R>>,
        left_padding: Duration,
    ) -> Self {
        PoolSupplier {
            window,
            features,
            left,
            right,
            baseline,
            left_padding,
        }
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Retrieves the pool. Left series with no event inside the window are
    /// dropped.
    pub fn get(&self) -> Result<Pool<L, R>, RetrievalError> {
        let (lower, upper) = self.window.inferred_valid_bounds();
        let lower = lower.map(|l| l - self.left_padding);
        let left: Vec<TimeSeries<L>> = self
            .left
            .get()?
            .map(|series| series.retain(|e| within(e.valid_time, lower, upper)))
            .filter(|series| !series.is_empty())
            .collect();

        let right: Vec<TimeSeries<R>> = self.right.get()?.collect();
        let baseline = match &self.baseline {
            Some(retriever) => Some(retriever.get()?.collect()),
            None => None,
        };

        log::debug!(
            "pool {}: {} left, {} right and {} baseline series",
            self.window,
            left.len(),
            right.len(),
            baseline.as_ref().map_or(0, Vec::len)
        );

        Ok(Pool {
            window: self.window,
            features: Arc::clone(&self.features),
            left,
            right,
            baseline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, Feature, TimeSeriesMetadata};
    use crate::retrieval::{series_iter, IdentifierIter, RetrieverKind, TimeSeriesIter};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 1, hour, 0, 0).unwrap()
    }

    /// Hourly values from 01:00 to 12:00.
    struct FixedRetriever;

    impl Retriever<f64> for FixedRetriever {
        fn kind(&self) -> RetrieverKind {
            RetrieverKind::Observation
        }

        fn get(&self) -> Result<TimeSeriesIter<f64>, RetrievalError> {
            let metadata = TimeSeriesMetadata::of(BTreeMap::new(), None, "QINE", Feature::of("DRRC2"), "CMS");
            let events = (1..=12).map(|h| Event::of(at(h), h as f64)).collect();
            Ok(series_iter(vec![TimeSeries::of(metadata, events)?]))
        }

        fn get_by_id(&self, _id: i64) -> Result<TimeSeriesIter<f64>, RetrievalError> {
            Ok(series_iter(Vec::new()))
        }

        fn get_by_ids(&self, _ids: &[i64]) -> Result<TimeSeriesIter<f64>, RetrievalError> {
            Ok(series_iter(Vec::new()))
        }

        fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    fn supplier(window: TimeWindow, padding: Duration) -> PoolSupplier<f64, f64> {
        let features: Arc<[FeatureTuple]> = Vec::new().into();
        PoolSupplier::new(window, features, Arc::new(FixedRetriever), Box::new(FixedRetriever), None, padding)
    }

    #[test]
    fn test_left_data_trimmed_to_window() {
        let window = TimeWindow::unbounded().with_valid_times(Some(at(3)), Some(at(6)));
        let pool = supplier(window, Duration::zero()).get().unwrap();
        let values: Vec<f64> = pool.left[0].events().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![4.0, 5.0, 6.0], "Lower bound is exclusive, upper inclusive");
        assert_eq!(pool.right[0].len(), 12, "Right data is not trimmed by the supplier");
        assert!(pool.baseline.is_none());
    }

    #[test]
    fn test_left_padding_extends_lower_bound() {
        let window = TimeWindow::unbounded().with_valid_times(Some(at(3)), Some(at(6)));
        let pool = supplier(window, Duration::hours(2)).get().unwrap();
        assert_eq!(pool.left[0].len(), 5);
    }

    #[test]
    fn test_left_series_outside_window_dropped() {
        let window = TimeWindow::unbounded().with_valid_times(Some(at(13)), Some(at(18)));
        let pool = supplier(window, Duration::zero()).get().unwrap();
        assert!(pool.left.is_empty());
        assert_eq!(pool.event_count(), 12);
    }
}
