/// Memoizing retriever.
///
/// The first `get` runs the delegate and keeps the whole result; every later
/// `get` replays it. The cache is a single unsynchronized slot, so a
/// `CachingRetriever` is not `Sync`: share it across threads inside a
/// `parking_lot::Mutex`, which serializes the first read.

use std::cell::OnceCell;
use std::sync::Arc;

use crate::error::RetrievalError;
use crate::model::TimeSeries;
use crate::retrieval::{IdentifierIter, Retriever, RetrieverKind, TimeSeriesIter};

pub struct CachingRetriever<T, R> {
    delegate: R,
    cache: OnceCell<Arc<Vec<TimeSeries<T>>>>,
}

impl<T, R: Retriever<T>> CachingRetriever<T, R> {
    pub fn of(delegate: R) -> Self {
        CachingRetriever {
            delegate,
            cache: OnceCell::new(),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache.get().is_some()
    }

    /// A failed first read leaves the cache empty, so the next `get` tries
    /// the delegate again.
    fn cached(&self) -> Result<Arc<Vec<TimeSeries<T>>>, RetrievalError> {
        if let Some(series) = self.cache.get() {
            return Ok(Arc::clone(series));
        }
        let series: Arc<Vec<TimeSeries<T>>> = Arc::new(self.delegate.get()?.collect());
        log::debug!("cached {} {} series", series.len(), self.delegate.kind());
        Ok(Arc::clone(self.cache.get_or_init(|| series)))
    }
}

impl<T, R> Retriever<T> for CachingRetriever<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Retriever<T>,
{
    fn kind(&self) -> RetrieverKind {
        self.delegate.kind()
    }

    fn get(&self) -> Result<TimeSeriesIter<T>, RetrievalError> {
        let series = self.cached()?;
        Ok(Box::new((0..series.len()).map(move |i| series[i].clone())))
    }

    fn get_by_id(&self, id: i64) -> Result<TimeSeriesIter<T>, RetrievalError> {
        self.delegate.get_by_id(id)
    }

    fn get_by_ids(&self, ids: &[i64]) -> Result<TimeSeriesIter<T>, RetrievalError> {
        self.delegate.get_by_ids(ids)
    }

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
        self.delegate.identifiers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, Feature, TimeSeriesMetadata};
    use crate::retrieval::series_iter;
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use std::collections::BTreeMap;

    /// Counts delegate calls and fails the first `fail_first` of them.
    struct CountingRetriever {
        calls: Cell<usize>,
        fail_first: usize,
    }

    impl CountingRetriever {
        fn new(fail_first: usize) -> Self {
            CountingRetriever {
                calls: Cell::new(0),
                fail_first,
            }
        }
    }

    impl Retriever<f64> for CountingRetriever {
        fn kind(&self) -> RetrieverKind {
            RetrieverKind::Observation
        }

        fn get(&self) -> Result<TimeSeriesIter<f64>, RetrievalError> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() <= self.fail_first {
                return Err(RetrievalError::Store("connection reset".to_string()));
            }
            let metadata = TimeSeriesMetadata::of(BTreeMap::new(), None, "QINE", Feature::of("DRRC2"), "CMS");
            let valid_time = Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap();
            let series = TimeSeries::of(metadata, vec![Event::of(valid_time, self.calls.get() as f64)])?;
            Ok(series_iter(vec![series]))
        }

        fn get_by_id(&self, _id: i64) -> Result<TimeSeriesIter<f64>, RetrievalError> {
            Ok(series_iter(Vec::new()))
        }

        fn get_by_ids(&self, _ids: &[i64]) -> Result<TimeSeriesIter<f64>, RetrievalError> {
            Ok(series_iter(Vec::new()))
        }

        fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
            Ok(Box::new(vec![1, 2].into_iter()))
        }
    }

    #[test]
    fn test_delegate_runs_once() {
        let caching: CachingRetriever<f64, _> = CachingRetriever::of(CountingRetriever::new(0));
        let first: Vec<_> = caching.get().unwrap().collect();
        for _ in 0..4 {
            let again: Vec<_> = caching.get().unwrap().collect();
            assert_eq!(again, first, "Replayed series should equal the first read");
        }
        assert_eq!(caching.delegate.calls.get(), 1);
        assert!(caching.is_cached());
    }

    #[test]
    fn test_failed_read_is_not_cached() {
        let caching: CachingRetriever<f64, _> = CachingRetriever::of(CountingRetriever::new(1));
        assert!(caching.get().is_err());
        assert!(!caching.is_cached());

        let series: Vec<_> = caching.get().unwrap().collect();
        assert_eq!(series[0].events()[0].value, 2.0);
        assert_eq!(caching.delegate.calls.get(), 2);
    }

    #[test]
    fn test_identifiers_pass_through() {
        let caching: CachingRetriever<f64, _> = CachingRetriever::of(CountingRetriever::new(0));
        assert_eq!(caching.identifiers().unwrap().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(caching.kind(), RetrieverKind::Observation);
    }
}
