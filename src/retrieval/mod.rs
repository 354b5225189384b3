/// Retrievers: windowed reads of typed time-series from the store.
///
/// Each retriever variant reshapes store rows into `TimeSeries` for one
/// dataset orientation. `get` issues a fresh query on every call; wrap a
/// retriever in `CachingRetriever` to read once and replay.

pub mod analysis;
pub mod builder;
pub mod caching;
pub mod ensemble;
pub mod factory;
pub mod observation;
pub mod single_valued;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::error::RetrievalError;
use crate::model::TimeSeries;

pub use analysis::AnalysisRetriever;
pub use builder::RetrieverBuilder;
pub use caching::CachingRetriever;
pub use ensemble::{EnsembleForecastRetriever, MemberFilter};
pub use factory::{EnsembleRetrieverFactory, SingleValuedRetriever, SingleValuedRetrieverFactory};
pub use observation::ObservationRetriever;
pub use single_valued::SingleValuedForecastRetriever;

pub type TimeSeriesIter<T> = Box<dyn Iterator<Item = TimeSeries<T>> + Send>;
pub type IdentifierIter = Box<dyn Iterator<Item = i64> + Send>;

// ---------------------------------------------------------------------------
// Retriever kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrieverKind {
    Observation,
    SingleValuedForecast,
    EnsembleForecast,
    Analysis,
}

impl RetrieverKind {
    /// Only single-valued forecasts have a stable per-series identifier.
    pub fn supports_identifiers(self) -> bool {
        matches!(self, RetrieverKind::SingleValuedForecast)
    }
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrieverKind::Observation => write!(f, "observation"),
            RetrieverKind::SingleValuedForecast => write!(f, "single-valued forecast"),
            RetrieverKind::EnsembleForecast => write!(f, "ensemble forecast"),
            RetrieverKind::Analysis => write!(f, "analysis"),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

pub trait Retriever<T> {
    fn kind(&self) -> RetrieverKind;

    /// Every series within the retriever's window. Each call queries again.
    fn get(&self) -> Result<TimeSeriesIter<T>, RetrievalError>;

    fn get_by_id(&self, id: i64) -> Result<TimeSeriesIter<T>, RetrievalError>;

    fn get_by_ids(&self, ids: &[i64]) -> Result<TimeSeriesIter<T>, RetrievalError>;

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError>;
}

impl<T, R: Retriever<T> + ?Sized> Retriever<T> for Arc<R> {
    fn kind(&self) -> RetrieverKind {
        (**self).kind()
    }

    fn get(&self) -> Result<TimeSeriesIter<T>, RetrievalError> {
        (**self).get()
    }

    fn get_by_id(&self, id: i64) -> Result<TimeSeriesIter<T>, RetrievalError> {
        (**self).get_by_id(id)
    }

    fn get_by_ids(&self, ids: &[i64]) -> Result<TimeSeriesIter<T>, RetrievalError> {
        (**self).get_by_ids(ids)
    }

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
        (**self).identifiers()
    }
}

impl<T, R: Retriever<T> + ?Sized> Retriever<T> for Box<R> {
    fn kind(&self) -> RetrieverKind {
        (**self).kind()
    }

    fn get(&self) -> Result<TimeSeriesIter<T>, RetrievalError> {
        (**self).get()
    }

    fn get_by_id(&self, id: i64) -> Result<TimeSeriesIter<T>, RetrievalError> {
        (**self).get_by_id(id)
    }

    fn get_by_ids(&self, ids: &[i64]) -> Result<TimeSeriesIter<T>, RetrievalError> {
        (**self).get_by_ids(ids)
    }

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
        (**self).identifiers()
    }
}

/// Serializes access, which makes a `CachingRetriever` shareable across
/// pool threads.
impl<T, R: Retriever<T>> Retriever<T> for Mutex<R> {
    fn kind(&self) -> RetrieverKind {
        self.lock().kind()
    }

    fn get(&self) -> Result<TimeSeriesIter<T>, RetrievalError> {
        self.lock().get()
    }

    fn get_by_id(&self, id: i64) -> Result<TimeSeriesIter<T>, RetrievalError> {
        self.lock().get_by_id(id)
    }

    fn get_by_ids(&self, ids: &[i64]) -> Result<TimeSeriesIter<T>, RetrievalError> {
        self.lock().get_by_ids(ids)
    }

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
        self.lock().identifiers()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn series_iter<T: Send + 'static>(series: Vec<TimeSeries<T>>) -> TimeSeriesIter<T> {
    Box::new(series.into_iter())
}

pub(crate) fn unsupported<T>(message: &str) -> Result<T, RetrievalError> {
    Err(RetrievalError::UnsupportedIdentifierAccess(message.to_string()))
}
