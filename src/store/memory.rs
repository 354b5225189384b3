/// In-memory store used by tests and dry runs.
///
/// Applies the same `RowQuery::admits` rule the SQL in `store::pg`
/// encodes, and counts every query so callers can check how often a pool
/// or a caching retriever actually reached the store.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::RetrievalError;
use crate::model::Feature;
use crate::store::{RowQuery, TimeSeriesRow, TimeSeriesStore};

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<TimeSeriesRow>>,
    features: RwLock<BTreeMap<i64, Feature>>,
    units: RwLock<HashMap<i64, String>>,
    ensembles: RwLock<HashMap<i64, String>>,
    queries: AtomicUsize,
    lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn add_feature(&self, feature_id: i64, name: &str) {
        self.features.write().insert(feature_id, Feature::of(name));
    }

    pub fn add_unit(&self, unit_id: i64, name: &str) {
        self.units.write().insert(unit_id, name.to_string());
    }

    pub fn add_ensemble(&self, ensemble_id: i64, label: &str) {
        self.ensembles.write().insert(ensemble_id, label.to_string());
    }

    pub fn add_row(&self, row: TimeSeriesRow) {
        self.rows.write().push(row);
    }

    pub fn add_rows(&self, rows: impl IntoIterator<Item = TimeSeriesRow>) {
        self.rows.write().extend(rows);
    }

    /// Number of row and series-id queries served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of feature, unit and ensemble lookups served.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl TimeSeriesStore for MemoryStore {
    fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<TimeSeriesRow>, RetrievalError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| query.admits(row))
            .cloned()
            .collect())
    }

    fn series_ids(&self, query: &RowQuery) -> Result<Vec<i64>, RetrievalError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let ids: BTreeSet<i64> = self
            .rows
            .read()
            .iter()
            .filter(|row| query.admits(row))
            .map(|row| row.series_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn features_named(&self, names: &[String]) -> Result<Vec<(i64, Feature)>, RetrievalError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .features
            .read()
            .iter()
            .filter(|(_, feature)| names.contains(&feature.name))
            .map(|(id, feature)| (*id, feature.clone()))
            .collect())
    }

    fn measurement_unit_name(&self, unit_id: i64) -> Result<Option<String>, RetrievalError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.units.read().get(&unit_id).cloned())
    }

    fn ensemble_name(&self, ensemble_id: i64) -> Result<Option<String>, RetrievalError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.ensembles.read().get(&ensemble_id).cloned())
    }
}
