/// Identity caches over the store's lookup tables.
///
/// Features, measurement units and ensemble members are resolved by id on
/// almost every row, so each lookup table is read through once and kept.
/// The caches are plain objects owned by whoever builds the retrievers;
/// nothing here is global.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RetrievalError;
use crate::model::Feature;
use crate::store::TimeSeriesStore;

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

pub struct FeatureCache {
    store: Arc<dyn TimeSeriesStore>,
    ids_by_name: RwLock<HashMap<String, i64>>,
    features_by_id: RwLock<HashMap<i64, Feature>>,
}

impl FeatureCache {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        FeatureCache {
            store,
            ids_by_name: RwLock::new(HashMap::new()),
            features_by_id: RwLock::new(HashMap::new()),
        }
    }

    /// Ids of the given features. Features the store does not know are
    /// skipped, since they simply have no data.
    pub fn resolve(&self, features: &[Feature]) -> Result<Vec<i64>, RetrievalError> {
        let missing: Vec<String> = {
            let known = self.ids_by_name.read();
            features
                .iter()
                .filter(|f| !known.contains_key(&f.name))
                .map(|f| f.name.clone())
                .collect()
        };

        if !missing.is_empty() {
            let found = self.store.features_named(&missing)?;
            let mut ids_by_name = self.ids_by_name.write();
            let mut features_by_id = self.features_by_id.write();
            for (id, feature) in found {
                ids_by_name.insert(feature.name.clone(), id);
                features_by_id.insert(id, feature);
            }
        }

        let known = self.ids_by_name.read();
        let mut ids = Vec::with_capacity(features.len());
        for feature in features {
            match known.get(&feature.name) {
                Some(id) => ids.push(*id),
                None => log::debug!("feature {} is not present in the store", feature.name),
            }
        }
        Ok(ids)
    }

    /// A feature previously resolved by name.
    pub fn feature(&self, feature_id: i64) -> Result<Feature, RetrievalError> {
        self.features_by_id
            .read()
            .get(&feature_id)
            .cloned()
            .ok_or_else(|| RetrievalError::MissingIdentity(format!("feature id {}", feature_id)))
    }
}

// ---------------------------------------------------------------------------
// Measurement units
// ---------------------------------------------------------------------------

pub struct MeasurementUnitCache {
    store: Arc<dyn TimeSeriesStore>,
    names: RwLock<HashMap<i64, String>>,
}

impl MeasurementUnitCache {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        MeasurementUnitCache {
            store,
            names: RwLock::new(HashMap::new()),
        }
    }

    pub fn name_of(&self, unit_id: i64) -> Result<String, RetrievalError> {
        if let Some(name) = self.names.read().get(&unit_id) {
            return Ok(name.clone());
        }
        let name = self.store.measurement_unit_name(unit_id)?.ok_or_else(|| {
            RetrievalError::MissingIdentity(format!("measurement unit id {}", unit_id))
        })?;
        self.names.write().insert(unit_id, name.clone());
        Ok(name)
    }
}

// ---------------------------------------------------------------------------
// Ensemble members
// ---------------------------------------------------------------------------

/// Member labels by ensemble id. Members are ordered by id, which gives
/// every ensemble value a stable member order independent of row order.
pub struct EnsembleCache {
    store: Arc<dyn TimeSeriesStore>,
    labels: RwLock<HashMap<i64, String>>,
}

impl EnsembleCache {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        EnsembleCache {
            store,
            labels: RwLock::new(HashMap::new()),
        }
    }

    pub fn label_of(&self, ensemble_id: i64) -> Result<String, RetrievalError> {
        if let Some(label) = self.labels.read().get(&ensemble_id) {
            return Ok(label.clone());
        }
        let label = self.store.ensemble_name(ensemble_id)?.ok_or_else(|| {
            RetrievalError::MissingIdentity(format!("ensemble id {}", ensemble_id))
        })?;
        self.labels.write().insert(ensemble_id, label.clone());
        Ok(label)
    }

    /// Position of a member within every ensemble value. Unknown members are
    /// a `MissingIdentity` error.
    pub fn ordinal_of(&self, ensemble_id: i64) -> Result<i64, RetrievalError> {
        self.label_of(ensemble_id)?;
        Ok(ensemble_id)
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// The three caches over one store, shared by every retriever built for an
/// evaluation.
#[derive(Clone)]
pub struct StoreCaches {
    pub features: Arc<FeatureCache>,
    pub units: Arc<MeasurementUnitCache>,
    pub ensembles: Arc<EnsembleCache>,
}

impl StoreCaches {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        StoreCaches {
            features: Arc::new(FeatureCache::new(Arc::clone(&store))),
            units: Arc::new(MeasurementUnitCache::new(Arc::clone(&store))),
            ensembles: Arc::new(EnsembleCache::new(store)),
        }
    }
}
