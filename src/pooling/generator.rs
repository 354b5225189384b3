/// Pool generation.
///
/// Enumerates the pool windows of a declaration and builds one supplier per
/// window. Nothing is read from the store here: retrievers only query when
/// a supplier is asked for its pool.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::Declaration;
use crate::error::RetrievalError;
use crate::model::{DatasetOrientation, Ensemble, Feature, FeatureTuple};
use crate::pooling::supplier::{PoolRetriever, PoolSupplier, SharedRetriever};
use crate::pooling::windows::PoolBoundaries;
use crate::retrieval::{
    CachingRetriever, EnsembleRetrieverFactory, SingleValuedRetriever, SingleValuedRetrieverFactory,
};
use crate::store::caches::StoreCaches;
use crate::store::TimeSeriesStore;
use crate::time_window::TimeWindow;
use crate::units::UnitMapper;

pub struct PoolsGenerator {
    declaration: Arc<Declaration>,
    store: Arc<dyn TimeSeriesStore>,
    caches: StoreCaches,
    unit_mapper: Arc<UnitMapper>,
}

impl PoolsGenerator {
    pub fn new(
        declaration: Arc<Declaration>,
        store: Arc<dyn TimeSeriesStore>,
        caches: StoreCaches,
        unit_mapper: Arc<UnitMapper>,
    ) -> Self {
        PoolsGenerator {
            declaration,
            store,
            caches,
            unit_mapper,
        }
    }

    pub fn time_windows(&self) -> Result<Vec<TimeWindow>, RetrievalError> {
        PoolBoundaries::from_declaration(&self.declaration).time_windows()
    }

    fn features(&self, orientation: DatasetOrientation) -> Vec<Feature> {
        self.declaration
            .feature_tuples()
            .iter()
            .filter_map(|tuple| tuple.get(orientation).cloned())
            .collect()
    }

    /// The left retriever covers every window and reads once for all pools.
    fn shared_left(
        &self,
        left: Result<SingleValuedRetriever, RetrievalError>,
    ) -> Result<SharedRetriever<f64>, RetrievalError> {
        let left: SharedRetriever<f64> = Arc::new(Mutex::new(CachingRetriever::<f64, _>::of(left?)));
        Ok(left)
    }

    fn left_padding(&self) -> chrono::Duration {
        self.declaration
            .desired_time_scale()
            .map(|s| s.period)
            .unwrap_or_else(chrono::Duration::zero)
    }

    pub fn single_valued_pools(&self) -> Result<Vec<PoolSupplier<f64, f64>>, RetrievalError> {
        let windows = self.time_windows()?;
        let factory = SingleValuedRetrieverFactory::new(
            Arc::clone(&self.declaration),
            Arc::clone(&self.store),
            self.caches.clone(),
            Arc::clone(&self.unit_mapper),
        );
        let tuples: Arc<[FeatureTuple]> = self.declaration.feature_tuples().into();
        let right_features = self.features(DatasetOrientation::Right);
        let baseline_features = self.features(DatasetOrientation::Baseline);
        let left = self.shared_left(factory.get_left_retriever(
            &self.features(DatasetOrientation::Left),
            Some(TimeWindow::union(&windows)),
        ))?;

        let mut suppliers = Vec::with_capacity(windows.len());
        for window in windows {
            let right: PoolRetriever<f64> = Box::new(factory.get_right_retriever(&right_features, Some(window))?);
            let baseline: Option<PoolRetriever<f64>> = match self.declaration.baseline {
                Some(_) => {
                    let baseline = factory.get_baseline_retriever(&baseline_features, Some(window))?;
                    Some(Box::new(baseline) as PoolRetriever<f64>)
                }
                None => None,
            };
            suppliers.push(PoolSupplier::new(
                window,
                Arc::clone(&tuples),
                Arc::clone(&left),
                right,
                baseline,
                self.left_padding(),
            ));
        }

        log::info!("generated {} single-valued pools", suppliers.len());
        Ok(suppliers)
    }

    pub fn ensemble_pools(&self) -> Result<Vec<PoolSupplier<f64, Ensemble>>, RetrievalError> {
        let windows = self.time_windows()?;
        let factory = EnsembleRetrieverFactory::new(
            Arc::clone(&self.declaration),
            Arc::clone(&self.store),
            self.caches.clone(),
            Arc::clone(&self.unit_mapper),
        );
        let tuples: Arc<[FeatureTuple]> = self.declaration.feature_tuples().into();
        let right_features = self.features(DatasetOrientation::Right);
        let baseline_features = self.features(DatasetOrientation::Baseline);
        let left = self.shared_left(factory.get_left_retriever(
            &self.features(DatasetOrientation::Left),
            Some(TimeWindow::union(&windows)),
        ))?;

        let mut suppliers = Vec::with_capacity(windows.len());
        for window in windows {
            let right: PoolRetriever<Ensemble> =
                Box::new(factory.get_right_retriever(&right_features, Some(window))?);
            let baseline: Option<PoolRetriever<Ensemble>> = match self.declaration.baseline {
                Some(_) => {
                    let baseline = factory.get_baseline_retriever(&baseline_features, Some(window))?;
                    Some(Box::new(baseline) as PoolRetriever<Ensemble>)
                }
                None => None,
            };
            suppliers.push(PoolSupplier::new(
                window,
                Arc::clone(&tuples),
                Arc::clone(&left),
                right,
                baseline,
                self.left_padding(),
            ));
        }

        log::info!("generated {} ensemble pools", suppliers.len());
        Ok(suppliers)
    }
}
