/// Retriever factories.
///
/// A factory turns the declaration's dataset for one orientation into a
/// configured retriever, choosing the variant from the declared data type.
/// Without an explicit window the declaration's overall bounds apply.

use std::sync::Arc;

use crate::config::{Dataset, Declaration};
use crate::error::RetrievalError;
use crate::model::{DataType, DatasetOrientation, Feature};
use crate::retrieval::{
    AnalysisRetriever, EnsembleForecastRetriever, IdentifierIter, ObservationRetriever, Retriever,
    RetrieverBuilder, RetrieverKind, SingleValuedForecastRetriever, TimeSeriesIter,
};
use crate::store::caches::StoreCaches;
use crate::store::TimeSeriesStore;
use crate::time_window::TimeWindow;
use crate::units::UnitMapper;

// ---------------------------------------------------------------------------
// Single-valued retriever variants
// ---------------------------------------------------------------------------

/// The closed set of retrievers yielding single-valued series.
pub enum SingleValuedRetriever {
    Observation(ObservationRetriever),
    Forecast(SingleValuedForecastRetriever),
    Analysis(AnalysisRetriever),
}

impl Retriever<f64> for SingleValuedRetriever {
    fn kind(&self) -> RetrieverKind {
        match self {
            SingleValuedRetriever::Observation(r) => r.kind(),
            SingleValuedRetriever::Forecast(r) => r.kind(),
            SingleValuedRetriever::Analysis(r) => r.kind(),
        }
    }

    fn get(&self) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        match self {
            SingleValuedRetriever::Observation(r) => r.get(),
            SingleValuedRetriever::Forecast(r) => r.get(),
            SingleValuedRetriever::Analysis(r) => r.get(),
        }
    }

    fn get_by_id(&self, id: i64) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        match self {
            SingleValuedRetriever::Observation(r) => r.get_by_id(id),
            SingleValuedRetriever::Forecast(r) => r.get_by_id(id),
            SingleValuedRetriever::Analysis(r) => r.get_by_id(id),
        }
    }

    fn get_by_ids(&self, ids: &[i64]) -> Result<TimeSeriesIter<f64>, RetrievalError> {
        match self {
            SingleValuedRetriever::Observation(r) => r.get_by_ids(ids),
            SingleValuedRetriever::Forecast(r) => r.get_by_ids(ids),
            SingleValuedRetriever::Analysis(r) => r.get_by_ids(ids),
        }
    }

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
        match self {
            SingleValuedRetriever::Observation(r) => r.identifiers(),
            SingleValuedRetriever::Forecast(r) => r.identifiers(),
            SingleValuedRetriever::Analysis(r) => r.identifiers(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared factory state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct FactoryContext {
    declaration: Arc<Declaration>,
    store: Arc<dyn TimeSeriesStore>,
    caches: StoreCaches,
    unit_mapper: Arc<UnitMapper>,
}

impl FactoryContext {
    fn dataset(&self, orientation: DatasetOrientation) -> Result<&Dataset, RetrievalError> {
        self.declaration
            .dataset(orientation)
            .ok_or_else(|| RetrievalError::Declaration(format!("no {} dataset is declared", orientation)))
    }

    fn builder(
        &self,
        orientation: DatasetOrientation,
        dataset: &Dataset,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> RetrieverBuilder {
        let window = window.unwrap_or_else(|| self.declaration.time_window());
        let mut builder = RetrieverBuilder::new(Arc::clone(&self.store), self.caches.clone())
            .variable_name(&dataset.variable)
            .features(features.to_vec())
            .orientation(orientation)
            .time_window(Some(window))
            .unit_mapper(Arc::clone(&self.unit_mapper))
            .declared_time_scale(dataset.existing_time_scale.as_ref().map(|s| s.time_scale()))
            .desired_time_scale(self.declaration.desired_time_scale())
            .season(self.declaration.season);
        if let Some(filter) = &dataset.ensemble_filter {
            builder = builder.member_filter(filter.into());
        }
        builder
    }

    fn single_valued(
        &self,
        orientation: DatasetOrientation,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> Result<SingleValuedRetriever, RetrievalError> {
        let dataset = self.dataset(orientation)?;
        let builder = self.builder(orientation, dataset, features, window);
        match dataset.data_type {
            DataType::Observations | DataType::Simulations => {
                Ok(SingleValuedRetriever::Observation(builder.observation()?))
            }
            DataType::SingleValuedForecasts => {
                Ok(SingleValuedRetriever::Forecast(builder.single_valued_forecast()?))
            }
            DataType::Analyses => {
                let (earliest, latest) = self.declaration.analysis_bounds();
                Ok(SingleValuedRetriever::Analysis(
                    builder
                        .duplicate_policy(self.declaration.duplicate_policy)
                        .analysis_durations(earliest, latest)
                        .analysis()?,
                ))
            }
            DataType::EnsembleForecasts => Err(RetrievalError::Declaration(format!(
                "the {} dataset contains ensemble forecasts, which have no single-valued retriever",
                orientation
            ))),
        }
    }

    fn ensemble(
        &self,
        orientation: DatasetOrientation,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> Result<EnsembleForecastRetriever, RetrievalError> {
        let dataset = self.dataset(orientation)?;
        if dataset.data_type != DataType::EnsembleForecasts {
            return Err(RetrievalError::Declaration(format!(
                "the {} dataset must contain ensemble forecasts, found {:?}",
                orientation, dataset.data_type
            )));
        }
        self.builder(orientation, dataset, features, window).ensemble_forecast()
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

pub struct SingleValuedRetrieverFactory {
    context: FactoryContext,
}

impl SingleValuedRetrieverFactory {
    pub fn new(
        declaration: Arc<Declaration>,
        store: Arc<dyn TimeSeriesStore>,
        caches: StoreCaches,
        unit_mapper: Arc<UnitMapper>,
    ) -> Self {
        SingleValuedRetrieverFactory {
            context: FactoryContext {
                declaration,
                store,
                caches,
                unit_mapper,
            },
        }
    }

    pub fn get_left_retriever(
        &self,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> Result<SingleValuedRetriever, RetrievalError> {
        self.context.single_valued(DatasetOrientation::Left, features, window)
    }

    pub fn get_right_retriever(
        &self,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> Result<SingleValuedRetriever, RetrievalError> {
        self.context.single_valued(DatasetOrientation::Right, features, window)
    }

    pub fn get_baseline_retriever(
        &self,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> Result<SingleValuedRetriever, RetrievalError> {
        self.context.single_valued(DatasetOrientation::Baseline, features, window)
    }
}

/// Ensemble forecasts on the right and baseline, single-valued data on the
/// left.
pub struct EnsembleRetrieverFactory {
    context: FactoryContext,
}

impl EnsembleRetrieverFactory {
    pub fn new(
        declaration: Arc<Declaration>,
        store: Arc<dyn TimeSeriesStore>,
        caches: StoreCaches,
        unit_mapper: Arc<UnitMapper>,
    ) -> Self {
        EnsembleRetrieverFactory {
            context: FactoryContext {
                declaration,
                store,
                caches,
                unit_mapper,
            },
        }
    }

    pub fn get_left_retriever(
        &self,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> Result<SingleValuedRetriever, RetrievalError> {
        self.context.single_valued(DatasetOrientation::Left, features, window)
    }

    pub fn get_right_retriever(
        &self,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> Result<EnsembleForecastRetriever, RetrievalError> {
        self.context.ensemble(DatasetOrientation::Right, features, window)
    }

    pub fn get_baseline_retriever(
        &self,
        features: &[Feature],
        window: Option<TimeWindow>,
    ) -> Result<EnsembleForecastRetriever, RetrievalError> {
        self.context.ensemble(DatasetOrientation::Baseline, features, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    const DECLARATION: &str = r#"
unit = "CMS"

[left]
variable = "QINE"
type = "observations"

[right]
variable = "QINE"
type = "analyses"

[baseline]
variable = "QINE"
type = "single_valued_forecasts"

[[features]]
left = "DRRC2"
right = "DRRC2"
baseline = "DRRC2"
"#;

    fn factory(contents: &str) -> SingleValuedRetrieverFactory {
        let declaration = Arc::new(Declaration::from_toml_str(contents).unwrap());
        let store: Arc<dyn TimeSeriesStore> = Arc::new(MemoryStore::new());
        let caches = StoreCaches::new(Arc::clone(&store));
        let mapper = Arc::new(UnitMapper::of(Arc::clone(&caches.units), "CMS").unwrap());
        SingleValuedRetrieverFactory::new(declaration, store, caches, mapper)
    }

    #[test]
    fn test_retriever_variant_follows_data_type() {
        let factory = factory(DECLARATION);
        let features = [Feature::of("DRRC2")];
        assert_eq!(
            factory.get_left_retriever(&features, None).unwrap().kind(),
            RetrieverKind::Observation
        );
        assert_eq!(
            factory.get_right_retriever(&features, None).unwrap().kind(),
            RetrieverKind::Analysis
        );
        assert_eq!(
            factory.get_baseline_retriever(&features, None).unwrap().kind(),
            RetrieverKind::SingleValuedForecast
        );
    }

    #[test]
    fn test_missing_baseline_is_declaration_error() {
        let without_baseline = DECLARATION
            .replace("[baseline]\nvariable = \"QINE\"\ntype = \"single_valued_forecasts\"\n", "");
        let factory = factory(&without_baseline);
        assert!(matches!(
            factory.get_baseline_retriever(&[Feature::of("DRRC2")], None),
            Err(RetrievalError::Declaration(_))
        ));
    }

    #[test]
    fn test_ensemble_data_has_no_single_valued_retriever() {
        let ensemble_right = DECLARATION.replace("type = \"analyses\"", "type = \"ensemble_forecasts\"");
        let factory = factory(&ensemble_right);
        assert!(factory.get_right_retriever(&[Feature::of("DRRC2")], None).is_err());
    }
}
