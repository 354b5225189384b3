/// Ensemble forecasts: one series per feature and reference time, with the
/// member rows at each valid time combined into one `Ensemble` value.
///
/// Members are ordered by ensemble id, so every value of every series lists
/// its members in the same stable order.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::EnsembleFilter;
use crate::error::RetrievalError;
use crate::model::{Ensemble, Event, Labels, TimeSeries, TimeSeriesBuilder};
use crate::retrieval::builder::{group_rows, reference_times, SeriesSource};
use crate::retrieval::{series_iter, unsupported, IdentifierIter, Retriever, RetrieverKind, TimeSeriesIter};
use crate::store::TimeSeriesRow;

const NO_IDENTIFIERS: &str = "Retrieval of ensemble time-series by identifier is not currently possible because there is no identifier for ensemble time-series in the WRES database.";

// ---------------------------------------------------------------------------
// Member filter
// ---------------------------------------------------------------------------

/// Member labels to keep. An empty include set keeps every member not
/// excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl MemberFilter {
    pub fn new(include: impl IntoIterator<Item = String>, exclude: impl IntoIterator<Item = String>) -> Self {
        MemberFilter {
            include: include.into_iter().collect(),
            exclude: exclude.into_iter().collect(),
        }
    }

    pub fn admits(&self, label: &str) -> bool {
        (self.include.is_empty() || self.include.contains(label)) && !self.exclude.contains(label)
    }
}

impl From<&EnsembleFilter> for MemberFilter {
    fn from(filter: &EnsembleFilter) -> Self {
        MemberFilter::new(filter.include.iter().cloned(), filter.exclude.iter().cloned())
    }
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

pub struct EnsembleForecastRetriever {
    source: SeriesSource,
    filter: MemberFilter,
}

impl EnsembleForecastRetriever {
    pub(crate) fn new(source: SeriesSource, filter: MemberFilter) -> Self {
        EnsembleForecastRetriever { source, filter }
    }

    fn ensemble_series(&self, rows: &[&TimeSeriesRow]) -> Result<Option<TimeSeries<Ensemble>>, RetrievalError> {
        let mut by_valid_time: BTreeMap<DateTime<Utc>, Vec<&TimeSeriesRow>> = BTreeMap::new();
        for row in rows {
            by_valid_time.entry(row.valid_time).or_default().push(*row);
        }

        let mut builder = TimeSeriesBuilder::new(self.source.metadata(rows, reference_times(rows[0]))?);
        let ensembles = &self.source.caches.ensembles;
        for (valid_time, members) in by_valid_time {
            let mut ordered = Vec::with_capacity(members.len());
            for member in members {
                let ensemble_id = member.ensemble_id.ok_or_else(|| {
                    RetrievalError::InvalidSeries(format!(
                        "series {} has an ensemble row without a member identity",
                        member.series_id
                    ))
                })?;
                ordered.push((ensembles.ordinal_of(ensemble_id)?, ensemble_id, member));
            }
            ordered.sort_by_key(|(ordinal, _, _)| *ordinal);
            if let Some(pair) = ordered.windows(2).find(|pair| pair[0].1 == pair[1].1) {
                return Err(RetrievalError::InvalidSeries(format!(
                    "member {} appears twice at {}",
                    pair[0].1, valid_time
                )));
            }

            let mut values = Vec::with_capacity(ordered.len());
            let mut labels = Vec::with_capacity(ordered.len());
            for (_, ensemble_id, member) in ordered {
                let label = ensembles.label_of(ensemble_id)?;
                if !self.filter.admits(&label) {
                    continue;
                }
                values.push(self.source.value(member)?);
                labels.push(label);
            }

            if !values.is_empty() {
                builder.add_event(Event::of(valid_time, Ensemble::of(values, Labels::of(labels))?))?;
            }
        }

        Ok((!builder.is_empty()).then(|| builder.build()))
    }
}

impl Retriever<Ensemble> for EnsembleForecastRetriever {
    fn kind(&self) -> RetrieverKind {
        RetrieverKind::EnsembleForecast
    }

    fn get(&self) -> Result<TimeSeriesIter<Ensemble>, RetrievalError> {
        let feature_ids = self.source.feature_ids()?;
        if feature_ids.is_empty() {
            return Ok(series_iter(Vec::new()));
        }

        let rows = self.source.fetch(&self.source.forecast_query(feature_ids))?;
        let mut series = Vec::new();
        for rows in group_rows(&rows, |row| (row.feature_id, row.reference_time)).values() {
            if let Some(ensemble) = self.ensemble_series(rows)? {
                series.push(ensemble);
            }
        }
        Ok(series_iter(series))
    }

    fn get_by_id(&self, _id: i64) -> Result<TimeSeriesIter<Ensemble>, RetrievalError> {
        unsupported(NO_IDENTIFIERS)
    }

    fn get_by_ids(&self, _ids: &[i64]) -> Result<TimeSeriesIter<Ensemble>, RetrievalError> {
        unsupported(NO_IDENTIFIERS)
    }

    fn identifiers(&self) -> Result<IdentifierIter, RetrievalError> {
        unsupported(NO_IDENTIFIERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_filter_include_and_exclude() {
        let everything = MemberFilter::default();
        assert!(everything.admits("1985"));

        let include = MemberFilter::new(vec!["1985".to_string(), "1986".to_string()], Vec::new());
        assert!(include.admits("1986"));
        assert!(!include.admits("1987"));

        let exclude = MemberFilter::new(Vec::new(), vec!["1985".to_string()]);
        assert!(!exclude.admits("1985"));
        assert!(exclude.admits("1986"));
    }

    #[test]
    fn test_member_filter_from_declaration() {
        let filter = MemberFilter::from(&EnsembleFilter {
            include: Vec::new(),
            exclude: vec!["2001".to_string()],
        });
        assert!(!filter.admits("2001"));
    }
}
