/// Resolved evaluation declaration and database settings.
///
/// The declaration arrives already resolved (defaults filled, features
/// correlated) as a TOML or JSON document. This module only loads it and
/// checks the few invariants retrieval depends on; the declaration
/// language itself lives elsewhere.
///
/// Database settings come from the environment, with `.env` support:
///   DATABASE_URL            (required)
///   DATABASE_MAX_POOL_SIZE  (default 8)
///   DATABASE_ACQUIRE_TIMEOUT_SECS (default 30)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::model::{
    DataType, DatasetOrientation, DuplicatePolicy, Feature, FeatureTuple, Season, TimeScale,
    TimeScaleFunction,
};
use crate::pooling::windows::TimePools;
use crate::time_window::TimeWindow;

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Seconds,
    Minutes,
    #[default]
    Hours,
    Days,
}

impl DurationUnit {
    /// `None` when `amount` of this unit does not fit a `Duration`.
    pub fn try_duration(self, amount: i64) -> Option<Duration> {
        match self {
            DurationUnit::Seconds => Duration::try_seconds(amount),
            DurationUnit::Minutes => Duration::try_minutes(amount),
            DurationUnit::Hours => Duration::try_hours(amount),
            DurationUnit::Days => Duration::try_days(amount),
        }
    }

    /// Saturates at the `Duration` limits. Validated declarations never
    /// reach them.
    pub fn duration(self, amount: i64) -> Duration {
        self.try_duration(amount)
            .unwrap_or(if amount < 0 { Duration::MIN } else { Duration::MAX })
    }
}

// ---------------------------------------------------------------------------
// Declaration pieces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeScaleDeclaration {
    pub period: i64,
    #[serde(default)]
    pub unit: DurationUnit,
    pub function: TimeScaleFunction,
}

impl TimeScaleDeclaration {
    pub fn time_scale(&self) -> TimeScale {
        TimeScale::new(self.unit.duration(self.period), self.function)
    }
}

/// Ensemble member labels to keep or drop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub variable: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub existing_time_scale: Option<TimeScaleDeclaration>,
    #[serde(default)]
    pub ensemble_filter: Option<EnsembleFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDeclaration {
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub baseline: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadTimes {
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    #[serde(default)]
    pub unit: DurationUnit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub minimum: Option<DateTime<Utc>>,
    pub maximum: Option<DateTime<Utc>>,
}

/// Regular pools along one axis. Frequency defaults to the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDeclaration {
    pub period: i64,
    #[serde(default)]
    pub frequency: Option<i64>,
    #[serde(default)]
    pub unit: DurationUnit,
}

impl PoolDeclaration {
    pub fn time_pools(&self) -> TimePools {
        TimePools::new(
            self.unit.duration(self.period),
            self.frequency.map(|f| self.unit.duration(f)),
        )
    }
}

/// Lead-duration bounds that switch analysis retrieval to snapshot mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDurations {
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    #[serde(default)]
    pub unit: DurationUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitAlias {
    pub alias: String,
    pub unit: String,
}

// ---------------------------------------------------------------------------
// Declaration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub left: Dataset,
    pub right: Dataset,
    #[serde(default)]
    pub baseline: Option<Dataset>,
    pub features: Vec<FeatureDeclaration>,
    #[serde(default)]
    pub lead_times: Option<LeadTimes>,
    #[serde(default)]
    pub reference_dates: Option<DateRange>,
    #[serde(default)]
    pub valid_dates: Option<DateRange>,
    #[serde(default)]
    pub lead_time_pools: Option<PoolDeclaration>,
    #[serde(default)]
    pub reference_date_pools: Option<PoolDeclaration>,
    #[serde(default)]
    pub valid_date_pools: Option<PoolDeclaration>,
    #[serde(default)]
    pub analysis_durations: Option<AnalysisDurations>,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// Desired measurement unit.
    pub unit: String,
    #[serde(default)]
    pub unit_aliases: Vec<UnitAlias>,
    /// Desired time scale.
    #[serde(default)]
    pub time_scale: Option<TimeScaleDeclaration>,
    #[serde(default)]
    pub season: Option<Season>,
}

impl Declaration {
    /// Loads a `.json` file as JSON and anything else as TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let declaration: Declaration = toml::from_str(contents)?;
        declaration.validate()?;
        Ok(declaration)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let declaration: Declaration = serde_json::from_str(contents)?;
        declaration.validate()?;
        Ok(declaration)
    }

    /// Every declared duration amount with its unit, named for messages.
    fn declared_durations(&self) -> Vec<(&'static str, DurationUnit, i64)> {
        let mut amounts = Vec::new();
        if let Some(leads) = &self.lead_times {
            amounts.extend(leads.minimum.map(|m| ("lead_times minimum", leads.unit, m)));
            amounts.extend(leads.maximum.map(|m| ("lead_times maximum", leads.unit, m)));
        }
        for (name, pools) in [
            ("lead_time_pools", &self.lead_time_pools),
            ("reference_date_pools", &self.reference_date_pools),
            ("valid_date_pools", &self.valid_date_pools),
        ] {
            if let Some(pools) = pools {
                amounts.push((name, pools.unit, pools.period));
                amounts.extend(pools.frequency.map(|f| (name, pools.unit, f)));
            }
        }
        if let Some(durations) = &self.analysis_durations {
            amounts.extend(durations.minimum.map(|m| ("analysis_durations minimum", durations.unit, m)));
            amounts.extend(durations.maximum.map(|m| ("analysis_durations maximum", durations.unit, m)));
        }
        let scales = [
            ("left existing_time_scale", self.left.existing_time_scale.as_ref()),
            ("right existing_time_scale", self.right.existing_time_scale.as_ref()),
            (
                "baseline existing_time_scale",
                self.baseline.as_ref().and_then(|b| b.existing_time_scale.as_ref()),
            ),
            ("time_scale", self.time_scale.as_ref()),
        ];
        for (name, scale) in scales {
            amounts.extend(scale.map(|scale| (name, scale.unit, scale.period)));
        }
        amounts
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, unit, amount) in self.declared_durations() {
            if unit.try_duration(amount).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{} of {} {:?} is out of range",
                    name, amount, unit
                )));
            }
        }
        if self.unit.trim().is_empty() {
            return Err(ConfigError::Invalid("the desired unit must not be blank".to_string()));
        }
        if self.features.is_empty() {
            return Err(ConfigError::Invalid("at least one feature is required".to_string()));
        }
        if self.left.data_type == DataType::EnsembleForecasts {
            return Err(ConfigError::Invalid(
                "the left dataset cannot contain ensemble forecasts".to_string(),
            ));
        }
        for (name, dataset) in [("left", Some(&self.left)), ("right", Some(&self.right)), ("baseline", self.baseline.as_ref())] {
            if let Some(dataset) = dataset {
                if dataset.variable.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("the {} variable must not be blank", name)));
                }
            }
        }
        if let Some(baseline) = &self.baseline {
            let right_is_ensemble = self.right.data_type == DataType::EnsembleForecasts;
            let baseline_is_ensemble = baseline.data_type == DataType::EnsembleForecasts;
            if baseline_is_ensemble && !right_is_ensemble {
                return Err(ConfigError::Invalid(
                    "an ensemble baseline requires ensemble forecasts on the right".to_string(),
                ));
            }
        }
        if let Some(leads) = &self.lead_times {
            if let (Some(min), Some(max)) = (leads.minimum, leads.maximum) {
                if min > max {
                    return Err(ConfigError::Invalid(format!(
                        "lead_times minimum {} exceeds maximum {}",
                        min, max
                    )));
                }
            }
        }
        for (name, range) in [("reference_dates", &self.reference_dates), ("valid_dates", &self.valid_dates)] {
            if let Some(DateRange { minimum: Some(min), maximum: Some(max) }) = range {
                if min > max {
                    return Err(ConfigError::Invalid(format!("{} minimum {} is after maximum {}", name, min, max)));
                }
            }
        }
        for (name, pools) in [
            ("lead_time_pools", &self.lead_time_pools),
            ("reference_date_pools", &self.reference_date_pools),
            ("valid_date_pools", &self.valid_date_pools),
        ] {
            if let Some(pools) = pools {
                if pools.period <= 0 {
                    return Err(ConfigError::Invalid(format!("{} period must be positive", name)));
                }
                if pools.frequency.is_some_and(|f| f < 0) {
                    return Err(ConfigError::Invalid(format!("{} frequency must not be negative", name)));
                }
            }
        }
        Ok(())
    }

    pub fn dataset(&self, orientation: DatasetOrientation) -> Option<&Dataset> {
        match orientation {
            DatasetOrientation::Left => Some(&self.left),
            DatasetOrientation::Right => Some(&self.right),
            DatasetOrientation::Baseline => self.baseline.as_ref(),
        }
    }

    /// Ensemble evaluations have ensemble forecasts on the right.
    pub fn is_ensemble(&self) -> bool {
        self.right.data_type == DataType::EnsembleForecasts
    }

    pub fn feature_tuples(&self) -> Vec<FeatureTuple> {
        self.features
            .iter()
            .map(|f| FeatureTuple {
                left: Feature::of(&f.left),
                right: Feature::of(&f.right),
                baseline: f.baseline.as_deref().map(Feature::of),
            })
            .collect()
    }

    pub fn lead_bounds(&self) -> (Option<Duration>, Option<Duration>) {
        match &self.lead_times {
            Some(leads) => (
                leads.minimum.map(|m| leads.unit.duration(m)),
                leads.maximum.map(|m| leads.unit.duration(m)),
            ),
            None => (None, None),
        }
    }

    pub fn reference_bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        self.reference_dates
            .as_ref()
            .map(|r| (r.minimum, r.maximum))
            .unwrap_or((None, None))
    }

    pub fn valid_bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        self.valid_dates
            .as_ref()
            .map(|r| (r.minimum, r.maximum))
            .unwrap_or((None, None))
    }

    /// The window spanning every declared bound, used when no pool window
    /// is given.
    pub fn time_window(&self) -> TimeWindow {
        let (earliest_lead, latest_lead) = self.lead_bounds();
        let (earliest_reference, latest_reference) = self.reference_bounds();
        let (earliest_valid, latest_valid) = self.valid_bounds();
        TimeWindow::unbounded()
            .with_lead_durations(earliest_lead, latest_lead)
            .with_reference_times(earliest_reference, latest_reference)
            .with_valid_times(earliest_valid, latest_valid)
    }

    pub fn analysis_bounds(&self) -> (Option<Duration>, Option<Duration>) {
        match &self.analysis_durations {
            Some(durations) => (
                durations.minimum.map(|m| durations.unit.duration(m)),
                durations.maximum.map(|m| durations.unit.duration(m)),
            ),
            None => (None, None),
        }
    }

    pub fn desired_time_scale(&self) -> Option<TimeScale> {
        self.time_scale.as_ref().map(TimeScaleDeclaration::time_scale)
    }

    pub fn unit_alias_map(&self) -> HashMap<String, String> {
        self.unit_aliases
            .iter()
            .map(|a| (a.alias.clone(), a.unit.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Database settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_pool_size: usize,
    pub acquire_timeout: std::time::Duration,
}

impl DatabaseSettings {
    pub const DEFAULT_MAX_POOL_SIZE: usize = 8;
    pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

    /// Reads settings from the environment after loading `.env`, if any.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_URL".to_string()))?;

        let max_pool_size = match lookup("DATABASE_MAX_POOL_SIZE") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                ConfigError::Invalid(format!("DATABASE_MAX_POOL_SIZE is not a count: {}", raw))
            })?,
            None => Self::DEFAULT_MAX_POOL_SIZE,
        };
        if max_pool_size == 0 {
            return Err(ConfigError::Invalid("DATABASE_MAX_POOL_SIZE must be at least 1".to_string()));
        }

        let timeout_secs = match lookup("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::Invalid(format!("DATABASE_ACQUIRE_TIMEOUT_SECS is not a number: {}", raw))
            })?,
            None => Self::DEFAULT_ACQUIRE_TIMEOUT_SECS,
        };

        Ok(DatabaseSettings {
            url,
            max_pool_size,
            acquire_timeout: std::time::Duration::from_secs(timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const ENSEMBLE_DECLARATION: &str = r#"
unit = "CMS"
duplicate_policy = "keep_latest_reference_time"

[left]
variable = "QINE"
type = "observations"

[right]
variable = "SQIN"
type = "ensemble_forecasts"

[right.ensemble_filter]
exclude = ["1985"]

[[features]]
left = "DRRC2"
right = "DRRC2HSF"

[lead_times]
minimum = 0
maximum = 40
unit = "hours"

[reference_dates]
minimum = "2023-04-01T00:00:00Z"
maximum = "2023-04-04T00:00:00Z"

[lead_time_pools]
period = 23
frequency = 17

[reference_date_pools]
period = 13
frequency = 7

[[unit_aliases]]
alias = "flow"
unit = "[ft_i]3/s"
"#;

    #[test]
    fn test_parse_ensemble_declaration() {
        let declaration = Declaration::from_toml_str(ENSEMBLE_DECLARATION).unwrap();
        assert!(declaration.is_ensemble());
        assert_eq!(declaration.left.data_type, DataType::Observations);
        assert_eq!(
            declaration.lead_bounds(),
            (Some(Duration::hours(0)), Some(Duration::hours(40)))
        );
        assert_eq!(
            declaration.reference_bounds().0,
            Some(Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap())
        );
        let pools = declaration.lead_time_pools.as_ref().unwrap().time_pools();
        assert_eq!(pools.period, Duration::hours(23));
        assert_eq!(pools.frequency, Some(Duration::hours(17)));
        assert_eq!(
            declaration.right.ensemble_filter.as_ref().unwrap().exclude,
            vec!["1985".to_string()]
        );
        assert_eq!(
            declaration.unit_alias_map().get("flow").map(String::as_str),
            Some("[ft_i]3/s")
        );
    }

    #[test]
    fn test_feature_tuples() {
        let declaration = Declaration::from_toml_str(ENSEMBLE_DECLARATION).unwrap();
        let tuples = declaration.feature_tuples();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].left.name, "DRRC2");
        assert_eq!(tuples[0].right.name, "DRRC2HSF");
        assert!(tuples[0].baseline.is_none());
    }

    #[test]
    fn test_blank_unit_is_invalid() {
        let contents = ENSEMBLE_DECLARATION.replace("unit = \"CMS\"", "unit = \"  \"");
        assert!(matches!(
            Declaration::from_toml_str(&contents),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_ensemble_left_is_invalid() {
        let contents = ENSEMBLE_DECLARATION.replacen("type = \"observations\"", "type = \"ensemble_forecasts\"", 1);
        assert!(matches!(
            Declaration::from_toml_str(&contents),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_non_positive_pool_period_is_invalid() {
        let contents = ENSEMBLE_DECLARATION.replace("period = 23", "period = 0");
        assert!(Declaration::from_toml_str(&contents).is_err());
    }

    #[test]
    fn test_out_of_range_durations_are_invalid() {
        let contents = ENSEMBLE_DECLARATION.replace("period = 23", "period = 9223372036854775807");
        match Declaration::from_toml_str(&contents) {
            Err(ConfigError::Invalid(message)) => assert!(message.contains("out of range"), "{}", message),
            other => panic!("expected an invalid declaration, got {:?}", other),
        }
        assert_eq!(DurationUnit::Days.try_duration(i64::MAX), None);
        assert_eq!(DurationUnit::Hours.duration(i64::MAX), Duration::MAX);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(ENSEMBLE_DECLARATION.as_bytes()).unwrap();

        let declaration = Declaration::load(file.path()).unwrap();
        assert_eq!(declaration.unit, "CMS");
    }

    #[test]
    fn test_load_json_round_trip() {
        let declaration = Declaration::from_toml_str(ENSEMBLE_DECLARATION).unwrap();
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(serde_json::to_string(&declaration).unwrap().as_bytes()).unwrap();

        assert_eq!(Declaration::load(file.path()).unwrap(), declaration);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Declaration::load(Path::new("/nonexistent/declaration.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_database_settings_defaults() {
        let settings = DatabaseSettings::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/hydro".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.max_pool_size, DatabaseSettings::DEFAULT_MAX_POOL_SIZE);
        assert_eq!(settings.acquire_timeout, std::time::Duration::from_secs(30));
    }

    #[test]
    fn test_database_settings_require_url() {
        let result = DatabaseSettings::from_lookup(|_| None);
        assert!(matches!(result, Err(ConfigError::MissingEnv(_))));
    }

    #[test]
    fn test_database_settings_reject_zero_pool() {
        let result = DatabaseSettings::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/hydro".to_string()),
            "DATABASE_MAX_POOL_SIZE" => Some("0".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }
}
