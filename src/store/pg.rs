/// PostgreSQL-backed time-series store.
///
/// Reads the tables described in `sql/001_time_series.sql`. Connections come
/// from a small bounded pool: at most `max_pool_size` clients are open at
/// once and callers block until one is free, up to the acquire timeout.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Condvar, Mutex};
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};
use std::time::Instant;

use crate::config::DatabaseSettings;
use crate::error::RetrievalError;
use crate::model::{DatasetOrientation, Feature, ReferenceTimeType, TimeScale, TimeScaleFunction};
use crate::store::{RowQuery, TimeSeriesRow, TimeSeriesStore};

type SqlParams = Vec<Box<dyn ToSql + Sync>>;

const ROW_COLUMNS: &str = "S.series_id, S.feature_id, S.variable_name, S.orientation, \
     S.measurement_unit_id, S.ensemble_id, S.reference_time, S.reference_time_type, \
     V.lead_minutes, V.valid_time, V.value, S.scale_period_minutes, S.scale_function";

const ROW_SOURCE: &str = "hydro.time_series S \
     JOIN hydro.time_series_values V ON V.series_id = S.series_id";

// ---------------------------------------------------------------------------
// Connection pool
// ---------------------------------------------------------------------------

struct PoolState {
    idle: Vec<Client>,
    opened: usize,
}

pub struct PgStore {
    url: String,
    max_pool_size: usize,
    acquire_timeout: std::time::Duration,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PgStore {
    /// Opens the first connection immediately so bad settings fail early.
    pub fn connect(settings: &DatabaseSettings) -> Result<Self, RetrievalError> {
        let client = Client::connect(&settings.url, NoTls)?;
        log::info!(
            "connected to time-series database (pool size {})",
            settings.max_pool_size
        );
        Ok(PgStore {
            url: settings.url.clone(),
            max_pool_size: settings.max_pool_size.max(1),
            acquire_timeout: settings.acquire_timeout,
            state: Mutex::new(PoolState {
                idle: vec![client],
                opened: 1,
            }),
            available: Condvar::new(),
        })
    }

    fn acquire(&self) -> Result<Client, RetrievalError> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(client) = state.idle.pop() {
                return Ok(client);
            }
            if state.opened < self.max_pool_size {
                state.opened += 1;
                drop(state);
                return Client::connect(&self.url, NoTls).map_err(|e| {
                    self.state.lock().opened -= 1;
                    self.available.notify_one();
                    RetrievalError::from(e)
                });
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(RetrievalError::Store(format!(
                    "timed out after {:?} waiting for a database connection",
                    self.acquire_timeout
                )));
            }
        }
    }

    fn release(&self, client: Client) {
        let mut state = self.state.lock();
        if client.is_closed() {
            state.opened -= 1;
        } else {
            state.idle.push(client);
        }
        drop(state);
        self.available.notify_one();
    }

    fn with_client<T>(
        &self,
        work: impl FnOnce(&mut Client) -> Result<T, postgres::Error>,
    ) -> Result<T, RetrievalError> {
        let mut client = self.acquire()?;
        let result = work(&mut client);
        self.release(client);
        Ok(result?)
    }
}

// ---------------------------------------------------------------------------
// SQL construction
// ---------------------------------------------------------------------------

/// Appends a `(lower, upper]` condition on `column`, or equality when the
/// bounds coincide. Nullable columns let NULL through.
fn push_bounds<T>(
    clauses: &mut Vec<String>,
    params: &mut SqlParams,
    column: &str,
    lower: Option<T>,
    upper: Option<T>,
    nullable: bool,
) where
    T: ToSql + Sync + PartialEq + Copy + 'static,
{
    let mut conditions = Vec::new();
    match (lower, upper) {
        (Some(lower), Some(upper)) if lower == upper => {
            params.push(Box::new(lower));
            conditions.push(format!("{} = ${}", column, params.len()));
        }
        _ => push_range(&mut conditions, params, column, lower, upper),
    }
    push_conditions(clauses, column, conditions, nullable);
}

/// Lead bounds against `lead_minutes`. Stored leads are whole minutes, and
/// a whole-minute lead is above (or at most) a bound exactly when it is
/// above (or at most) the bound floored to the minute. Equal bounds select
/// one exact lead, which matches nothing unless it is a whole minute.
fn push_lead_bounds(
    clauses: &mut Vec<String>,
    params: &mut SqlParams,
    lower: Option<Duration>,
    upper: Option<Duration>,
) {
    const COLUMN: &str = "V.lead_minutes";
    let minutes = |d: Duration| d.num_seconds().div_euclid(60);

    let mut conditions = Vec::new();
    match (lower, upper) {
        (Some(lower), Some(upper)) if lower == upper => {
            if Duration::minutes(minutes(lower)) == lower {
                params.push(Box::new(minutes(lower)));
                conditions.push(format!("{} = ${}", COLUMN, params.len()));
            } else {
                conditions.push("FALSE".to_string());
            }
        }
        _ => push_range(&mut conditions, params, COLUMN, lower.map(minutes), upper.map(minutes)),
    }
    push_conditions(clauses, COLUMN, conditions, true);
}

fn push_range<T>(conditions: &mut Vec<String>, params: &mut SqlParams, column: &str, lower: Option<T>, upper: Option<T>)
where
    T: ToSql + Sync + 'static,
{
    if let Some(lower) = lower {
        params.push(Box::new(lower));
        conditions.push(format!("{} > ${}", column, params.len()));
    }
    if let Some(upper) = upper {
        params.push(Box::new(upper));
        conditions.push(format!("{} <= ${}", column, params.len()));
    }
}

fn push_conditions(clauses: &mut Vec<String>, column: &str, conditions: Vec<String>, nullable: bool) {
    if conditions.is_empty() {
        return;
    }
    let condition = conditions.join(" AND ");
    if nullable {
        clauses.push(format!("({} IS NULL OR ({}))", column, condition));
    } else {
        clauses.push(condition);
    }
}

fn where_clause(query: &RowQuery) -> (String, SqlParams) {
    let mut params: SqlParams = Vec::new();
    let mut clauses = Vec::new();

    params.push(Box::new(query.feature_ids.clone()));
    clauses.push(format!("S.feature_id = ANY(${})", params.len()));
    params.push(Box::new(query.variable_name.clone()));
    clauses.push(format!("S.variable_name = ${}", params.len()));
    params.push(Box::new(query.orientation.as_str().to_string()));
    clauses.push(format!("S.orientation = ${}", params.len()));

    if let Some(series_ids) = &query.series_ids {
        params.push(Box::new(series_ids.clone()));
        clauses.push(format!("S.series_id = ANY(${})", params.len()));
    }
    if let Some(kind) = query.reference_time_type {
        // Stored names are read leniently (see `ReferenceTimeType::from_name`),
        // so both sides are compared without case, spaces or underscores.
        params.push(Box::new(kind.normalized_name()));
        clauses.push(format!(
            "upper(regexp_replace(S.reference_time_type, '[[:space:]_]', '', 'g')) = ${}",
            params.len()
        ));
    }

    let window = &query.window;
    push_bounds(
        &mut clauses,
        &mut params,
        "V.valid_time",
        window.earliest_valid_time,
        window.latest_valid_time,
        false,
    );
    push_bounds(
        &mut clauses,
        &mut params,
        "S.reference_time",
        window.earliest_reference_time,
        window.latest_reference_time,
        true,
    );
    push_lead_bounds(&mut clauses, &mut params, window.earliest_lead_duration, window.latest_lead_duration);

    (clauses.join("\n  AND "), params)
}

fn param_refs(params: &SqlParams) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p.as_ref()).collect()
}

fn orientation_from_column(name: &str) -> Result<DatasetOrientation, RetrievalError> {
    match name {
        "left" => Ok(DatasetOrientation::Left),
        "right" => Ok(DatasetOrientation::Right),
        "baseline" => Ok(DatasetOrientation::Baseline),
        other => Err(RetrievalError::Store(format!("unknown dataset orientation '{}'", other))),
    }
}

fn row_from_sql(row: &Row) -> Result<TimeSeriesRow, RetrievalError> {
    let orientation: String = row.get(3);
    let reference_time_type: Option<String> = row.get(7);
    let lead_minutes: Option<i64> = row.get(8);
    let scale_period_minutes: Option<i64> = row.get(11);
    let scale_function: Option<String> = row.get(12);

    Ok(TimeSeriesRow {
        series_id: row.get(0),
        feature_id: row.get(1),
        variable_name: row.get(2),
        orientation: orientation_from_column(&orientation)?,
        measurement_unit_id: row.get(4),
        ensemble_id: row.get(5),
        reference_time: row.get::<_, Option<DateTime<Utc>>>(6),
        reference_time_type: reference_time_type
            .as_deref()
            .map(ReferenceTimeType::from_name)
            .unwrap_or(ReferenceTimeType::Unknown),
        lead: lead_minutes.map(Duration::minutes),
        valid_time: row.get::<_, DateTime<Utc>>(9),
        value: row.get(10),
        time_scale: scale_period_minutes.map(|minutes| {
            TimeScale::new(
                Duration::minutes(minutes),
                scale_function
                    .as_deref()
                    .map(TimeScaleFunction::from_name)
                    .unwrap_or(TimeScaleFunction::Unknown),
            )
        }),
    })
}

// ---------------------------------------------------------------------------
// Store implementation
// ---------------------------------------------------------------------------

impl TimeSeriesStore for PgStore {
    fn fetch_rows(&self, query: &RowQuery) -> Result<Vec<TimeSeriesRow>, RetrievalError> {
        let (conditions, params) = where_clause(query);
        let sql = format!(
            "SELECT {}\nFROM {}\nWHERE {}\nORDER BY S.series_id, V.valid_time",
            ROW_COLUMNS, ROW_SOURCE, conditions
        );
        let rows = self.with_client(|client| client.query(sql.as_str(), &param_refs(&params)))?;
        log::debug!(
            "fetched {} rows of {} for {} features ({})",
            rows.len(),
            query.variable_name,
            query.feature_ids.len(),
            query.orientation
        );
        rows.iter().map(row_from_sql).collect()
    }

    fn series_ids(&self, query: &RowQuery) -> Result<Vec<i64>, RetrievalError> {
        let (conditions, params) = where_clause(query);
        let sql = format!(
            "SELECT DISTINCT S.series_id\nFROM {}\nWHERE {}\nORDER BY S.series_id",
            ROW_SOURCE, conditions
        );
        let rows = self.with_client(|client| client.query(sql.as_str(), &param_refs(&params)))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn features_named(&self, names: &[String]) -> Result<Vec<(i64, Feature)>, RetrievalError> {
        let names = names.to_vec();
        let rows = self.with_client(|client| {
            client.query(
                "SELECT feature_id, name, description FROM hydro.features WHERE name = ANY($1)",
                &[&names],
            )
        })?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get(0),
                    Feature {
                        name: row.get(1),
                        description: row.get(2),
                    },
                )
            })
            .collect())
    }

    fn measurement_unit_name(&self, unit_id: i64) -> Result<Option<String>, RetrievalError> {
        let row = self.with_client(|client| {
            client.query_opt(
                "SELECT unit_name FROM hydro.measurement_units WHERE measurement_unit_id = $1",
                &[&unit_id],
            )
        })?;
        Ok(row.map(|row| row.get(0)))
    }

    fn ensemble_name(&self, ensemble_id: i64) -> Result<Option<String>, RetrievalError> {
        let row = self.with_client(|client| {
            client.query_opt(
                "SELECT ensemble_name FROM hydro.ensembles WHERE ensemble_id = $1",
                &[&ensemble_id],
            )
        })?;
        Ok(row.map(|row| row.get(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_window::TimeWindow;
    use chrono::TimeZone;

    #[test]
    fn test_where_clause_without_bounds() {
        let query = RowQuery::new(vec![1, 2], "QINE", DatasetOrientation::Left);
        let (sql, params) = where_clause(&query);
        assert_eq!(
            sql,
            "S.feature_id = ANY($1)\n  AND S.variable_name = $2\n  AND S.orientation = $3"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_where_clause_lead_bounds_in_minutes() {
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Right).with_window(
            TimeWindow::unbounded().with_lead_durations(Some(Duration::hours(0)), Some(Duration::hours(23))),
        );
        let (sql, params) = where_clause(&query);
        assert!(
            sql.contains("(V.lead_minutes IS NULL OR (V.lead_minutes > $4 AND V.lead_minutes <= $5))"),
            "Unexpected lead clause: {}",
            sql
        );
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_where_clause_equal_bounds_use_equality() {
        let instant = Utc.with_ymd_and_hms(2023, 4, 1, 6, 0, 0).unwrap();
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Right)
            .with_window(TimeWindow::unbounded().with_valid_times(Some(instant), Some(instant)));
        let (sql, params) = where_clause(&query);
        assert!(sql.ends_with("V.valid_time = $4"), "Unexpected valid clause: {}", sql);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_where_clause_series_and_reference_type() {
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Right)
            .with_series_ids(vec![42])
            .with_reference_time_type(ReferenceTimeType::AnalysisStartTime);
        let (sql, params) = where_clause(&query);
        assert!(sql.contains("S.series_id = ANY($4)"));
        assert!(
            sql.contains("upper(regexp_replace(S.reference_time_type, '[[:space:]_]', '', 'g')) = $5"),
            "Unexpected reference type clause: {}",
            sql
        );
        assert_eq!(format!("{:?}", params[4]), "\"ANALYSISSTARTTIME\"");
    }

    #[test]
    fn test_reference_type_spellings_match_normalized_name() {
        // Every spelling the row reader accepts must equal the SQL parameter
        // once case, spaces and underscores are removed.
        for stored in ["ANALYSIS_START_TIME", "analysis_start_time", "AnalysisStartTime", "analysis start time"] {
            let kind = ReferenceTimeType::from_name(stored);
            assert_eq!(kind, ReferenceTimeType::AnalysisStartTime);
            let normalized: String = stored
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '_')
                .collect::<String>()
                .to_uppercase();
            assert_eq!(normalized, kind.normalized_name());
        }
    }

    #[test]
    fn test_where_clause_sub_minute_lead_bounds() {
        let window = TimeWindow::unbounded().with_lead_durations(Some(Duration::seconds(30)), Some(Duration::seconds(150)));
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Right).with_window(window);
        let (sql, params) = where_clause(&query);
        assert!(sql.contains("(V.lead_minutes IS NULL OR (V.lead_minutes > $4 AND V.lead_minutes <= $5))"));
        // (30s, 150s] admits the stored leads 1m and 2m.
        assert_eq!(format!("{:?}", params[3]), "0");
        assert_eq!(format!("{:?}", params[4]), "2");
    }

    #[test]
    fn test_where_clause_equal_sub_minute_leads_match_nothing() {
        let exact = Duration::seconds(30);
        let query = RowQuery::new(vec![1], "QINE", DatasetOrientation::Right)
            .with_window(TimeWindow::unbounded().with_lead_durations(Some(exact), Some(exact)));
        let (sql, params) = where_clause(&query);
        assert!(sql.ends_with("(V.lead_minutes IS NULL OR (FALSE))"), "Unexpected lead clause: {}", sql);
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_orientation_column_values() {
        assert_eq!(orientation_from_column("baseline").unwrap(), DatasetOrientation::Baseline);
        assert!(orientation_from_column("sideways").is_err());
    }
}
