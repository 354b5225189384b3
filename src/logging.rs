/// Structured logging for pool retrieval
///
/// Installs an `env_logger` backend with UTC timestamps and an optional
/// file mirror, and classifies retrieval failures so that expected ones
/// stay quiet while store and configuration problems surface as errors.

use chrono::Utc;
use log::LevelFilter;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use crate::error::RetrievalError;

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the request cannot be served by this retriever
    Expected,
    /// Unexpected failure - indicates store degradation or a configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Copies every record to stderr and to the log file.
struct Mirror {
    file: File,
}

impl Write for Mirror {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Installs the global logger. `RUST_LOG` overrides `level` when set.
///
/// A log file that cannot be opened is reported on stderr and logging
/// continues on the console only.
pub fn init_logger(level: LevelFilter, log_file: Option<&str>) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                record.level(),
                record.target(),
                record.args()
            )
        });

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(Mirror { file })));
            }
            Err(e) => eprintln!("Failed to open log file {}: {}", path, e),
        }
    }

    builder.try_init()
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

pub fn classify_retrieval_failure(err: &RetrievalError) -> FailureType {
    match err {
        // Identifier access on a variant without identifiers
        RetrievalError::UnsupportedIdentifierAccess(_) => FailureType::Expected,
        RetrievalError::Store(_)
        | RetrievalError::WorkerPool(_)
        | RetrievalError::Declaration(_)
        | RetrievalError::NoUnitConversion(_) => FailureType::Unexpected,
        // Bad rows or unknown ids usually mean bad data rather than a fault
        RetrievalError::InvalidSeries(_) | RetrievalError::MissingIdentity(_) => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a retrieval failure with automatic classification
pub fn log_retrieval_failure(context: &str, operation: &str, err: &RetrievalError) {
    let failure_type = classify_retrieval_failure(err);
    let message = format!("[{}] {} failed [{}]: {}", context, operation, failure_type, err);

    match failure_type {
        FailureType::Expected => log::debug!("{}", message),
        FailureType::Unexpected => log::error!("{}", message),
        FailureType::Unknown => log::warn!("{}", message),
    }
}

// ---------------------------------------------------------------------------
// Pool Summary Logging
// ---------------------------------------------------------------------------

pub fn pool_summary_message(total: usize, successful: usize, failed: usize) -> String {
    format!("Pool retrieval complete: {}/{} successful, {} failed", successful, total, failed)
}

/// Log a summary of a pool run
pub fn log_pool_summary(total: usize, successful: usize, failed: usize) {
    let message = pool_summary_message(total, successful, failed);

    if failed == 0 {
        log::info!("{}", message);
    } else if successful == 0 {
        log::error!("{}", message);
    } else {
        log::warn!("{}", message);
    }
}
