/// Retrieves every pool of a declaration and prints a summary.
///
/// Usage: hydro_pools <declaration.toml|json> [--threads N] [--log-file PATH] [--verbose]
///
/// Database settings come from the environment (see `config`).

use log::LevelFilter;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use hydro_pools::config::{DatabaseSettings, Declaration};
use hydro_pools::error::RetrievalError;
use hydro_pools::logging;
use hydro_pools::pooling::{Pool, PoolRunner, PoolSummary, PoolsGenerator};
use hydro_pools::store::caches::StoreCaches;
use hydro_pools::store::pg::PgStore;
use hydro_pools::store::TimeSeriesStore;
use hydro_pools::units::UnitMapper;

const RULE: &str = "═══════════════════════════════════════════════════════════";

struct Args {
    declaration: PathBuf,
    threads: Option<usize>,
    log_file: Option<String>,
    verbose: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut declaration = None;
    let mut threads = None;
    let mut log_file = None;
    let mut verbose = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--threads" => {
                let raw = args.next().ok_or("--threads needs a value")?;
                threads = Some(raw.parse::<usize>().map_err(|_| format!("invalid thread count: {}", raw))?);
            }
            "--log-file" => log_file = Some(args.next().ok_or("--log-file needs a path")?),
            "--verbose" | "-v" => verbose = true,
            other if other.starts_with('-') => return Err(format!("unknown option: {}", other)),
            other => declaration = Some(PathBuf::from(other)),
        }
    }

    Ok(Args {
        declaration: declaration.ok_or("a declaration file is required")?,
        threads,
        log_file,
        verbose,
    })
}

fn print_summary<L, R>(kind: &str, results: &[Result<Pool<L, R>, RetrievalError>]) {
    let summary = PoolSummary::of(results);
    println!("\n{}", RULE);
    println!("📊 POOL SUMMARY ({})", kind);
    println!("{}", RULE);
    println!();
    for result in results {
        match result {
            Ok(pool) => println!("✓ {}  ({} events)", pool.window, pool.event_count()),
            Err(e) => println!("✗ FAILED: {}", e),
        }
    }
    println!();
    let success_rate = if summary.total > 0 {
        (summary.successful as f64 / summary.total as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Pools: {}/{} retrieved  ({} failed, {:.1}%)",
        summary.successful, summary.total, summary.failed, success_rate
    );
    println!("{}", RULE);
}

fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    let declaration = Arc::new(Declaration::load(&args.declaration)?);
    let settings = DatabaseSettings::from_env()?;
    let store: Arc<dyn TimeSeriesStore> = Arc::new(PgStore::connect(&settings)?);
    let caches = StoreCaches::new(Arc::clone(&store));
    let unit_mapper = Arc::new(UnitMapper::with_aliases(
        Arc::clone(&caches.units),
        &declaration.unit,
        declaration.unit_alias_map(),
    )?);

    let generator = PoolsGenerator::new(Arc::clone(&declaration), store, caches, unit_mapper);
    let runner = PoolRunner::new(args.threads);

    let failed = if declaration.is_ensemble() {
        let results = runner.run(generator.ensemble_pools()?)?;
        print_summary("ensemble", &results);
        PoolSummary::of(&results).failed
    } else {
        let results = runner.run(generator.single_valued_pools()?)?;
        print_summary("single-valued", &results);
        PoolSummary::of(&results).failed
    };
    Ok(failed == 0)
}

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("usage: hydro_pools <declaration> [--threads N] [--log-file PATH] [--verbose]");
            process::exit(2);
        }
    };

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    if let Err(e) = logging::init_logger(level, args.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    }
}
