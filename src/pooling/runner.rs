/// Bounded execution of pool suppliers.
///
/// `threads` follows the usual rayon convention: `Some(0)` or `Some(1)` runs
/// the suppliers in order on the calling thread, `Some(n)` builds a
/// dedicated pool of `n` workers and `None` uses the global pool. Results
/// come back in supplier order either way.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::error::RetrievalError;
use crate::logging::{log_pool_summary, log_retrieval_failure};
use crate::pooling::supplier::{Pool, PoolSupplier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolRunner {
    threads: Option<usize>,
}

/// Counts of one run, in the shape of a backfill report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl PoolSummary {
    pub fn of<L, R>(results: &[Result<Pool<L, R>, RetrievalError>]) -> Self {
        let failed = results.iter().filter(|r| r.is_err()).count();
        PoolSummary {
            total: results.len(),
            successful: results.len() - failed,
            failed,
        }
    }
}

impl PoolRunner {
    pub fn new(threads: Option<usize>) -> Self {
        PoolRunner { threads }
    }

    /// Retrieves every pool. A failed pool is logged and reported in its
    /// slot without stopping the others; only failing to start the worker
    /// pool is an error.
    pub fn run<L, R>(
        &self,
        suppliers: Vec<PoolSupplier<L, R>>,
    ) -> Result<Vec<Result<Pool<L, R>, RetrievalError>>, RetrievalError>
    where
        L: Clone + Send,
        R: Send,
    {
        let results = match self.threads {
            Some(threads) if threads <= 1 => suppliers.into_iter().map(|s| supply(&s)).collect(),
            Some(threads) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| RetrievalError::WorkerPool(e.to_string()))?;
                pool.install(|| supply_parallel(suppliers))
            }
            None => supply_parallel(suppliers),
        };

        let summary = PoolSummary::of(&results);
        log_pool_summary(summary.total, summary.successful, summary.failed);
        Ok(results)
    }
}

fn supply_parallel<L, R>(suppliers: Vec<PoolSupplier<L, R>>) -> Vec<Result<Pool<L, R>, RetrievalError>>
where
    L: Clone + Send,
    R: Send,
{
    suppliers.into_par_iter().map(|s| supply(&s)).collect()
}

fn supply<L: Clone, R>(supplier: &PoolSupplier<L, R>) -> Result<Pool<L, R>, RetrievalError> {
    supplier.get().inspect_err(|e| {
        log_retrieval_failure(&supplier.window().to_string(), "pool retrieval", e);
    })
}
