//! Map-over-partitions primitive shared by the parallel stages.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub stage: String,
    pub unit: String,
    pub message: String,
}

#[derive(Debug)]
pub struct PartitionOutcome<R> {
    // successful units only, in unit order
    pub results: Vec<R>,
    pub failures: Vec<UnitFailure>,
}

// One rayon pool per run, shared by every parallel stage.
#[derive(Debug)]
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, PipelineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    // Results keep unit order whatever the pool size. Recoverable errors and panics
    // become UnitFailures; the first fatal error in unit order aborts the stage.
    pub fn map_partitions<U, R, K, F>(
        &self,
        stage: &str,
        units: &[U],
        unit_key: K,
        f: F,
    ) -> Result<PartitionOutcome<R>, PipelineError>
    where
        U: Sync,
        R: Send,
        K: Fn(&U) -> String + Sync,
        F: Fn(&U) -> Result<R, PipelineError> + Sync,
    {
        let outcomes: Vec<Result<Result<R, PipelineError>, String>> = self.pool.install(|| {
            units
                .par_iter()
                .map(|unit| catch_unwind(AssertUnwindSafe(|| f(unit))).map_err(panic_message))
                .collect()
        });

        let mut out = PartitionOutcome {
            results: Vec::with_capacity(units.len()),
            failures: Vec::new(),
        };
        for (unit, outcome) in units.iter().zip(outcomes) {
            let message = match outcome {
                Ok(Ok(result)) => {
                    out.results.push(result);
                    continue;
                }
                Ok(Err(err)) if err.is_fatal() => return Err(err),
                Ok(Err(err)) => err.to_string(),
                Err(panic) => format!("worker panicked: {panic}"),
            };

            let key = unit_key(unit);
            warn!(
                component = "pool",
                event = "pool.unit.failed",
                stage,
                unit = %key,
                message = %message
            );
            out.failures.push(UnitFailure {
                stage: stage.to_string(),
                unit: key,
                message,
            });
        }

        Ok(out)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
