//! Parallel execution of independent backtests.
//!
//! Each job owns its ledger and risk controller inside `run_backtest`, so
//! jobs share nothing but the read-only price series. A job that panics is
//! reported as failed; the remaining jobs still complete.

use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use tracing::{debug, error, info};

use super::backtest::{
    BacktestConfig, BacktestResult, CancelToken, run_backtest, run_backtest_with_progress,
};
use super::error::FundlabError;
use super::metrics::{MetricReport, report_for};
use super::price_series::InstrumentSeries;
use super::strategy::StrategySpec;
use super::task_registry::{TaskId, TaskRegistry};

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: String,
    pub spec: StrategySpec,
    pub config: BacktestConfig,
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Completed {
        id: String,
        result: Box<BacktestResult>,
        report: MetricReport,
    },
    Failed {
        id: String,
        reason: String,
    },
}

impl BatchOutcome {
    pub fn id(&self) -> &str {
        match self {
            BatchOutcome::Completed { id, .. } | BatchOutcome::Failed { id, .. } => id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed { .. })
    }
}

/// Run every job against the same universe. Outcomes keep job order.
pub fn run_batch(series: &[InstrumentSeries], jobs: &[BatchJob]) -> Vec<BatchOutcome> {
    run_batch_with(jobs, |job| run_backtest(series, &job.spec, &job.config, None))
}

pub fn run_batch_with<F>(jobs: &[BatchJob], runner: F) -> Vec<BatchOutcome>
where
    F: Fn(&BatchJob) -> Result<BacktestResult, FundlabError> + Sync,
{
    info!(jobs = jobs.len(), "batch started");
    let outcomes: Vec<BatchOutcome> = jobs.par_iter().map(|job| run_job(job, || runner(job))).collect();

    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    info!(completed, failed = outcomes.len() - completed, "batch finished");
    outcomes
}

/// Register one task per job and run the batch, recording status,
/// per-day progress and the outcome in `registry`. Returns the task ids in
/// job order once every job has finished.
///
/// Cancelling a task through the registry stops its run between days; a
/// task cancelled before it starts is skipped.
pub fn run_batch_tracked(
    series: &[InstrumentSeries],
    jobs: &[BatchJob],
    registry: &TaskRegistry<BatchOutcome>,
) -> Vec<TaskId> {
    let tasks: Vec<(TaskId, CancelToken)> = jobs.iter().map(|_| registry.create()).collect();
    info!(jobs = jobs.len(), "tracked batch started");

    jobs.par_iter().zip(tasks.par_iter()).for_each(|(job, (id, cancel))| {
        if !registry.start(*id) {
            debug!(job = %job.id, task = %id, "task finished before start, skipping");
            return;
        }
        let outcome = run_job(job, || {
            run_backtest_with_progress(series, &job.spec, &job.config, Some(cancel), &|p| {
                registry.set_progress(*id, p);
            })
        });
        match outcome {
            BatchOutcome::Failed { reason, .. } => registry.fail(*id, reason),
            completed => registry.complete(*id, completed),
        };
    });

    tasks.into_iter().map(|(id, _)| id).collect()
}

fn run_job<F>(job: &BatchJob, runner: F) -> BatchOutcome
where
    F: FnOnce() -> Result<BacktestResult, FundlabError>,
{
    match panic::catch_unwind(AssertUnwindSafe(runner)) {
        Ok(Ok(result)) => {
            let report = report_for(&result, job.config.risk_free_rate);
            BatchOutcome::Completed {
                id: job.id.clone(),
                result: Box::new(result),
                report,
            }
        }
        Ok(Err(e)) => {
            error!(job = %job.id, error = %e, "batch job failed");
            BatchOutcome::Failed {
                id: job.id.clone(),
                reason: e.to_string(),
            }
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(job = %job.id, reason = %reason, "batch job panicked");
            BatchOutcome::Failed {
                id: job.id.clone(),
                reason,
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
