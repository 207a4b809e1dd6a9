//! Bounded-concurrency worker pool with per-attempt timeout and retry/backoff.
//!
//! Used for both chunk extraction and batch items. A failing unit never aborts its
//! siblings; reports come back sorted by unit number once every unit has finished
//! or the run budget has elapsed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::ExtractionError;

use super::retry::RetryPolicy;

/// Outcome of one unit of work.
#[derive(Debug, Clone)]
pub struct UnitReport<R> {
    /// 1-based position of the unit in the submitted list
    pub number: usize,
    /// Attempts made; 0 when the unit never started
    pub attempts: u32,
    pub outcome: Result<R, ExtractionError>,
}

impl<R> UnitReport<R> {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&ExtractionError> {
        self.outcome.as_ref().err()
    }
}

/// Hooks invoked from worker tasks as units progress.
#[async_trait]
pub trait PoolObserver: Send + Sync {
    /// A recoverable failure on `attempt`; another attempt follows after backoff.
    async fn on_retry(&self, _number: usize, _attempt: u32, _max_retries: u32, _error: &ExtractionError) {}

    /// A unit that started has reached its final outcome.
    async fn on_finished(&self, _number: usize, _attempts: u32, _error: Option<&ExtractionError>) {}
}

/// Observer that ignores every hook.
pub struct NoopObserver;

#[async_trait]
impl PoolObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    /// Label for logs and metrics (`chunk`, `item`)
    unit_label: &'static str,
    concurrency: usize,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    run_budget: Option<Duration>,
}

impl WorkerPool {
    pub fn new(
        unit_label: &'static str,
        concurrency: usize,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            unit_label,
            concurrency: concurrency.max(1),
            retry,
            attempt_timeout,
            run_budget: None,
        }
    }

    /// Bound the whole run; units still running when it elapses are aborted and fail.
    pub fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = Some(budget);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `work` once per unit (and again per retry). `work` receives the unit and the
    /// 1-based attempt number.
    pub async fn run<U, R, F, Fut>(
        &self,
        units: Vec<U>,
        work: F,
        observer: Arc<dyn PoolObserver>,
        cancel: CancellationToken,
    ) -> Vec<UnitReport<R>>
    where
        U: Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(Arc<U>, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ExtractionError>> + Send + 'static,
    {
        let total = units.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let work = Arc::new(work);
        // Reports of units that reached an outcome, filled before the observer hears of it
        let settled: Arc<Mutex<HashMap<usize, UnitReport<R>>>> = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();

        for (index, unit) in units.into_iter().enumerate() {
            let number = index + 1;
            let unit = Arc::new(unit);
            let semaphore = semaphore.clone();
            let work = work.clone();
            let observer = observer.clone();
            let cancel = cancel.clone();
            let settled = settled.clone();
            let pool = self.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    lock(&settled).insert(number, cancelled_report(number));
                    return;
                };
                if cancel.is_cancelled() {
                    debug!(unit = pool.unit_label, number, "Skipping unit after cancellation");
                    lock(&settled).insert(number, cancelled_report(number));
                    return;
                }

                let report = pool.run_unit(number, unit, work.as_ref(), observer.as_ref()).await;
                pool.record_outcome(&report);
                let attempts = report.attempts;
                let error = report.error().cloned();
                lock(&settled).insert(number, report);
                observer.on_finished(number, attempts, error.as_ref()).await;
            });
        }

        let deadline = self.run_budget.map(|b| tokio::time::Instant::now() + b);
        let mut budget_elapsed = false;

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            unit = self.unit_label,
                            remaining = tasks.len(),
                            "Run budget elapsed, aborting unfinished units"
                        );
                        tasks.abort_all();
                        budget_elapsed = true;
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                Some(Ok(())) => {}
                Some(Err(e)) => error!(unit = self.unit_label, error = %e, "Worker task failed"),
                None => break,
            }
        }

        // Let aborted tasks wind down so nothing settles behind the sweep below
        while tasks.join_next().await.is_some() {}

        let mut reports: Vec<UnitReport<R>> = lock(&settled).drain().map(|(_, r)| r).collect();

        // Units aborted by the budget (or lost to a panicking task) are reported failed
        let finished: HashSet<usize> = reports.iter().map(|r| r.number).collect();
        for number in (1..=total).filter(|n| !finished.contains(n)) {
            let error = match self.run_budget {
                Some(budget) if budget_elapsed => ExtractionError::timeout(budget),
                _ => ExtractionError::Validation {
                    message: "worker task aborted".to_string(),
                },
            };
            let report = UnitReport {
                number,
                attempts: 1,
                outcome: Err(error),
            };
            self.record_outcome(&report);
            observer
                .on_finished(number, report.attempts, report.error())
                .await;
            reports.push(report);
        }

        reports.sort_by_key(|r| r.number);
        reports
    }

    async fn run_unit<U, R, F, Fut>(
        &self,
        number: usize,
        unit: Arc<U>,
        work: &F,
        observer: &dyn PoolObserver,
    ) -> UnitReport<R>
    where
        F: Fn(Arc<U>, u32) -> Fut,
        Fut: Future<Output = Result<R, ExtractionError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.attempt_timeout, work(unit.clone(), attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ExtractionError::timeout(self.attempt_timeout)),
            };

            match result {
                Ok(value) => {
                    return UnitReport {
                        number,
                        attempts: attempt,
                        outcome: Ok(value),
                    };
                }
                Err(err) if err.is_recoverable() && self.retry.has_attempts_left(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        unit = self.unit_label,
                        number,
                        attempt,
                        max_retries = self.retry.max_retries,
                        error_type = %err.kind(),
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    metrics::counter!(
                        "pipeline_unit_retries_total",
                        "unit" => self.unit_label,
                        "error_type" => err.kind().to_string()
                    )
                    .increment(1);
                    observer
                        .on_retry(number, attempt, self.retry.max_retries, &err)
                        .await;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(
                        unit = self.unit_label,
                        number,
                        attempts = attempt,
                        error_type = %err.kind(),
                        recoverable = err.is_recoverable(),
                        error = %err,
                        "Unit failed"
                    );
                    return UnitReport {
                        number,
                        attempts: attempt,
                        outcome: Err(err),
                    };
                }
            }
        }
    }

    fn record_outcome<R>(&self, report: &UnitReport<R>) {
        let status = if report.succeeded() { "success" } else { "failed" };
        metrics::counter!(
            "pipeline_units_total",
            "unit" => self.unit_label,
            "status" => status
        )
        .increment(1);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancelled_report<R>(number: usize) -> UnitReport<R> {
    UnitReport {
        number,
        attempts: 0,
        outcome: Err(ExtractionError::Cancelled),
    }
}
