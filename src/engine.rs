//! Batch orchestration.
//!
//! Enriched cases are fed through a bounded queue to a fixed pool of worker
//! threads. Each worker runs the per-case pipeline against the rule table
//! snapshot taken when the batch started and sends `(index, result)` back;
//! results land in a pre-sized slot vector, so the response follows input
//! order no matter which worker finishes first.

use crate::allocator::allocate;
use crate::case::{CaseInput, CaseRecord};
use crate::config::{RuleBook, RuleTable};
use crate::earnings;
use crate::error::{EngineError, Result};
use crate::formatter::{BatchResult, CaseResult, CaseStage, NotFoundEmployee};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use log::{debug, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often the collector checks for cancellation and the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Jobs buffered per worker before the feeder blocks.
const QUEUE_DEPTH_PER_WORKER: usize = 4;

/// Explicit engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker threads per batch, independent of batch size
    pub workers: usize,

    /// Whole-batch deadline
    pub timeout: Option<Duration>,
}

impl EngineConfig {
    /// Sets the worker count; zero is raised to one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets a deadline for the whole batch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers: thread::available_parallelism().map_or(4, |n| n.get()),
            timeout: None,
        }
    }
}

/// Caller-side abort switch for a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token; every batch watching it stops at its next poll.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs batches of case records through the garnishment pipeline.
///
/// # Example
///
/// ```
/// use garnishment_engine::{BatchProcessor, CaseInput, CaseRecord, Money, PayPeriod};
///
/// let processor = BatchProcessor::default();
/// let record = CaseRecord::new("EE1", "TX", PayPeriod::Weekly, Money::from_units(800));
/// let batch = processor.process("B1", vec![CaseInput::from(record)]).unwrap();
/// assert_eq!(batch.summary.no_order_cases, 1);
/// ```
pub struct BatchProcessor {
    rules: Arc<RuleBook>,
    config: EngineConfig,
}

impl BatchProcessor {
    pub fn new(rules: Arc<RuleBook>, config: EngineConfig) -> Self {
        BatchProcessor { rules, config }
    }

    /// The shared rule book; replacing its table affects later batches only.
    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluates one case against the current rule table.
    pub fn process_case(&self, record: &CaseRecord) -> CaseResult {
        let table = self.rules.snapshot();
        run_isolated(&record.employee_id, || evaluate_case(record, &table))
    }

    /// Processes a batch that cannot be cancelled by the caller.
    pub fn process(&self, batch_id: &str, inputs: Vec<CaseInput>) -> Result<BatchResult> {
        self.process_with(batch_id, inputs, &CancelToken::new())
    }

    /// Processes a batch.
    ///
    /// Not-found inputs never enter the pipeline and are listed separately.
    /// Case failures are recorded on the case and never abort the batch.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] when `cancel` fires and
    /// [`EngineError::TimedOut`] when the configured deadline passes before
    /// every case is collected. Queued cases are not started after either;
    /// cases already running finish and their results are dropped.
    pub fn process_with(&self, batch_id: &str, inputs: Vec<CaseInput>, cancel: &CancelToken) -> Result<BatchResult> {
        let started = Instant::now();
        let deadline = self.config.timeout.map(|timeout| started + timeout);
        let table = self.rules.snapshot();

        let mut records = Vec::with_capacity(inputs.len());
        let mut not_found = Vec::new();
        for input in inputs {
            match input {
                CaseInput::Enriched(record) => records.push(record),
                CaseInput::NotFound { employee_id, reason } => {
                    warn!("Batch {}: employee {} not found upstream", batch_id, employee_id);
                    not_found.push(NotFoundEmployee { employee_id, reason });
                }
            }
        }

        let total = records.len();
        let employee_ids: Vec<String> = records.iter().map(|r| r.employee_id.clone()).collect();
        let mut slots: Vec<Option<CaseResult>> = vec![None; total];
        let workers = self.config.workers.max(1).min(total.max(1));
        let abort = AtomicBool::new(false);

        debug!(
            "Batch {}: {} cases on {} workers, rules {}",
            batch_id,
            total,
            workers,
            table.version()
        );

        let (job_tx, job_rx) = bounded::<(usize, CaseRecord)>(workers * QUEUE_DEPTH_PER_WORKER);
        let (result_tx, result_rx) = unbounded::<(usize, CaseResult)>();

        let outcome = thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let table: &RuleTable = &table;
                let abort = &abort;
                scope.spawn(move || {
                    for (index, record) in job_rx.iter() {
                        if abort.load(Ordering::SeqCst) {
                            continue;
                        }
                        let result = run_isolated(&record.employee_id, || evaluate_case(&record, table));
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            let abort_feed = &abort;
            scope.spawn(move || {
                for job in records.into_iter().enumerate() {
                    if abort_feed.load(Ordering::SeqCst) || job_tx.send(job).is_err() {
                        break;
                    }
                }
            });

            let mut received = 0;
            while received < total {
                if cancel.is_cancelled() {
                    abort.store(true, Ordering::SeqCst);
                    return Err(EngineError::Cancelled {
                        batch_id: batch_id.to_string(),
                    });
                }
                let mut wait = POLL_INTERVAL;
                if let Some(deadline) = deadline {
                    let now = Instant::now();
                    if now >= deadline {
                        abort.store(true, Ordering::SeqCst);
                        return Err(EngineError::TimedOut {
                            batch_id: batch_id.to_string(),
                        });
                    }
                    wait = wait.min(deadline - now);
                }

                match result_rx.recv_timeout(wait) {
                    Ok((index, result)) => {
                        slots[index] = Some(result);
                        received += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            Ok(())
        });

        if let Err(e) = outcome {
            warn!("Batch {} aborted: {}", batch_id, e);
            return Err(e);
        }

        let results: Vec<CaseResult> = slots
            .into_iter()
            .zip(employee_ids)
            .map(|(slot, employee_id)| {
                slot.unwrap_or_else(|| {
                    CaseResult::failed(employee_id, CaseStage::Enriched, "evaluation did not complete")
                })
            })
            .collect();

        let batch = BatchResult::assemble(batch_id, table.version(), results, not_found);
        info!(
            "Batch {}: {} total, {} successful, {} failed, {} without orders, {} not found in {:?}",
            batch_id,
            batch.summary.total_cases,
            batch.summary.successful_cases,
            batch.summary.failed_cases,
            batch.summary.no_order_cases,
            batch.summary.missing_employees,
            started.elapsed()
        );
        Ok(batch)
    }
}

impl Default for BatchProcessor {
    fn default() -> Self {
        BatchProcessor::new(Arc::new(RuleBook::default()), EngineConfig::default())
    }
}

/// Runs one case, turning a panic into a failed result so the rest of the
/// batch still completes.
fn run_isolated(employee_id: &str, evaluate: impl FnOnce() -> CaseResult) -> CaseResult {
    match panic::catch_unwind(AssertUnwindSafe(evaluate)) {
        Ok(result) => result,
        Err(_) => {
            warn!("Case {} panicked during evaluation", employee_id);
            CaseResult::failed(employee_id, CaseStage::Enriched, "evaluation panicked")
        }
    }
}

/// Per-case pipeline: Enriched, DisposableEarningsResolved, Allocated,
/// Formatted, Done. Any error stops the case with the stage it had reached.
fn evaluate_case(record: &CaseRecord, rules: &RuleTable) -> CaseResult {
    let employee_id = record.employee_id.as_str();

    if let Err(e) = record.validate() {
        warn!("Case {} failed validation: {}", employee_id, e);
        return CaseResult::failed(employee_id, CaseStage::Enriched, e.to_string());
    }

    let disposable = match earnings::resolve(record.gross_pay, &record.payroll_deductions) {
        Ok(amount) => amount,
        Err(e) => {
            warn!("Case {} failed resolving disposable earnings: {}", employee_id, e);
            return CaseResult::failed(employee_id, CaseStage::Enriched, e.to_string());
        }
    };
    debug!("Case {}: {:?}", employee_id, CaseStage::DisposableEarningsResolved);

    if record.has_no_orders() {
        debug!("Case {}: no garnishment orders", employee_id);
        return CaseResult::no_orders(employee_id, Some(disposable));
    }

    let allocation = match allocate(disposable, record, rules) {
        Ok(allocation) => allocation,
        Err(e) => {
            warn!("Case {} failed allocation: {}", employee_id, e);
            return CaseResult::failed(employee_id, CaseStage::DisposableEarningsResolved, e.to_string());
        }
    };
    debug!("Case {}: {:?}", employee_id, CaseStage::Allocated);

    let result = CaseResult::from_allocation(employee_id, &allocation);
    debug!("Case {}: {:?}", employee_id, CaseStage::Formatted);
    debug!("Case {}: {:?}", employee_id, CaseStage::Done);
    result
}
