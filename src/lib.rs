//! # Garnishment Engine
//!
//! Computes, per pay period, how much of an employee's earnings must be
//! withheld for each active garnishment order: child support, tax levies,
//! student loans, creditor debt and the rest.
//!
//! ## Design Principles
//!
//! - **Exact currency**: every amount is a [`Money`], two decimal places over
//!   `rust_decimal`, rounded half-up
//! - **Priority consumption**: higher-priority types shrink the budget seen
//!   by lower-priority ones
//! - **Rules as data**: statutory limits live in a swappable [`RuleTable`]
//! - **Case isolation**: a failing case never aborts its batch
//! - **Deterministic output**: results follow input order
//!
//! ## Example
//!
//! ```
//! use garnishment_engine::{
//!     BatchProcessor, CaseInput, CaseRecord, GarnishmentGroup, GarnishmentOrder,
//!     GarnishmentType, Money, PayPeriod,
//! };
//!
//! let mut record = CaseRecord::new("EE1", "TX", PayPeriod::Weekly, Money::from_units(1000));
//! record.garnishments.push(GarnishmentGroup::new(
//!     GarnishmentType::ChildSupport,
//!     vec![GarnishmentOrder::new("CS-1", Money::from_units(100), Money::from_units(20))],
//! ));
//!
//! let batch = BatchProcessor::default()
//!     .process("batch-1", vec![CaseInput::from(record)])
//!     .unwrap();
//! assert_eq!(batch.results[0].total_withheld, Money::from_units(120));
//! ```

pub mod allocator;
pub mod case;
pub mod config;
pub mod earnings;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fees;
pub mod formatter;
pub mod garnishment;
pub mod money;

pub use allocator::{allocate, Allocation, AllocationResult, AllocationStatus, OrderAllocation, SkippedGarnishment};
pub use case::{CaseInput, CaseRecord, Demographics, FilingStatus, Jurisdiction, PayPeriod};
pub use config::{AllocationMethod, ExemptionSpec, FeeSchedule, RuleBook, RuleTable, StatutoryRule};
pub use earnings::PayrollDeduction;
pub use engine::{BatchProcessor, CancelToken, EngineConfig};
pub use error::{EngineError, Result};
pub use evaluator::{evaluator_for, EvaluationContext, RuleEvaluator};
pub use formatter::{BatchResult, BatchSummary, CaseResult, CaseStage, CaseStatus, GarnishmentOutcome};
pub use garnishment::{GarnishmentGroup, GarnishmentOrder, GarnishmentType};
pub use money::Money;
