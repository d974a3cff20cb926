//! External result shapes and the pure mapping into them.

use crate::allocator::{Allocation, AllocationStatus, SkippedGarnishment};
use crate::error::Result;
use crate::garnishment::GarnishmentType;
use crate::money::Money;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;

/// Pipeline step a case had reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStage {
    Enriched,
    DisposableEarningsResolved,
    Allocated,
    Formatted,
    Done,
}

/// Final state of one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaseStatus {
    Done,
    /// Successful, with nothing to withhold
    NoOrders,
    Failed { stage: CaseStage, reason: String },
}

impl CaseStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, CaseStatus::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Done => "done",
            CaseStatus::NoOrders => "no_orders",
            CaseStatus::Failed { .. } => "failed",
        }
    }
}

/// Withholding for one court/agency case id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBreakdown {
    pub case_id: String,
    pub withholding_amount: Money,
    pub current_withheld: Money,
    pub arrear_withheld: Money,
    pub remaining_balance: Money,
}

/// Withholding and fee for one garnishment type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarnishmentOutcome {
    pub garnishment_type: GarnishmentType,
    pub priority: u32,
    pub withholding_amount: Money,
    pub fee: Money,
    pub remaining_balance: Money,
    pub status: AllocationStatus,
    pub breakdown: Vec<OrderBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub employee_id: String,
    pub status: CaseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposable_earnings: Option<Money>,

    #[serde(default)]
    pub garnishments: Vec<GarnishmentOutcome>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedGarnishment>,

    #[serde(default)]
    pub total_withheld: Money,

    #[serde(default)]
    pub total_fees: Money,
}

impl CaseResult {
    /// Maps an allocation into the external shape.
    ///
    /// Garnishments are ordered by priority rank then type, breakdowns by
    /// case id, independent of the order the allocator produced them in.
    pub fn from_allocation(employee_id: impl Into<String>, allocation: &Allocation) -> Self {
        let mut garnishments: Vec<GarnishmentOutcome> = allocation
            .results
            .iter()
            .map(|result| {
                let mut breakdown: Vec<OrderBreakdown> = result
                    .orders
                    .iter()
                    .map(|order| OrderBreakdown {
                        case_id: order.case_id.clone(),
                        withholding_amount: order.withheld,
                        current_withheld: order.current_withheld,
                        arrear_withheld: order.arrear_withheld,
                        remaining_balance: order.remaining_balance,
                    })
                    .collect();
                breakdown.sort_by(|a, b| a.case_id.cmp(&b.case_id));

                GarnishmentOutcome {
                    garnishment_type: result.garnishment_type,
                    priority: result.priority,
                    withholding_amount: result.withheld,
                    fee: result.fee,
                    remaining_balance: result.remaining_balance,
                    status: result.status,
                    breakdown,
                }
            })
            .collect();
        garnishments.sort_by_key(|g| (g.priority, g.garnishment_type));

        CaseResult {
            employee_id: employee_id.into(),
            status: CaseStatus::Done,
            disposable_earnings: Some(allocation.disposable_earnings),
            garnishments,
            skipped: allocation.skipped.clone(),
            total_withheld: allocation.total_withheld(),
            total_fees: allocation.total_fees(),
        }
    }

    /// Successful empty result for a case without orders.
    pub fn no_orders(employee_id: impl Into<String>, disposable_earnings: Option<Money>) -> Self {
        CaseResult {
            employee_id: employee_id.into(),
            status: CaseStatus::NoOrders,
            disposable_earnings,
            garnishments: Vec::new(),
            skipped: Vec::new(),
            total_withheld: Money::ZERO,
            total_fees: Money::ZERO,
        }
    }

    pub fn failed(employee_id: impl Into<String>, stage: CaseStage, reason: impl Into<String>) -> Self {
        CaseResult {
            employee_id: employee_id.into(),
            status: CaseStatus::Failed {
                stage,
                reason: reason.into(),
            },
            disposable_earnings: None,
            garnishments: Vec::new(),
            skipped: Vec::new(),
            total_withheld: Money::ZERO,
            total_fees: Money::ZERO,
        }
    }

    /// Withholding for a type, if the case had a result for it.
    pub fn withholding_for(&self, garnishment_type: GarnishmentType) -> Option<&GarnishmentOutcome> {
        self.garnishments
            .iter()
            .find(|g| g.garnishment_type == garnishment_type)
    }
}

/// An input the enrichment collaborator could not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFoundEmployee {
    pub employee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Every submitted input, found or not
    pub total_cases: usize,
    /// Inputs that entered the engine
    pub processed_cases: usize,
    pub successful_cases: usize,
    pub failed_cases: usize,
    pub no_order_cases: usize,
    pub missing_employees: usize,
    pub garnishment_types_processed: Vec<GarnishmentType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub rules_version: String,
    /// Same order as the processed inputs
    pub results: Vec<CaseResult>,
    pub not_found_employees: Vec<NotFoundEmployee>,
    pub no_order_cases: Vec<String>,
    pub summary: BatchSummary,
}

impl BatchResult {
    /// Builds the batch response and its summary.
    pub fn assemble(
        batch_id: impl Into<String>,
        rules_version: impl Into<String>,
        results: Vec<CaseResult>,
        not_found_employees: Vec<NotFoundEmployee>,
    ) -> Self {
        let no_order_cases: Vec<String> = results
            .iter()
            .filter(|r| r.status == CaseStatus::NoOrders)
            .map(|r| r.employee_id.clone())
            .collect();
        let successful_cases = results.iter().filter(|r| r.status.is_success()).count();
        let types: BTreeSet<GarnishmentType> = results
            .iter()
            .flat_map(|r| r.garnishments.iter().map(|g| g.garnishment_type))
            .collect();

        let summary = BatchSummary {
            total_cases: results.len() + not_found_employees.len(),
            processed_cases: results.len(),
            successful_cases,
            failed_cases: results.len() - successful_cases,
            no_order_cases: no_order_cases.len(),
            missing_employees: not_found_employees.len(),
            garnishment_types_processed: types.into_iter().collect(),
        };

        BatchResult {
            batch_id: batch_id.into(),
            rules_version: rules_version.into(),
            results,
            not_found_employees,
            no_order_cases,
            summary,
        }
    }

    /// Writes one CSV row per order (or per case when it has none).
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "employee_id",
            "garnishment_type",
            "case_id",
            "withheld",
            "fee",
            "remaining_balance",
            "status",
        ])?;

        for case in &self.results {
            if case.garnishments.is_empty() {
                csv_writer.write_record([
                    case.employee_id.as_str(),
                    "",
                    "",
                    "0.00",
                    "0.00",
                    "0.00",
                    case.status.as_str(),
                ])?;
                continue;
            }
            for garnishment in &case.garnishments {
                for (i, order) in garnishment.breakdown.iter().enumerate() {
                    // The type's fee is reported once, on its first order.
                    let fee = if i == 0 { garnishment.fee } else { Money::ZERO };
                    csv_writer.write_record([
                        case.employee_id.clone(),
                        garnishment.garnishment_type.to_string(),
                        order.case_id.clone(),
                        order.withholding_amount.to_string(),
                        fee.to_string(),
                        order.remaining_balance.to_string(),
                        garnishment.status.as_str().to_string(),
                    ])?;
                }
            }
        }

        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::allocate;
    use crate::case::{CaseRecord, PayPeriod};
    use crate::config::RuleTable;
    use crate::garnishment::{GarnishmentGroup, GarnishmentOrder};

    fn allocated_case() -> CaseResult {
        let mut case = CaseRecord::new("EE1", "TX", PayPeriod::Weekly, Money::from_units(1000));
        case.garnishments = vec![
            GarnishmentGroup::new(
                GarnishmentType::CreditorDebt,
                vec![GarnishmentOrder::new("CD1", Money::from_units(40), Money::ZERO)],
            ),
            GarnishmentGroup::new(
                GarnishmentType::ChildSupport,
                vec![
                    GarnishmentOrder::new("CS2", Money::from_units(60), Money::ZERO),
                    GarnishmentOrder::new("CS1", Money::from_units(100), Money::from_units(20)),
                ],
            ),
        ];
        let allocation = allocate(Money::from_units(1000), &case, &RuleTable::federal_defaults()).unwrap();
        CaseResult::from_allocation("EE1", &allocation)
    }

    #[test]
    fn test_from_allocation_orders_by_priority_then_case_id() {
        let result = allocated_case();
        assert_eq!(result.status, CaseStatus::Done);
        assert_eq!(result.garnishments[0].garnishment_type, GarnishmentType::ChildSupport);
        assert_eq!(result.garnishments[0].breakdown[0].case_id, "CS1");
        assert_eq!(result.garnishments[1].garnishment_type, GarnishmentType::CreditorDebt);
        assert_eq!(result.total_withheld, Money::from_units(220));
        // 1.00 flat child-support fee + 2.00 minimum creditor fee
        assert_eq!(result.total_fees, Money::from_units(3));
    }

    #[test]
    fn test_assemble_summary() {
        let results = vec![
            allocated_case(),
            CaseResult::no_orders("EE2", Some(Money::from_units(300))),
            CaseResult::failed("EE3", CaseStage::Enriched, "negative gross pay"),
        ];
        let not_found = vec![NotFoundEmployee {
            employee_id: "EE4".to_string(),
            reason: None,
        }];
        let batch = BatchResult::assemble("B1", "federal-defaults", results, not_found);

        assert_eq!(batch.summary.total_cases, 4);
        assert_eq!(batch.summary.processed_cases, 3);
        assert_eq!(batch.summary.successful_cases, 2);
        assert_eq!(batch.summary.failed_cases, 1);
        assert_eq!(batch.summary.no_order_cases, 1);
        assert_eq!(batch.summary.missing_employees, 1);
        assert_eq!(batch.no_order_cases, vec!["EE2".to_string()]);
        assert_eq!(
            batch.summary.garnishment_types_processed,
            vec![GarnishmentType::ChildSupport, GarnishmentType::CreditorDebt]
        );
    }

    #[test]
    fn test_status_serialization() {
        let failed = CaseResult::failed("EE3", CaseStage::DisposableEarningsResolved, "bad deduction");
        let json = serde_json::to_value(&failed.status).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["stage"], "disposable_earnings_resolved");
        assert_eq!(json["reason"], "bad deduction");
    }

    #[test]
    fn test_write_csv() {
        let batch = BatchResult::assemble(
            "B1",
            "federal-defaults",
            vec![allocated_case(), CaseResult::no_orders("EE2", None)],
            vec![],
        );
        let mut output = Vec::new();
        batch.write_csv(&mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.starts_with("employee_id,garnishment_type,case_id,withheld,fee,remaining_balance,status"));
        assert!(output_str.contains("EE1,child_support,CS1,120.00,1.00,0.00,full"));
        assert!(output_str.contains("EE1,child_support,CS2,60.00,0.00,0.00,full"));
        assert!(output_str.contains("EE1,creditor_debt,CD1,40.00,2.00,0.00,full"));
        assert!(output_str.contains("EE2,,,0.00,0.00,0.00,no_orders"));
    }
}
