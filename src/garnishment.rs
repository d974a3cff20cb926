//! Garnishment types and the orders that belong to them.

use crate::error::{EngineError, Result};
use crate::money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of garnishment types the engine knows how to evaluate.
///
/// Declaration order is significant: it breaks ties between types that share
/// a statutory priority rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GarnishmentType {
    ChildSupport,
    SpousalAndMedicalSupport,
    FederalTaxLevy,
    Bankruptcy,
    StudentDefaultLoan,
    StateTaxLevy,
    FranchiseTaxBoard,
    CreditorDebt,
}

impl GarnishmentType {
    /// Every known type, in tie-break order.
    pub const ALL: [GarnishmentType; 8] = [
        GarnishmentType::ChildSupport,
        GarnishmentType::SpousalAndMedicalSupport,
        GarnishmentType::FederalTaxLevy,
        GarnishmentType::Bankruptcy,
        GarnishmentType::StudentDefaultLoan,
        GarnishmentType::StateTaxLevy,
        GarnishmentType::FranchiseTaxBoard,
        GarnishmentType::CreditorDebt,
    ];

    /// The canonical snake_case tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            GarnishmentType::ChildSupport => "child_support",
            GarnishmentType::SpousalAndMedicalSupport => "spousal_and_medical_support",
            GarnishmentType::FederalTaxLevy => "federal_tax_levy",
            GarnishmentType::Bankruptcy => "bankruptcy",
            GarnishmentType::StudentDefaultLoan => "student_default_loan",
            GarnishmentType::StateTaxLevy => "state_tax_levy",
            GarnishmentType::FranchiseTaxBoard => "franchise_tax_board",
            GarnishmentType::CreditorDebt => "creditor_debt",
        }
    }

    /// Family-support orders are exempt from the minimum-wage floor.
    pub fn is_support(&self) -> bool {
        matches!(
            self,
            GarnishmentType::ChildSupport | GarnishmentType::SpousalAndMedicalSupport
        )
    }
}

impl fmt::Display for GarnishmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GarnishmentType {
    type Err = EngineError;

    /// Parses a type tag, tolerating case, surrounding whitespace and
    /// space/hyphen separators.
    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().to_lowercase().replace([' ', '-'], "_");

        match tag.as_str() {
            "child_support" => Ok(GarnishmentType::ChildSupport),
            "spousal_and_medical_support" | "spousal_support" => {
                Ok(GarnishmentType::SpousalAndMedicalSupport)
            }
            "federal_tax_levy" => Ok(GarnishmentType::FederalTaxLevy),
            "bankruptcy" => Ok(GarnishmentType::Bankruptcy),
            "student_default_loan" | "student_loan" => Ok(GarnishmentType::StudentDefaultLoan),
            "state_tax_levy" => Ok(GarnishmentType::StateTaxLevy),
            "franchise_tax_board" | "ftb" => Ok(GarnishmentType::FranchiseTaxBoard),
            "creditor_debt" => Ok(GarnishmentType::CreditorDebt),
            _ => Err(EngineError::UnsupportedGarnishmentType(s.trim().to_string())),
        }
    }
}

/// One garnishment order as received from enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarnishmentOrder {
    /// Court or agency case identifier
    pub case_id: String,

    /// Amount ordered for the current pay period
    pub ordered_amount: Money,

    /// Accrued unpaid balance from prior periods
    #[serde(default)]
    pub arrear_amount: Money,
}

impl GarnishmentOrder {
    /// Creates an order.
    pub fn new(case_id: impl Into<String>, ordered_amount: Money, arrear_amount: Money) -> Self {
        GarnishmentOrder {
            case_id: case_id.into(),
            ordered_amount,
            arrear_amount,
        }
    }

    /// Ordered amount plus arrears.
    pub fn outstanding(&self) -> Money {
        self.ordered_amount + self.arrear_amount
    }

    /// Rejects negative or out-of-range amounts and blank case ids.
    pub fn validate(&self) -> Result<()> {
        if self.case_id.trim().is_empty() {
            return Err(EngineError::invalid("case_id", "case id must not be empty"));
        }
        check_amount(&self.case_id, "ordered_amount", self.ordered_amount)?;
        check_amount(&self.case_id, "arrear_amount", self.arrear_amount)?;
        if self.ordered_amount.checked_add(self.arrear_amount).is_none() {
            return Err(EngineError::invalid(
                format!("{}.arrear_amount", self.case_id),
                "outstanding balance overflows",
            ));
        }
        Ok(())
    }
}

fn check_amount(case_id: &str, field: &str, amount: Money) -> Result<()> {
    if amount.is_negative() {
        return Err(EngineError::invalid(
            format!("{}.{}", case_id, field),
            format!("negative amount {}", amount),
        ));
    }
    if !amount.is_within_range() {
        return Err(EngineError::invalid(
            format!("{}.{}", case_id, field),
            format!("amount {} exceeds {}", amount, Money::MAX_AMOUNT),
        ));
    }
    Ok(())
}

/// Orders of a single garnishment type as they arrive on a case record.
///
/// The type stays a raw tag here; the engine parses it so an unknown tag
/// can be reported against the case instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarnishmentGroup {
    /// Type tag, e.g. `child_support`
    pub garnishment_type: String,

    /// Orders of this type
    #[serde(default)]
    pub orders: Vec<GarnishmentOrder>,
}

impl GarnishmentGroup {
    /// Creates a group from a type and its orders.
    pub fn new(garnishment_type: GarnishmentType, orders: Vec<GarnishmentOrder>) -> Self {
        GarnishmentGroup {
            garnishment_type: garnishment_type.as_str().to_string(),
            orders,
        }
    }

    /// Parses the group's type tag.
    pub fn parsed_type(&self) -> Result<GarnishmentType> {
        self.garnishment_type.parse()
    }
}
