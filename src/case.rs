//! Case record model: the enriched, self-contained input for one employee.
//!
//! A `CaseRecord` is built by the enrichment collaborator and is read-only
//! inside the engine. Nothing here performs lookups; everything needed for a
//! calculation is carried on the record itself.

use crate::error::{EngineError, Result};
use crate::garnishment::GarnishmentGroup;
use crate::money::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Payroll frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayPeriod {
    Weekly,
    #[serde(alias = "bi_weekly", alias = "bi-weekly")]
    Biweekly,
    #[serde(alias = "semi_monthly", alias = "semi-monthly")]
    Semimonthly,
    Monthly,
}

impl PayPeriod {
    /// Pay periods in a year.
    pub fn periods_per_year(&self) -> u32 {
        match self {
            PayPeriod::Weekly => 52,
            PayPeriod::Biweekly => 26,
            PayPeriod::Semimonthly => 24,
            PayPeriod::Monthly => 12,
        }
    }

    /// Length of the period in weeks as an exact `(numerator, denominator)`.
    fn weeks_ratio(&self) -> (i64, i64) {
        match self {
            PayPeriod::Weekly => (1, 1),
            PayPeriod::Biweekly => (2, 1),
            PayPeriod::Semimonthly => (13, 6),
            PayPeriod::Monthly => (13, 3),
        }
    }

    /// Hours of minimum wage exempt for an `N×` weekly multiple.
    ///
    /// The federal 30× rule gives 30, 60, 65 and 130 hours for weekly,
    /// biweekly, semimonthly and monthly pay.
    pub fn minimum_wage_hours(&self, weekly_multiple: Decimal) -> Decimal {
        let (num, den) = self.weeks_ratio();
        weekly_multiple * Decimal::from(num) / Decimal::from(den)
    }

    /// Scales a weekly threshold to this period.
    pub fn from_weekly(&self, weekly: Money) -> Money {
        let (num, den) = self.weeks_ratio();
        Money::new(weekly.amount() * Decimal::from(num) / Decimal::from(den))
    }

    /// Pro-rates an annual amount to one pay period.
    pub fn from_annual(&self, annual: Money) -> Money {
        annual.divide_by(Decimal::from(self.periods_per_year()))
    }
}

impl fmt::Display for PayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayPeriod::Weekly => "weekly",
            PayPeriod::Biweekly => "biweekly",
            PayPeriod::Semimonthly => "semimonthly",
            PayPeriod::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

/// Federal income tax filing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointReturn,
    MarriedFilingSeparateReturn,
    HeadOfHousehold,
    QualifyingWidowers,
}

impl FilingStatus {
    /// Status used for exemption lookups; qualifying widow(er)s share the
    /// joint-return amounts.
    pub fn exemption_status(&self) -> FilingStatus {
        match self {
            FilingStatus::QualifyingWidowers => FilingStatus::MarriedFilingJointReturn,
            other => *other,
        }
    }
}

/// Where the employee works and lives, and where the order was issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub work_state: String,

    #[serde(default)]
    pub home_state: Option<String>,

    #[serde(default)]
    pub issuing_state: Option<String>,
}

impl Jurisdiction {
    /// Creates a jurisdiction with only a work state.
    pub fn in_state(work_state: impl Into<String>) -> Self {
        Jurisdiction {
            work_state: work_state.into(),
            home_state: None,
            issuing_state: None,
        }
    }

    /// Normalised work state used for rule lookup.
    pub fn rule_state(&self) -> String {
        normalize_state(&self.work_state)
    }
}

/// Filing and household attributes that change exemption amounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Demographics {
    pub filing_status: Option<FilingStatus>,

    /// Exemptions claimed besides the employee.
    pub dependents: u32,

    pub age: Option<u32>,
    pub is_blind: bool,
    pub spouse_age: Option<u32>,
    pub is_spouse_blind: bool,

    /// Employee also supports a second family (lower support cap).
    pub supports_second_family: bool,

    /// Support arrears are older than twelve weeks (support cap surcharge).
    pub arrears_greater_than_12_weeks: bool,

    /// Extra rule-selection context, e.g. `consumer` for consumer debt.
    pub filing_context: Option<String>,

    /// Employer may not deduct administrative fees for this employee.
    pub garnishment_fees_suspended: bool,
}

impl Demographics {
    /// Number of additional-exemption conditions (65 or older, blind) met by
    /// the employee and spouse.
    pub fn additional_exemption_conditions(&self) -> u32 {
        const SENIOR_AGE: u32 = 65;
        let mut count = 0;
        if self.age.map_or(false, |a| a >= SENIOR_AGE) {
            count += 1;
        }
        if self.is_blind {
            count += 1;
        }
        if self.spouse_age.map_or(false, |a| a >= SENIOR_AGE) {
            count += 1;
        }
        if self.is_spouse_blind {
            count += 1;
        }
        count
    }
}

/// The enriched record for one employee and pay period.
///
/// # Invariants
///
/// - Each order belongs to exactly one garnishment group (type)
/// - Monetary fields are non-negative once [`CaseRecord::validate`] passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub employee_id: String,

    #[serde(flatten)]
    pub jurisdiction: Jurisdiction,

    #[serde(flatten)]
    pub demographics: Demographics,

    pub pay_period: PayPeriod,

    pub gross_pay: Money,

    /// Itemised payroll taxes and deductions, keyed by statutory name.
    #[serde(default)]
    pub payroll_deductions: BTreeMap<String, Money>,

    #[serde(default)]
    pub net_pay: Option<Money>,

    #[serde(default)]
    pub garnishments: Vec<GarnishmentGroup>,
}

impl CaseRecord {
    /// Creates a record with no deductions, demographics or orders.
    pub fn new(
        employee_id: impl Into<String>,
        work_state: impl Into<String>,
        pay_period: PayPeriod,
        gross_pay: Money,
    ) -> Self {
        CaseRecord {
            employee_id: employee_id.into(),
            jurisdiction: Jurisdiction::in_state(work_state),
            demographics: Demographics::default(),
            pay_period,
            gross_pay,
            payroll_deductions: BTreeMap::new(),
            net_pay: None,
            garnishments: Vec::new(),
        }
    }

    /// Returns `true` if no group carries an order.
    pub fn has_no_orders(&self) -> bool {
        self.garnishments.iter().all(|g| g.orders.is_empty())
    }

    /// Checks the fields the engine relies on before any allocation.
    ///
    /// Deduction names are checked later by the earnings resolver.
    pub fn validate(&self) -> Result<()> {
        if self.employee_id.trim().is_empty() {
            return Err(EngineError::invalid("employee_id", "must not be empty"));
        }
        if self.jurisdiction.work_state.trim().is_empty() {
            return Err(EngineError::invalid("work_state", "must not be empty"));
        }
        check_amount("gross_pay", self.gross_pay)?;
        if let Some(net) = self.net_pay {
            check_amount("net_pay", net)?;
        }
        for (name, amount) in &self.payroll_deductions {
            check_amount(name, *amount)?;
        }
        for group in &self.garnishments {
            let mut seen = BTreeSet::new();
            for order in &group.orders {
                order.validate()?;
                if !seen.insert(order.case_id.as_str()) {
                    return Err(EngineError::invalid(
                        "case_id",
                        format!(
                            "duplicate case id {} within {}",
                            order.case_id, group.garnishment_type
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_amount(field: &str, amount: Money) -> Result<()> {
    if amount.is_negative() {
        return Err(EngineError::invalid(field, format!("negative amount {}", amount)));
    }
    if !amount.is_within_range() {
        return Err(EngineError::invalid(
            field,
            format!("amount {} exceeds {}", amount, Money::MAX_AMOUNT),
        ));
    }
    Ok(())
}

/// One element of a submitted batch: either an enriched record or the
/// enrichment collaborator's "not found" signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "enrichment", rename_all = "snake_case")]
pub enum CaseInput {
    Enriched(CaseRecord),
    NotFound {
        employee_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl CaseInput {
    pub fn employee_id(&self) -> &str {
        match self {
            CaseInput::Enriched(record) => &record.employee_id,
            CaseInput::NotFound { employee_id, .. } => employee_id,
        }
    }
}

impl From<CaseRecord> for CaseInput {
    fn from(record: CaseRecord) -> Self {
        CaseInput::Enriched(record)
    }
}

/// Normalises a US state abbreviation or name to its lowercase full name.
///
/// Unknown inputs are returned trimmed and lowercased, so `federal` and
/// non-US jurisdictions pass through unchanged.
pub fn normalize_state(state: &str) -> String {
    let key = state.trim().to_lowercase();
    if key.len() != 2 {
        return key;
    }

    let name = match key.as_str() {
        "al" => "alabama",
        "ak" => "alaska",
        "az" => "arizona",
        "ar" => "arkansas",
        "ca" => "california",
        "co" => "colorado",
        "ct" => "connecticut",
        "de" => "delaware",
        "dc" => "district of columbia",
        "fl" => "florida",
        "ga" => "georgia",
        "hi" => "hawaii",
        "id" => "idaho",
        "il" => "illinois",
        "in" => "indiana",
        "ia" => "iowa",
        "ks" => "kansas",
        "ky" => "kentucky",
        "la" => "louisiana",
        "me" => "maine",
        "md" => "maryland",
        "ma" => "massachusetts",
        "mi" => "michigan",
        "mn" => "minnesota",
        "ms" => "mississippi",
        "mo" => "missouri",
        "mt" => "montana",
        "ne" => "nebraska",
        "nv" => "nevada",
        "nh" => "new hampshire",
        "nj" => "new jersey",
        "nm" => "new mexico",
        "ny" => "new york",
        "nc" => "north carolina",
        "nd" => "north dakota",
        "oh" => "ohio",
        "ok" => "oklahoma",
        "or" => "oregon",
        "pa" => "pennsylvania",
        "ri" => "rhode island",
        "sc" => "south carolina",
        "sd" => "south dakota",
        "tn" => "tennessee",
        "tx" => "texas",
        "ut" => "utah",
        "vt" => "vermont",
        "va" => "virginia",
        "wa" => "washington",
        "wv" => "west virginia",
        "wi" => "wisconsin",
        "wy" => "wyoming",
        _ => return key,
    };
    name.to_string()
}
