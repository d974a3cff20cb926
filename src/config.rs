//! Statutory rule table.
//!
//! Rules are keyed by (garnishment type, jurisdiction, optional filing
//! context) and are read-only once loaded. The table is shared by every
//! evaluation in a batch through an `Arc` snapshot taken from a [`RuleBook`];
//! reloading swaps the whole table atomically, so a reader never observes a
//! half-updated rule set.
//!
//! Dollar thresholds on exemptions (`flat_threshold`, `tiered`) are weekly
//! amounts scaled to the case's pay period, the same way the minimum-wage
//! multiple is.

use crate::case::{normalize_state, Demographics, FilingStatus, PayPeriod};
use crate::error::{EngineError, Result};
use crate::garnishment::GarnishmentType;
use crate::money::Money;
use arc_swap::ArcSwap;
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

/// Jurisdiction tag for rules that apply everywhere.
pub const FEDERAL: &str = "federal";

/// Earnings base a percentage cap is applied to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentBasis {
    /// The remaining disposable-earnings budget.
    #[default]
    DisposableEarnings,
    /// Gross pay (some state tax levies).
    GrossPay,
}

/// Percentage-of-earnings ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentCap {
    pub percent: Decimal,

    /// Replaces `percent` when the employee supports a second family.
    #[serde(default)]
    pub second_family_percent: Option<Decimal>,

    /// Added when support arrears are older than twelve weeks.
    #[serde(default)]
    pub arrears_surcharge_percent: Option<Decimal>,

    #[serde(default)]
    pub basis: PercentBasis,
}

impl PercentCap {
    /// A plain cap of `percent` per cent of disposable earnings.
    pub fn of(percent: i64) -> Self {
        PercentCap {
            percent: Decimal::from(percent),
            second_family_percent: None,
            arrears_surcharge_percent: None,
            basis: PercentBasis::DisposableEarnings,
        }
    }

    /// The percentage that applies to this employee's household.
    pub fn resolve(&self, demographics: &Demographics) -> Decimal {
        let base = match self.second_family_percent {
            Some(p) if demographics.supports_second_family => p,
            _ => self.percent,
        };
        match self.arrears_surcharge_percent {
            Some(extra) if demographics.arrears_greater_than_12_weeks => base + extra,
            _ => base,
        }
    }
}

/// Three-band limit: nothing below `lower_threshold`, a share of the excess
/// between the thresholds, a flat share of earnings above `upper_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredCap {
    pub lower_threshold: Money,
    pub upper_threshold: Money,
    pub mid_percent: Decimal,
    pub upper_percent: Decimal,
}

/// Tax-levy style exemption built from annual amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardExemption {
    /// Annual standard amount per filing status; `single` is the fallback.
    pub annual_by_filing_status: BTreeMap<FilingStatus, Money>,

    #[serde(default)]
    pub annual_per_dependent: Money,

    /// Added once per condition (65 or older, blind) for employee and spouse.
    #[serde(default)]
    pub annual_additional_per_condition: Money,
}

impl StandardExemption {
    /// Exempt amount for one pay period.
    pub fn period_amount(&self, demographics: &Demographics, pay_period: PayPeriod) -> Money {
        let status = demographics
            .filing_status
            .unwrap_or(FilingStatus::Single)
            .exemption_status();
        let base = self
            .annual_by_filing_status
            .get(&status)
            .or_else(|| self.annual_by_filing_status.get(&FilingStatus::Single))
            .copied()
            .unwrap_or(Money::ZERO);
        let dependents = self
            .annual_per_dependent
            .scale_by(Decimal::from(demographics.dependents));
        let additional = self
            .annual_additional_per_condition
            .scale_by(Decimal::from(demographics.additional_exemption_conditions()));

        pay_period.from_annual(base + dependents + additional)
    }
}

/// How much of the earnings base is protected from a garnishment.
///
/// Every present component yields a withholding limit; the smallest limit
/// (the one most protective of the debtor) applies. With no component the
/// whole budget is available.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExemptionSpec {
    pub percent_cap: Option<PercentCap>,

    /// Weekly multiple of the applicable hourly minimum wage that is exempt.
    pub minimum_wage_multiple: Option<Decimal>,

    /// Weekly amount exempt outright.
    pub flat_threshold: Option<Money>,

    pub tiered: Option<TieredCap>,

    pub standard_exemption: Option<StandardExemption>,
}

/// Flat cap used instead of the earnings formula for small orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeMinimis {
    /// Applies when the current ordered amount is below this.
    pub order_threshold: Money,
    pub flat_cap: Money,
}

/// One band of a tiered fee schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    /// Inclusive upper bound on the withheld amount; `None` is unbounded.
    #[serde(default)]
    pub up_to: Option<Money>,

    #[serde(default)]
    pub amount: Money,

    #[serde(default)]
    pub percent: Decimal,
}

/// Administrative fee the employer may deduct for processing an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeSchedule {
    Flat {
        amount: Money,
    },
    Percent {
        percent: Decimal,
        #[serde(default)]
        minimum: Option<Money>,
        #[serde(default)]
        maximum: Option<Money>,
    },
    Tiered {
        tiers: Vec<FeeTier>,
    },
}

/// How a type's withholding is split across its orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    /// In proportion to each order's outstanding balance.
    #[default]
    ProRata,
    /// Equal shares; an order's unused share passes to the others.
    DivideEqually,
}

/// A statutory rule for one garnishment type in one jurisdiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatutoryRule {
    #[serde(deserialize_with = "garnishment_type_tag")]
    pub garnishment_type: GarnishmentType,

    /// `federal` or a state (abbreviation or name).
    #[serde(default = "federal_jurisdiction")]
    pub jurisdiction: String,

    #[serde(default)]
    pub filing_context: Option<String>,

    /// Lower rank is garnished first.
    pub priority: u32,

    #[serde(default)]
    pub exemption: ExemptionSpec,

    #[serde(default)]
    pub fee: Option<FeeSchedule>,

    /// The fee may be withheld beyond the type's statutory cap.
    #[serde(default)]
    pub fee_on_top: bool,

    #[serde(default)]
    pub de_minimis: Option<DeMinimis>,

    #[serde(default)]
    pub allocation_method: AllocationMethod,
}

fn federal_jurisdiction() -> String {
    FEDERAL.to_string()
}

fn garnishment_type_tag<'de, D>(deserializer: D) -> std::result::Result<GarnishmentType, D::Error>
where
    D: Deserializer<'de>,
{
    let tag = String::deserialize(deserializer)?;
    GarnishmentType::from_str(&tag).map_err(serde::de::Error::custom)
}

impl StatutoryRule {
    /// A federal rule with the given rank and exemption, no fee.
    pub fn federal(garnishment_type: GarnishmentType, priority: u32, exemption: ExemptionSpec) -> Self {
        StatutoryRule {
            garnishment_type,
            jurisdiction: FEDERAL.to_string(),
            filing_context: None,
            priority,
            exemption,
            fee: None,
            fee_on_top: false,
            de_minimis: None,
            allocation_method: AllocationMethod::ProRata,
        }
    }

    /// Same rule, scoped to a state.
    pub fn in_jurisdiction(mut self, jurisdiction: &str) -> Self {
        self.jurisdiction = jurisdiction.to_string();
        self
    }

    /// Same rule, scoped to a filing context.
    pub fn in_context(mut self, context: &str) -> Self {
        self.filing_context = Some(context.to_string());
        self
    }

    /// Same rule with a fee schedule.
    pub fn with_fee(mut self, fee: FeeSchedule, fee_on_top: bool) -> Self {
        self.fee = Some(fee);
        self.fee_on_top = fee_on_top;
        self
    }

    /// Same rule with a de-minimis flat cap.
    pub fn with_de_minimis(mut self, order_threshold: Money, flat_cap: Money) -> Self {
        self.de_minimis = Some(DeMinimis {
            order_threshold,
            flat_cap,
        });
        self
    }

    /// Same rule with a different split across orders.
    pub fn with_allocation_method(mut self, method: AllocationMethod) -> Self {
        self.allocation_method = method;
        self
    }

    fn key(&self) -> RuleKey {
        RuleKey::new(
            self.garnishment_type,
            &self.jurisdiction,
            self.filing_context.as_deref(),
        )
    }

    fn validate(&self) -> Result<()> {
        let label = format!(
            "{} rule for {}",
            self.garnishment_type, self.jurisdiction
        );
        let exemption = &self.exemption;

        if let Some(cap) = &exemption.percent_cap {
            check_percent(&label, "percent_cap.percent", cap.percent)?;
            if let Some(p) = cap.second_family_percent {
                check_percent(&label, "percent_cap.second_family_percent", p)?;
            }
            if let Some(p) = cap.arrears_surcharge_percent {
                check_percent(&label, "percent_cap.arrears_surcharge_percent", p)?;
                if cap.percent.max(cap.second_family_percent.unwrap_or(Decimal::ZERO)) + p
                    > Decimal::ONE_HUNDRED
                {
                    return Err(invalid_rule(&label, "percent cap with surcharge exceeds 100%"));
                }
            }
        }
        if let Some(multiple) = exemption.minimum_wage_multiple {
            if multiple.is_sign_negative() {
                return Err(invalid_rule(&label, "negative minimum_wage_multiple"));
            }
        }
        if let Some(threshold) = exemption.flat_threshold {
            check_amount(&label, "flat_threshold", threshold)?;
        }
        if let Some(tiered) = &exemption.tiered {
            check_amount(&label, "tiered.lower_threshold", tiered.lower_threshold)?;
            check_amount(&label, "tiered.upper_threshold", tiered.upper_threshold)?;
            check_percent(&label, "tiered.mid_percent", tiered.mid_percent)?;
            check_percent(&label, "tiered.upper_percent", tiered.upper_percent)?;
            if tiered.lower_threshold > tiered.upper_threshold {
                return Err(invalid_rule(&label, "tiered lower threshold above upper threshold"));
            }
        }
        if let Some(standard) = &exemption.standard_exemption {
            for amount in standard.annual_by_filing_status.values() {
                check_amount(&label, "standard_exemption", *amount)?;
            }
            check_amount(&label, "annual_per_dependent", standard.annual_per_dependent)?;
            check_amount(
                &label,
                "annual_additional_per_condition",
                standard.annual_additional_per_condition,
            )?;
        }
        if let Some(de_minimis) = &self.de_minimis {
            check_amount(&label, "de_minimis.order_threshold", de_minimis.order_threshold)?;
            check_amount(&label, "de_minimis.flat_cap", de_minimis.flat_cap)?;
        }
        if let Some(fee) = &self.fee {
            validate_fee(&label, fee)?;
        }
        Ok(())
    }
}

fn validate_fee(label: &str, fee: &FeeSchedule) -> Result<()> {
    match fee {
        FeeSchedule::Flat { amount } => check_amount(label, "fee.amount", *amount),
        FeeSchedule::Percent {
            percent,
            minimum,
            maximum,
        } => {
            check_percent(label, "fee.percent", *percent)?;
            if let Some(min) = minimum {
                check_amount(label, "fee.minimum", *min)?;
            }
            if let Some(max) = maximum {
                check_amount(label, "fee.maximum", *max)?;
            }
            if let (Some(min), Some(max)) = (minimum, maximum) {
                if min > max {
                    return Err(invalid_rule(label, "fee minimum above maximum"));
                }
            }
            Ok(())
        }
        FeeSchedule::Tiered { tiers } => {
            if tiers.is_empty() {
                return Err(invalid_rule(label, "tiered fee schedule without tiers"));
            }
            let mut previous: Option<Money> = None;
            for (i, tier) in tiers.iter().enumerate() {
                check_amount(label, "fee.tiers.amount", tier.amount)?;
                check_percent(label, "fee.tiers.percent", tier.percent)?;
                match tier.up_to {
                    Some(bound) => {
                        if previous.map_or(false, |p| bound <= p) {
                            return Err(invalid_rule(label, "fee tiers must ascend"));
                        }
                        previous = Some(bound);
                    }
                    None if i + 1 != tiers.len() => {
                        return Err(invalid_rule(label, "only the last fee tier may be unbounded"));
                    }
                    None => {}
                }
            }
            Ok(())
        }
    }
}

fn check_percent(label: &str, field: &str, value: Decimal) -> Result<()> {
    if (value.is_sign_negative() && !value.is_zero()) || value > Decimal::ONE_HUNDRED {
        return Err(invalid_rule(
            label,
            &format!("{} must be within 0..=100, got {}", field, value),
        ));
    }
    Ok(())
}

fn check_amount(label: &str, field: &str, value: Money) -> Result<()> {
    if value.is_negative() {
        return Err(invalid_rule(
            label,
            &format!("{} must not be negative, got {}", field, value),
        ));
    }
    Ok(())
}

fn invalid_rule(label: &str, message: &str) -> EngineError {
    EngineError::InvalidRuleTable(format!("{}: {}", label, message))
}

/// Lookup key of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub garnishment_type: GarnishmentType,
    pub jurisdiction: String,
    pub filing_context: Option<String>,
}

impl RuleKey {
    /// Builds a key with normalised jurisdiction and context.
    pub fn new(garnishment_type: GarnishmentType, jurisdiction: &str, filing_context: Option<&str>) -> Self {
        RuleKey {
            garnishment_type,
            jurisdiction: normalize_state(jurisdiction),
            filing_context: filing_context
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty()),
        }
    }
}

/// Serialized form of a rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTableDocument {
    pub version: String,

    #[serde(default = "default_federal_minimum_wage")]
    pub federal_minimum_wage: Money,

    #[serde(default)]
    pub state_minimum_wages: BTreeMap<String, Money>,

    pub rules: Vec<StatutoryRule>,
}

fn default_federal_minimum_wage() -> Money {
    Money::from_cents(725)
}

/// Validated, immutable statutory rule set.
#[derive(Debug, Clone)]
pub struct RuleTable {
    version: String,
    federal_minimum_wage: Money,
    state_minimum_wages: BTreeMap<String, Money>,
    rules: HashMap<RuleKey, StatutoryRule>,
}

impl RuleTable {
    /// Parses and validates a JSON rule table.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: RuleTableDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// Validates a rule table document.
    ///
    /// Fails with [`EngineError::InvalidRuleTable`] on out-of-range
    /// percentages, negative amounts, malformed fee tiers or duplicate keys.
    pub fn from_document(document: RuleTableDocument) -> Result<Self> {
        check_amount("rule table", "federal_minimum_wage", document.federal_minimum_wage)?;

        let mut state_minimum_wages = BTreeMap::new();
        for (state, wage) in document.state_minimum_wages {
            check_amount("rule table", "state_minimum_wages", wage)?;
            state_minimum_wages.insert(normalize_state(&state), wage);
        }

        let mut rules = HashMap::with_capacity(document.rules.len());
        for rule in document.rules {
            rule.validate()?;
            let key = rule.key();
            if rules.contains_key(&key) {
                return Err(EngineError::InvalidRuleTable(format!(
                    "duplicate rule for {} in {} (context {:?})",
                    key.garnishment_type, key.jurisdiction, key.filing_context
                )));
            }
            rules.insert(key, rule);
        }

        Ok(RuleTable {
            version: document.version,
            federal_minimum_wage: document.federal_minimum_wage,
            state_minimum_wages,
            rules,
        })
    }

    /// Builds a table from rules with the federal minimum wage.
    pub fn from_rules(version: impl Into<String>, rules: Vec<StatutoryRule>) -> Result<Self> {
        Self::from_document(RuleTableDocument {
            version: version.into(),
            federal_minimum_wage: default_federal_minimum_wage(),
            state_minimum_wages: BTreeMap::new(),
            rules,
        })
    }

    /// Same table with a state minimum wage override.
    pub fn with_state_minimum_wage(mut self, state: &str, wage: Money) -> Self {
        self.state_minimum_wages.insert(normalize_state(state), wage);
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Finds the most specific rule for a type in a state.
    ///
    /// Precedence: state + context, state, federal + context, federal.
    pub fn lookup(
        &self,
        garnishment_type: GarnishmentType,
        state: &str,
        filing_context: Option<&str>,
    ) -> Result<&StatutoryRule> {
        let mut candidates = Vec::with_capacity(4);
        if filing_context.is_some() {
            candidates.push(RuleKey::new(garnishment_type, state, filing_context));
        }
        candidates.push(RuleKey::new(garnishment_type, state, None));
        if filing_context.is_some() {
            candidates.push(RuleKey::new(garnishment_type, FEDERAL, filing_context));
        }
        candidates.push(RuleKey::new(garnishment_type, FEDERAL, None));

        candidates
            .iter()
            .find_map(|key| self.rules.get(key))
            .ok_or_else(|| EngineError::RuleNotFound {
                garnishment_type: garnishment_type.to_string(),
                jurisdiction: normalize_state(state),
            })
    }

    /// Hourly minimum wage for a state: the higher of federal and state.
    pub fn minimum_wage(&self, state: &str) -> Money {
        self.state_minimum_wages
            .get(&normalize_state(state))
            .map_or(self.federal_minimum_wage, |w| (*w).max(self.federal_minimum_wage))
    }

    /// Federal CCPA / IRS style defaults.
    ///
    /// Support orders first (60%, 50% with a second family, +5% for arrears
    /// older than twelve weeks), then federal tax levy, bankruptcy, student
    /// loan, state tax levy, franchise tax board and creditor debt. The
    /// amounts are ordinary data and can be replaced by a loaded table.
    pub fn federal_defaults() -> Self {
        let support_cap = PercentCap {
            percent: Decimal::from(60),
            second_family_percent: Some(Decimal::from(50)),
            arrears_surcharge_percent: Some(Decimal::from(5)),
            basis: PercentBasis::DisposableEarnings,
        };
        let ccpa = |percent: i64| ExemptionSpec {
            percent_cap: Some(PercentCap::of(percent)),
            minimum_wage_multiple: Some(Decimal::from(30)),
            ..ExemptionSpec::default()
        };

        let mut by_status = BTreeMap::new();
        by_status.insert(FilingStatus::Single, Money::from_units(14_600));
        by_status.insert(FilingStatus::MarriedFilingSeparateReturn, Money::from_units(14_600));
        by_status.insert(FilingStatus::MarriedFilingJointReturn, Money::from_units(29_200));
        by_status.insert(FilingStatus::HeadOfHousehold, Money::from_units(21_900));
        let levy = ExemptionSpec {
            standard_exemption: Some(StandardExemption {
                annual_by_filing_status: by_status,
                annual_per_dependent: Money::from_units(5_050),
                annual_additional_per_condition: Money::from_units(1_550),
            }),
            ..ExemptionSpec::default()
        };

        let ftb = ExemptionSpec {
            tiered: Some(TieredCap {
                lower_threshold: Money::from_cents(21_750),
                upper_threshold: Money::from_units(290),
                mid_percent: Decimal::ONE_HUNDRED,
                upper_percent: Decimal::from(25),
            }),
            ..ExemptionSpec::default()
        };

        let rules = vec![
            StatutoryRule::federal(
                GarnishmentType::ChildSupport,
                1,
                ExemptionSpec {
                    percent_cap: Some(support_cap.clone()),
                    ..ExemptionSpec::default()
                },
            )
            .with_fee(
                FeeSchedule::Flat {
                    amount: Money::from_units(1),
                },
                true,
            ),
            StatutoryRule::federal(
                GarnishmentType::SpousalAndMedicalSupport,
                2,
                ExemptionSpec {
                    percent_cap: Some(support_cap),
                    ..ExemptionSpec::default()
                },
            ),
            StatutoryRule::federal(GarnishmentType::FederalTaxLevy, 3, levy),
            StatutoryRule::federal(GarnishmentType::Bankruptcy, 4, ccpa(25)),
            StatutoryRule::federal(GarnishmentType::StudentDefaultLoan, 5, ccpa(15)),
            StatutoryRule::federal(GarnishmentType::StateTaxLevy, 6, ccpa(25)).with_fee(
                FeeSchedule::Tiered {
                    tiers: vec![
                        FeeTier {
                            up_to: Some(Money::from_units(50)),
                            amount: Money::ZERO,
                            percent: Decimal::from(10),
                        },
                        FeeTier {
                            up_to: None,
                            amount: Money::from_units(5),
                            percent: Decimal::ZERO,
                        },
                    ],
                },
                false,
            ),
            StatutoryRule::federal(GarnishmentType::FranchiseTaxBoard, 7, ftb),
            StatutoryRule::federal(GarnishmentType::CreditorDebt, 8, ccpa(25)).with_fee(
                FeeSchedule::Percent {
                    percent: Decimal::ONE,
                    minimum: Some(Money::from_units(2)),
                    maximum: None,
                },
                false,
            ),
            StatutoryRule::federal(
                GarnishmentType::CreditorDebt,
                8,
                ExemptionSpec {
                    percent_cap: Some(PercentCap::of(20)),
                    minimum_wage_multiple: Some(Decimal::from(40)),
                    ..ExemptionSpec::default()
                },
            )
            .in_jurisdiction("california"),
        ];

        let document = RuleTableDocument {
            version: "federal-defaults".to_string(),
            federal_minimum_wage: default_federal_minimum_wage(),
            state_minimum_wages: BTreeMap::from([("california".to_string(), Money::from_units(16))]),
            rules,
        };

        Self::from_document(document).unwrap_or_else(|e| {
            log::error!("built-in rule table rejected: {}", e);
            RuleTable {
                version: "empty".to_string(),
                federal_minimum_wage: default_federal_minimum_wage(),
                state_minimum_wages: BTreeMap::new(),
                rules: HashMap::new(),
            }
        })
    }
}

/// Process-wide handle on the current rule table.
///
/// Readers take a cheap `Arc` snapshot; [`RuleBook::replace`] installs a new
/// table in one atomic store.
pub struct RuleBook {
    table: ArcSwap<RuleTable>,
}

impl RuleBook {
    pub fn new(table: RuleTable) -> Self {
        RuleBook {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// The table current at the time of the call.
    pub fn snapshot(&self) -> Arc<RuleTable> {
        self.table.load_full()
    }

    /// Atomically installs `table`, returning the one it replaced.
    pub fn replace(&self, table: RuleTable) -> Arc<RuleTable> {
        info!("Installing rule table version {}", table.version());
        self.table.swap(Arc::new(table))
    }

    /// Version string of the current table.
    pub fn version(&self) -> String {
        self.table.load().version().to_string()
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        RuleBook::new(RuleTable::federal_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_JSON: &str = r#"{
        "version": "2025-01",
        "federal_minimum_wage": "7.25",
        "state_minimum_wages": {"WA": "16.28"},
        "rules": [
            {"garnishment_type": "child_support", "priority": 1,
             "exemption": {"percent_cap": {"percent": 60, "second_family_percent": 50,
                                           "arrears_surcharge_percent": 5}},
             "fee": {"kind": "flat", "amount": "1.00"}, "fee_on_top": true},
            {"garnishment_type": "creditor_debt", "priority": 8,
             "exemption": {"percent_cap": {"percent": 25}, "minimum_wage_multiple": 30}},
            {"garnishment_type": "creditor debt", "jurisdiction": "WA", "priority": 8,
             "exemption": {"percent_cap": {"percent": 20}, "minimum_wage_multiple": 35}},
            {"garnishment_type": "creditor_debt", "jurisdiction": "WA",
             "filing_context": "Consumer", "priority": 8,
             "exemption": {"percent_cap": {"percent": 15}}}
        ]
    }"#;

    #[test]
    fn test_from_json_loads_and_normalizes() {
        let table = RuleTable::from_json(TABLE_JSON).unwrap();
        assert_eq!(table.version(), "2025-01");
        assert_eq!(table.len(), 4);
        assert_eq!(table.minimum_wage("washington").to_string(), "16.28");
        assert_eq!(table.minimum_wage("TX").to_string(), "7.25");
    }

    #[test]
    fn test_lookup_precedence() {
        let table = RuleTable::from_json(TABLE_JSON).unwrap();

        let consumer = table
            .lookup(GarnishmentType::CreditorDebt, "WA", Some("consumer"))
            .unwrap();
        assert_eq!(consumer.filing_context.as_deref(), Some("Consumer"));

        let state = table.lookup(GarnishmentType::CreditorDebt, "wa", None).unwrap();
        assert_eq!(state.exemption.minimum_wage_multiple, Some(Decimal::from(35)));

        let federal = table
            .lookup(GarnishmentType::CreditorDebt, "TX", Some("consumer"))
            .unwrap();
        assert_eq!(federal.jurisdiction, FEDERAL);
    }

    #[test]
    fn test_lookup_missing_rule() {
        let table = RuleTable::from_json(TABLE_JSON).unwrap();
        let err = table
            .lookup(GarnishmentType::Bankruptcy, "TX", None)
            .unwrap_err();
        assert!(matches!(err, EngineError::RuleNotFound { .. }));
    }

    #[test]
    fn test_allocation_method_defaults_to_pro_rata() {
        let json = r#"{"version": "m", "rules": [
            {"garnishment_type": "child_support", "priority": 1},
            {"garnishment_type": "creditor_debt", "priority": 8,
             "allocation_method": "divide_equally"}]}"#;
        let table = RuleTable::from_json(json).unwrap();

        let support = table.lookup(GarnishmentType::ChildSupport, "TX", None).unwrap();
        assert_eq!(support.allocation_method, AllocationMethod::ProRata);
        let creditor = table.lookup(GarnishmentType::CreditorDebt, "TX", None).unwrap();
        assert_eq!(creditor.allocation_method, AllocationMethod::DivideEqually);

        let bad = r#"{"version": "m", "rules": [
            {"garnishment_type": "child_support", "priority": 1, "allocation_method": "lottery"}]}"#;
        assert!(RuleTable::from_json(bad).is_err());
    }

    #[test]
    fn test_rejects_unknown_type_at_load() {
        let json = r#"{"version": "x", "rules": [
            {"garnishment_type": "parking_ticket", "priority": 1}]}"#;
        let err = RuleTable::from_json(json).unwrap_err();
        assert!(err.to_string().contains("parking_ticket"));
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let rules = vec![
            StatutoryRule::federal(GarnishmentType::CreditorDebt, 1, ExemptionSpec::default()),
            StatutoryRule::federal(GarnishmentType::CreditorDebt, 2, ExemptionSpec::default()),
        ];
        assert!(matches!(
            RuleTable::from_rules("dup", rules),
            Err(EngineError::InvalidRuleTable(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_percent() {
        let rule = StatutoryRule::federal(
            GarnishmentType::CreditorDebt,
            1,
            ExemptionSpec {
                percent_cap: Some(PercentCap::of(120)),
                ..ExemptionSpec::default()
            },
        );
        assert!(RuleTable::from_rules("bad", vec![rule]).is_err());
    }

    #[test]
    fn test_rejects_unordered_fee_tiers() {
        let rule = StatutoryRule::federal(GarnishmentType::StateTaxLevy, 1, ExemptionSpec::default())
            .with_fee(
                FeeSchedule::Tiered {
                    tiers: vec![
                        FeeTier {
                            up_to: None,
                            amount: Money::from_units(5),
                            percent: Decimal::ZERO,
                        },
                        FeeTier {
                            up_to: Some(Money::from_units(50)),
                            amount: Money::ZERO,
                            percent: Decimal::ZERO,
                        },
                    ],
                },
                false,
            );
        assert!(RuleTable::from_rules("bad", vec![rule]).is_err());
    }

    #[test]
    fn test_percent_cap_resolution() {
        let cap = PercentCap {
            percent: Decimal::from(60),
            second_family_percent: Some(Decimal::from(50)),
            arrears_surcharge_percent: Some(Decimal::from(5)),
            basis: PercentBasis::DisposableEarnings,
        };
        let mut d = Demographics::default();
        assert_eq!(cap.resolve(&d), Decimal::from(60));
        d.arrears_greater_than_12_weeks = true;
        assert_eq!(cap.resolve(&d), Decimal::from(65));
        d.supports_second_family = true;
        assert_eq!(cap.resolve(&d), Decimal::from(55));
    }

    #[test]
    fn test_standard_exemption_period_amount() {
        let table = RuleTable::federal_defaults();
        let rule = table
            .lookup(GarnishmentType::FederalTaxLevy, "TX", None)
            .unwrap();
        let standard = rule.exemption.standard_exemption.as_ref().unwrap();

        let mut d = Demographics::default();
        // 14,600 / 52
        assert_eq!(standard.period_amount(&d, PayPeriod::Weekly).to_string(), "280.77");

        d.filing_status = Some(FilingStatus::QualifyingWidowers);
        d.dependents = 2;
        // (29,200 + 2 * 5,050) / 12
        assert_eq!(standard.period_amount(&d, PayPeriod::Monthly).to_string(), "3275.00");
    }

    #[test]
    fn test_federal_defaults_cover_every_type() {
        let table = RuleTable::federal_defaults();
        assert_eq!(table.version(), "federal-defaults");
        for kind in GarnishmentType::ALL {
            assert!(table.lookup(kind, "NV", None).is_ok(), "missing {}", kind);
        }
        assert_eq!(table.minimum_wage("CA"), Money::from_units(16));
    }

    #[test]
    fn test_rule_book_swaps_whole_table() {
        let book = RuleBook::default();
        let before = book.snapshot();
        assert_eq!(before.version(), "federal-defaults");

        let replacement = RuleTable::from_json(TABLE_JSON).unwrap();
        let old = book.replace(replacement);
        assert_eq!(old.version(), "federal-defaults");
        assert_eq!(book.version(), "2025-01");

        // Snapshots taken earlier keep seeing the table they loaded.
        assert_eq!(before.version(), "federal-defaults");
        assert_eq!(before.len(), RuleTable::federal_defaults().len());
    }
}
