//! Per-type statutory withholding limits.
//!
//! Each garnishment type has one [`RuleEvaluator`]. The set is closed: the
//! registry in [`evaluator_for`] is an exhaustive match over
//! [`GarnishmentType`], so adding a type without an evaluator does not
//! compile.

use crate::case::CaseRecord;
use crate::config::{ExemptionSpec, PercentBasis, RuleTable, StatutoryRule};
use crate::error::Result;
use crate::garnishment::GarnishmentType;
use crate::money::Money;
use log::debug;

/// Everything an evaluator may look at for one garnishment type.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Disposable earnings still unclaimed by higher-priority types.
    pub budget: Money,

    /// Sum of the type's current ordered amounts.
    pub ordered: Money,

    /// Sum of the type's ordered amounts and arrears.
    pub outstanding: Money,

    /// Applicable hourly minimum wage for the work state.
    pub minimum_wage: Money,

    pub case: &'a CaseRecord,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(case: &'a CaseRecord, budget: Money, ordered: Money, outstanding: Money, minimum_wage: Money) -> Self {
        EvaluationContext {
            budget,
            ordered,
            outstanding,
            minimum_wage,
            case,
        }
    }
}

/// Statutory formula for one garnishment type.
pub trait RuleEvaluator: Send + Sync {
    fn garnishment_type(&self) -> GarnishmentType;

    /// The type's limit from earnings alone, ignoring what is owed.
    fn statutory_cap(&self, rule: &StatutoryRule, ctx: &EvaluationContext<'_>) -> Money;

    /// Limit against the current budget, before the owed balance.
    ///
    /// A de-minimis flat cap replaces the earnings formula when the ordered
    /// amount is below its threshold.
    fn limit(&self, rule: &StatutoryRule, ctx: &EvaluationContext<'_>) -> Money {
        if ctx.budget.is_zero() {
            return Money::ZERO;
        }
        let cap = match &rule.de_minimis {
            Some(de_minimis) if ctx.ordered < de_minimis.order_threshold => de_minimis.flat_cap,
            _ => self.statutory_cap(rule, ctx),
        };
        cap.min(ctx.budget).floor_zero()
    }

    /// The most that may be withheld for this type in isolation.
    fn max_withholdable(&self, rule: &StatutoryRule, ctx: &EvaluationContext<'_>) -> Money {
        self.limit(rule, ctx).min(ctx.outstanding).floor_zero()
    }
}

/// Child support and spousal/medical support.
///
/// The percentage depends on the household; the minimum-wage floor does not
/// protect earnings from support orders.
pub struct SupportEvaluator(GarnishmentType);

impl RuleEvaluator for SupportEvaluator {
    fn garnishment_type(&self) -> GarnishmentType {
        self.0
    }

    fn statutory_cap(&self, rule: &StatutoryRule, ctx: &EvaluationContext<'_>) -> Money {
        exemption_limit(&rule.exemption, ctx.budget, ctx, false)
    }
}

/// Federal tax levy: everything above the standard exemption of the
/// employee's filing status, dependents and age/blindness conditions.
pub struct FederalTaxLevyEvaluator;

impl RuleEvaluator for FederalTaxLevyEvaluator {
    fn garnishment_type(&self) -> GarnishmentType {
        GarnishmentType::FederalTaxLevy
    }

    fn statutory_cap(&self, rule: &StatutoryRule, ctx: &EvaluationContext<'_>) -> Money {
        let base = match ctx.case.net_pay {
            Some(net) => ctx.budget.min(net),
            None => ctx.budget,
        };
        exemption_limit(&rule.exemption, base, ctx, true)
    }
}

/// CCPA-style types: the lesser of the percentage cap and the earnings
/// above the minimum-wage floor, plus whatever else the rule specifies.
pub struct StatutoryCapEvaluator(GarnishmentType);

impl RuleEvaluator for StatutoryCapEvaluator {
    fn garnishment_type(&self) -> GarnishmentType {
        self.0
    }

    fn statutory_cap(&self, rule: &StatutoryRule, ctx: &EvaluationContext<'_>) -> Money {
        exemption_limit(&rule.exemption, ctx.budget, ctx, true)
    }
}

static CHILD_SUPPORT: SupportEvaluator = SupportEvaluator(GarnishmentType::ChildSupport);
static SPOUSAL_SUPPORT: SupportEvaluator = SupportEvaluator(GarnishmentType::SpousalAndMedicalSupport);
static FEDERAL_TAX_LEVY: FederalTaxLevyEvaluator = FederalTaxLevyEvaluator;
static BANKRUPTCY: StatutoryCapEvaluator = StatutoryCapEvaluator(GarnishmentType::Bankruptcy);
static STUDENT_LOAN: StatutoryCapEvaluator = StatutoryCapEvaluator(GarnishmentType::StudentDefaultLoan);
static STATE_TAX_LEVY: StatutoryCapEvaluator = StatutoryCapEvaluator(GarnishmentType::StateTaxLevy);
static FRANCHISE_TAX_BOARD: StatutoryCapEvaluator = StatutoryCapEvaluator(GarnishmentType::FranchiseTaxBoard);
static CREDITOR_DEBT: StatutoryCapEvaluator = StatutoryCapEvaluator(GarnishmentType::CreditorDebt);

/// The evaluator registered for a type.
pub fn evaluator_for(garnishment_type: GarnishmentType) -> &'static dyn RuleEvaluator {
    match garnishment_type {
        GarnishmentType::ChildSupport => &CHILD_SUPPORT,
        GarnishmentType::SpousalAndMedicalSupport => &SPOUSAL_SUPPORT,
        GarnishmentType::FederalTaxLevy => &FEDERAL_TAX_LEVY,
        GarnishmentType::Bankruptcy => &BANKRUPTCY,
        GarnishmentType::StudentDefaultLoan => &STUDENT_LOAN,
        GarnishmentType::StateTaxLevy => &STATE_TAX_LEVY,
        GarnishmentType::FranchiseTaxBoard => &FRANCHISE_TAX_BOARD,
        GarnishmentType::CreditorDebt => &CREDITOR_DEBT,
    }
}

/// Maximum withholding for a type tag against `ctx.budget`.
///
/// # Errors
///
/// [`EngineError::UnsupportedGarnishmentType`] for an unknown tag,
/// [`EngineError::RuleNotFound`] when no rule covers the work state.
///
/// [`EngineError::UnsupportedGarnishmentType`]: crate::EngineError::UnsupportedGarnishmentType
/// [`EngineError::RuleNotFound`]: crate::EngineError::RuleNotFound
pub fn max_withholdable(rules: &RuleTable, garnishment_type: &str, ctx: &EvaluationContext<'_>) -> Result<Money> {
    let kind: GarnishmentType = garnishment_type.parse()?;
    let rule = rules.lookup(
        kind,
        &ctx.case.jurisdiction.work_state,
        ctx.case.demographics.filing_context.as_deref(),
    )?;
    Ok(evaluator_for(kind).max_withholdable(rule, ctx))
}

/// Applies every component of an exemption to `base` and keeps the
/// smallest resulting limit.
fn exemption_limit(spec: &ExemptionSpec, base: Money, ctx: &EvaluationContext<'_>, wage_floor: bool) -> Money {
    let case = ctx.case;
    let period = case.pay_period;
    let mut limit = base;

    if let Some(cap) = &spec.percent_cap {
        let earnings = match cap.basis {
            PercentBasis::DisposableEarnings => base,
            PercentBasis::GrossPay => case.gross_pay,
        };
        limit = limit.min(earnings.percent_of(cap.resolve(&case.demographics)));
    }

    if wage_floor {
        if let Some(multiple) = spec.minimum_wage_multiple {
            let exempt = ctx
                .minimum_wage
                .scale_by(period.minimum_wage_hours(multiple));
            limit = limit.min(base.saturating_sub(exempt));
        }
    }

    if let Some(threshold) = spec.flat_threshold {
        limit = limit.min(base.saturating_sub(period.from_weekly(threshold)));
    }

    if let Some(tiered) = &spec.tiered {
        let lower = period.from_weekly(tiered.lower_threshold);
        let upper = period.from_weekly(tiered.upper_threshold);
        let tier_limit = if base <= lower {
            Money::ZERO
        } else if base <= upper {
            (base - lower).percent_of(tiered.mid_percent)
        } else {
            base.percent_of(tiered.upper_percent)
        };
        limit = limit.min(tier_limit);
    }

    if let Some(standard) = &spec.standard_exemption {
        let exempt = standard.period_amount(&case.demographics, period);
        limit = limit.min(base.saturating_sub(exempt));
    }

    debug!(
        "Exemption limit {} on base {} for {}",
        limit, base, case.employee_id
    );
    limit.floor_zero()
}
