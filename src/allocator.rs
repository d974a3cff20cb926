//! Priority allocation of one employee's disposable earnings.
//!
//! Types are satisfied in statutory rank order. Each type's limit is
//! evaluated against the budget left by the types before it, and whatever it
//! withholds is removed from that budget before the next type is considered.

use crate::case::CaseRecord;
use crate::config::{AllocationMethod, RuleTable, StatutoryRule};
use crate::error::{EngineError, Result};
use crate::evaluator::{evaluator_for, EvaluationContext};
use crate::fees;
use crate::garnishment::{GarnishmentOrder, GarnishmentType};
use crate::money::Money;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// How far a type's outstanding balance was satisfied this period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Full,
    Partial,
    /// A balance is owed but no budget was left for it.
    InsufficientBudget,
    NothingOwed,
}

impl AllocationStatus {
    fn classify(withheld: Money, outstanding: Money) -> Self {
        if outstanding.is_zero() {
            AllocationStatus::NothingOwed
        } else if withheld >= outstanding {
            AllocationStatus::Full
        } else if withheld.is_zero() {
            AllocationStatus::InsufficientBudget
        } else {
            AllocationStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Full => "full",
            AllocationStatus::Partial => "partial",
            AllocationStatus::InsufficientBudget => "insufficient_budget",
            AllocationStatus::NothingOwed => "nothing_owed",
        }
    }
}

/// One order's share of its type's withholding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAllocation {
    pub case_id: String,
    pub ordered_amount: Money,
    pub arrear_amount: Money,
    pub withheld: Money,
    /// Part of `withheld` applied to the current ordered amount
    pub current_withheld: Money,
    /// Part of `withheld` applied to arrears
    pub arrear_withheld: Money,
    pub remaining_balance: Money,
}

/// Outcome for one garnishment type on a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationResult {
    pub garnishment_type: GarnishmentType,
    pub priority: u32,
    /// Budget left when this type was reached
    pub available_budget: Money,
    /// Statutory limit against `available_budget`
    pub limit: Money,
    pub outstanding: Money,
    pub withheld: Money,
    pub fee: Money,
    pub remaining_balance: Money,
    pub status: AllocationStatus,
    /// Sorted by case id
    pub orders: Vec<OrderAllocation>,
}

/// Orders that never reached evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedGarnishment {
    pub garnishment_type: String,
    pub case_ids: Vec<String>,
    pub reason: String,
}

/// Everything the allocator decided for one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub disposable_earnings: Money,
    /// In allocation order: priority rank, then type
    pub results: Vec<AllocationResult>,
    pub skipped: Vec<SkippedGarnishment>,
    pub remaining_budget: Money,
}

impl Allocation {
    pub fn total_withheld(&self) -> Money {
        self.results.iter().map(|r| r.withheld).sum()
    }

    pub fn total_fees(&self) -> Money {
        self.results.iter().map(|r| r.fee).sum()
    }
}

/// Allocates `disposable_earnings` across the case's garnishments.
///
/// Groups whose type tag is unknown, or that have no rule for the work
/// state, are reported in [`Allocation::skipped`]; every other type gets a
/// result, including zero-withholding ones.
///
/// # Errors
///
/// [`EngineError::InvalidInput`] when an order total or a per-order share
/// does not fit in a [`Money`] amount.
pub fn allocate(disposable_earnings: Money, case: &CaseRecord, rules: &RuleTable) -> Result<Allocation> {
    let state = &case.jurisdiction.work_state;
    let context = case.demographics.filing_context.as_deref();
    let mut skipped = Vec::new();

    let mut by_type: BTreeMap<GarnishmentType, Vec<&GarnishmentOrder>> = BTreeMap::new();
    for group in &case.garnishments {
        if group.orders.is_empty() {
            continue;
        }
        match group.parsed_type() {
            Ok(kind) => by_type.entry(kind).or_default().extend(group.orders.iter()),
            Err(e) => {
                warn!("Skipping {} orders for {}: {}", group.garnishment_type, case.employee_id, e);
                skipped.push(skip(&group.garnishment_type, group.orders.iter(), e.to_string()));
            }
        }
    }

    let mut slots: Vec<(&StatutoryRule, GarnishmentType, Vec<&GarnishmentOrder>)> = Vec::new();
    for (kind, orders) in by_type {
        match rules.lookup(kind, state, context) {
            Ok(rule) => slots.push((rule, kind, orders)),
            Err(e) => {
                warn!("Skipping {} orders for {}: {}", kind, case.employee_id, e);
                skipped.push(skip(kind.as_str(), orders.into_iter(), e.to_string()));
            }
        }
    }
    slots.sort_by(|a, b| a.0.priority.cmp(&b.0.priority).then(a.1.cmp(&b.1)));

    let minimum_wage = rules.minimum_wage(state);
    let mut remaining = disposable_earnings.floor_zero();
    let mut results = Vec::with_capacity(slots.len());

    for (rule, kind, orders) in slots {
        let ordered = checked_total(orders.iter().map(|o| o.ordered_amount), kind)?;
        let mut outstanding = Money::ZERO;
        for order in &orders {
            outstanding = outstanding
                .checked_add(order_balance(order)?)
                .ok_or_else(|| overflow(kind.as_str()))?;
        }
        let ctx = EvaluationContext::new(case, remaining, ordered, outstanding, minimum_wage);

        let limit = evaluator_for(kind).limit(rule, &ctx);
        let withheld = limit.min(outstanding);
        let fee = fees::assess(rule, withheld, limit, &case.demographics);
        let status = AllocationStatus::classify(withheld, outstanding);

        debug!(
            "{} {}: budget {} limit {} owed {} withheld {} fee {}",
            case.employee_id, kind, remaining, limit, outstanding, withheld, fee
        );

        let result = AllocationResult {
            garnishment_type: kind,
            priority: rule.priority,
            available_budget: remaining,
            limit,
            outstanding,
            withheld,
            fee,
            remaining_balance: outstanding.saturating_sub(withheld),
            status,
            orders: distribute(withheld, &orders, rule.allocation_method)?,
        };
        remaining = remaining.saturating_sub(withheld);
        results.push(result);
    }

    Ok(Allocation {
        disposable_earnings,
        results,
        skipped,
        remaining_budget: remaining,
    })
}

fn skip<'a>(garnishment_type: &str, orders: impl Iterator<Item = &'a GarnishmentOrder>, reason: String) -> SkippedGarnishment {
    SkippedGarnishment {
        garnishment_type: garnishment_type.to_string(),
        case_ids: orders.map(|o| o.case_id.clone()).collect(),
        reason,
    }
}

fn overflow(field: &str) -> EngineError {
    EngineError::invalid(field, "amount out of range")
}

fn checked_total(amounts: impl Iterator<Item = Money>, kind: GarnishmentType) -> Result<Money> {
    let mut total = Money::ZERO;
    for amount in amounts {
        total = total.checked_add(amount).ok_or_else(|| overflow(kind.as_str()))?;
    }
    Ok(total)
}

fn order_balance(order: &GarnishmentOrder) -> Result<Money> {
    order
        .ordered_amount
        .checked_add(order.arrear_amount)
        .ok_or_else(|| overflow(&order.case_id))
}

fn to_cents(amount: Money, field: &str) -> Result<i128> {
    amount.cents().ok_or_else(|| overflow(field))
}

/// Splits `granted` across orders with the rule's method.
///
/// Work is done in whole cents, so the shares always sum to `granted`
/// exactly and no order gets more than it owes.
fn distribute(granted: Money, orders: &[&GarnishmentOrder], method: AllocationMethod) -> Result<Vec<OrderAllocation>> {
    let granted_cents = to_cents(granted, "withheld")?;
    let mut owed = Vec::with_capacity(orders.len());
    for order in orders {
        owed.push(to_cents(order_balance(order)?, &order.case_id)?);
    }

    let shares = match method {
        AllocationMethod::ProRata => pro_rata(granted_cents, &owed, orders)?,
        AllocationMethod::DivideEqually => divide_equally(granted_cents, &owed, orders),
    };

    let mut allocations = Vec::with_capacity(orders.len());
    for ((order, cents), balance) in orders.iter().zip(shares).zip(&owed) {
        let withheld = Money::from_cents_wide(cents).ok_or_else(|| overflow(&order.case_id))?;
        let current_withheld = withheld.min(order.ordered_amount);
        let remaining_balance =
            Money::from_cents_wide(balance - cents).ok_or_else(|| overflow(&order.case_id))?;
        allocations.push(OrderAllocation {
            case_id: order.case_id.clone(),
            ordered_amount: order.ordered_amount,
            arrear_amount: order.arrear_amount,
            withheld,
            current_withheld,
            arrear_withheld: withheld - current_withheld,
            remaining_balance,
        });
    }
    allocations.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(allocations)
}

/// Pro-rata by outstanding balance: floored shares, then leftover cents one
/// at a time to the largest fractional remainders, ties by case id.
fn pro_rata(granted: i128, owed: &[i128], orders: &[&GarnishmentOrder]) -> Result<Vec<i128>> {
    let mut shares = vec![0i128; owed.len()];
    let total = owed
        .iter()
        .try_fold(0i128, |acc, o| acc.checked_add(*o))
        .ok_or_else(|| overflow("outstanding"))?;
    if total <= 0 || granted <= 0 {
        return Ok(shares);
    }

    let mut remainders = Vec::with_capacity(owed.len());
    for (i, owed) in owed.iter().enumerate() {
        let exact = granted
            .checked_mul(*owed)
            .ok_or_else(|| overflow(&orders[i].case_id))?;
        shares[i] = exact / total;
        remainders.push((i, exact % total));
    }

    let mut leftover = granted - shares.iter().sum::<i128>();
    remainders.sort_by(|a, b| match b.1.cmp(&a.1) {
        Ordering::Equal => orders[a.0].case_id.cmp(&orders[b.0].case_id),
        other => other,
    });
    for (i, remainder) in remainders {
        if leftover == 0 || remainder == 0 {
            break;
        }
        if shares[i] < owed[i] {
            shares[i] += 1;
            leftover -= 1;
        }
    }
    Ok(shares)
}

/// Equal shares, capped at each order's balance. Whatever a capped order
/// leaves is split again among the rest; the last odd cents go one each by
/// case id.
fn divide_equally(granted: i128, owed: &[i128], orders: &[&GarnishmentOrder]) -> Vec<i128> {
    let mut shares = vec![0i128; owed.len()];
    let mut left = granted;
    loop {
        let mut open: Vec<usize> = (0..owed.len()).filter(|&i| shares[i] < owed[i]).collect();
        if open.is_empty() || left <= 0 {
            break;
        }
        let per = left / open.len() as i128;
        if per == 0 {
            open.sort_by(|&a, &b| orders[a].case_id.cmp(&orders[b].case_id));
            for i in open.into_iter().take(left as usize) {
                shares[i] += 1;
            }
            break;
        }
        for i in open {
            let take = per.min(owed[i] - shares[i]);
            shares[i] += take;
            left -= take;
        }
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::PayPeriod;
    use crate::garnishment::GarnishmentGroup;
    use std::str::FromStr;

    fn money(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn order(id: &str, ordered: &str, arrears: &str) -> GarnishmentOrder {
        GarnishmentOrder::new(id, money(ordered), money(arrears))
    }

    fn case_with(groups: Vec<GarnishmentGroup>) -> CaseRecord {
        let mut case = CaseRecord::new("EE1", "TX", PayPeriod::Weekly, Money::from_units(1000));
        case.garnishments = groups;
        case
    }

    #[test]
    fn test_single_child_support_order() {
        let case = case_with(vec![GarnishmentGroup::new(
            GarnishmentType::ChildSupport,
            vec![order("CS1", "100", "20")],
        )]);
        let allocation = allocate(Money::from_units(1000), &case, &RuleTable::federal_defaults()).unwrap();

        let cs = &allocation.results[0];
        assert_eq!(cs.withheld, Money::from_units(120));
        assert_eq!(cs.fee, Money::from_units(1));
        assert_eq!(cs.status, AllocationStatus::Full);
        assert_eq!(cs.orders[0].current_withheld, Money::from_units(100));
        assert_eq!(cs.orders[0].arrear_withheld, Money::from_units(20));
        assert_eq!(allocation.remaining_budget, Money::from_units(880));
    }

    #[test]
    fn test_sequential_budget_consumption() {
        let case = case_with(vec![
            GarnishmentGroup::new(GarnishmentType::FederalTaxLevy, vec![order("TL1", "1000", "0")]),
            GarnishmentGroup::new(GarnishmentType::ChildSupport, vec![order("CS1", "400", "0")]),
        ]);
        let allocation = allocate(Money::from_units(500), &case, &RuleTable::federal_defaults()).unwrap();

        assert_eq!(allocation.results[0].garnishment_type, GarnishmentType::ChildSupport);
        assert_eq!(allocation.results[0].withheld, Money::from_units(300));

        let levy = &allocation.results[1];
        assert_eq!(levy.available_budget, Money::from_units(200));
        // 200 is below the weekly single exemption of 280.77
        assert_eq!(levy.withheld, Money::ZERO);
        assert_eq!(levy.status, AllocationStatus::InsufficientBudget);
        assert_eq!(allocation.total_withheld(), Money::from_units(300));
    }

    #[test]
    fn test_pro_rata_distribution_by_outstanding() {
        let case = case_with(vec![GarnishmentGroup::new(
            GarnishmentType::ChildSupport,
            vec![order("B", "300", "0"), order("A", "600", "300")],
        )]);
        // 60% of 1000 = 600 across 300 and 900 owed
        let allocation = allocate(Money::from_units(1000), &case, &RuleTable::federal_defaults()).unwrap();
        let orders = &allocation.results[0].orders;

        assert_eq!(orders[0].case_id, "A");
        assert_eq!(orders[0].withheld, Money::from_units(450));
        assert_eq!(orders[0].current_withheld, Money::from_units(450));
        assert_eq!(orders[1].case_id, "B");
        assert_eq!(orders[1].withheld, Money::from_units(150));
        assert_eq!(allocation.results[0].status, AllocationStatus::Partial);
    }

    #[test]
    fn test_leftover_cents_go_to_lowest_case_id_on_ties() {
        let a = order("A", "10", "0");
        let b = order("B", "10", "0");
        let c = order("C", "10", "0");
        let split = distribute(money("0.02"), &[&c, &b, &a], AllocationMethod::ProRata).unwrap();

        assert_eq!(split[0].withheld, Money::CENT);
        assert_eq!(split[1].withheld, Money::CENT);
        assert_eq!(split[2].withheld, Money::ZERO);
    }

    #[test]
    fn test_distribution_sums_to_granted() {
        let a = order("A", "33.33", "0");
        let b = order("B", "33.33", "0");
        let c = order("C", "33.34", "0");
        let split = distribute(Money::from_units(50), &[&a, &b, &c], AllocationMethod::ProRata).unwrap();
        let total: Money = split.iter().map(|o| o.withheld).sum();
        assert_eq!(total, Money::from_units(50));
        assert!(split.iter().all(|o| o.withheld <= o.ordered_amount));
    }

    #[test]
    fn test_unknown_type_is_skipped_not_fatal() {
        let mut groups = vec![GarnishmentGroup::new(
            GarnishmentType::CreditorDebt,
            vec![order("CD1", "50", "0")],
        )];
        groups.push(GarnishmentGroup {
            garnishment_type: "pet_support".to_string(),
            orders: vec![order("PS1", "10", "0")],
        });
        let allocation = allocate(Money::from_units(1000), &case_with(groups), &RuleTable::federal_defaults()).unwrap();

        assert_eq!(allocation.results.len(), 1);
        assert_eq!(allocation.results[0].withheld, Money::from_units(50));
        assert_eq!(allocation.skipped.len(), 1);
        assert_eq!(allocation.skipped[0].case_ids, vec!["PS1".to_string()]);
        assert!(allocation.skipped[0].reason.contains("pet_support"));
    }

    #[test]
    fn test_missing_rule_is_skipped() {
        let table = RuleTable::from_rules(
            "cs-only",
            vec![StatutoryRule::federal(
                GarnishmentType::ChildSupport,
                1,
                crate::config::ExemptionSpec::default(),
            )],
        )
        .unwrap();
        let case = case_with(vec![GarnishmentGroup::new(
            GarnishmentType::Bankruptcy,
            vec![order("BK1", "50", "0")],
        )]);
        let allocation = allocate(Money::from_units(1000), &case, &table).unwrap();
        assert!(allocation.results.is_empty());
        assert_eq!(allocation.skipped[0].garnishment_type, "bankruptcy");
    }

    #[test]
    fn test_zero_disposable_earnings() {
        let case = case_with(vec![
            GarnishmentGroup::new(GarnishmentType::ChildSupport, vec![order("CS1", "100", "0")]),
            GarnishmentGroup::new(GarnishmentType::CreditorDebt, vec![order("CD1", "100", "0")]),
        ]);
        let allocation = allocate(Money::ZERO, &case, &RuleTable::federal_defaults()).unwrap();
        assert_eq!(allocation.results.len(), 2);
        for result in &allocation.results {
            assert_eq!(result.withheld, Money::ZERO);
            assert_eq!(result.fee, Money::ZERO);
            assert_eq!(result.status, AllocationStatus::InsufficientBudget);
        }
    }

    #[test]
    fn test_creditor_fee_limited_to_headroom() {
        let case = case_with(vec![GarnishmentGroup::new(
            GarnishmentType::CreditorDebt,
            vec![order("CD1", "5000", "0")],
        )]);
        // Limit is 25% of 1000 = 250, all of it granted: no headroom left.
        let allocation = allocate(Money::from_units(1000), &case, &RuleTable::federal_defaults()).unwrap();
        assert_eq!(allocation.results[0].withheld, Money::from_units(250));
        assert_eq!(allocation.results[0].fee, Money::ZERO);
    }

    #[test]
    fn test_same_type_groups_are_merged() {
        let case = case_with(vec![
            GarnishmentGroup::new(GarnishmentType::CreditorDebt, vec![order("CD2", "20", "0")]),
            GarnishmentGroup::new(GarnishmentType::CreditorDebt, vec![order("CD1", "30", "0")]),
        ]);
        let allocation = allocate(Money::from_units(1000), &case, &RuleTable::federal_defaults()).unwrap();
        assert_eq!(allocation.results.len(), 1);
        assert_eq!(allocation.results[0].withheld, Money::from_units(50));
        assert_eq!(allocation.results[0].orders[0].case_id, "CD1");
    }

    #[test]
    fn test_divide_equally_splits_evenly() {
        let a = order("A", "100", "0");
        let b = order("B", "300", "0");
        let split = distribute(Money::from_units(200), &[&b, &a], AllocationMethod::DivideEqually).unwrap();

        assert_eq!(split[0].case_id, "A");
        assert_eq!(split[0].withheld, Money::from_units(100));
        assert_eq!(split[1].withheld, Money::from_units(100));
        assert_eq!(split[1].remaining_balance, Money::from_units(200));
    }

    #[test]
    fn test_divide_equally_passes_unused_share_on() {
        let a = order("A", "10", "0");
        let b = order("B", "300", "0");
        let c = order("C", "300", "0");
        // 100 each, but A owes only 10; its 90 is split between B and C
        let split = distribute(Money::from_units(300), &[&a, &b, &c], AllocationMethod::DivideEqually).unwrap();

        assert_eq!(split[0].withheld, Money::from_units(10));
        assert_eq!(split[1].withheld, Money::from_units(145));
        assert_eq!(split[2].withheld, Money::from_units(145));
    }

    #[test]
    fn test_divide_equally_leftover_cents_by_case_id() {
        let a = order("A", "10", "0");
        let b = order("B", "10", "0");
        let c = order("C", "10", "0");
        let split = distribute(money("10.00"), &[&c, &a, &b], AllocationMethod::DivideEqually).unwrap();

        assert_eq!(split[0].withheld, money("3.34"));
        assert_eq!(split[1].withheld, money("3.33"));
        assert_eq!(split[2].withheld, money("3.33"));
        let total: Money = split.iter().map(|o| o.withheld).sum();
        assert_eq!(total, money("10.00"));
    }

    #[test]
    fn test_rule_allocation_method_is_applied() {
        let table = RuleTable::from_rules(
            "equal",
            vec![StatutoryRule::federal(
                GarnishmentType::ChildSupport,
                1,
                crate::config::ExemptionSpec {
                    percent_cap: Some(crate::config::PercentCap::of(60)),
                    ..Default::default()
                },
            )
            .with_allocation_method(AllocationMethod::DivideEqually)],
        )
        .unwrap();
        let case = case_with(vec![GarnishmentGroup::new(
            GarnishmentType::ChildSupport,
            vec![order("B", "300", "0"), order("A", "600", "300")],
        )]);
        let allocation = allocate(Money::from_units(1000), &case, &table).unwrap();
        let orders = &allocation.results[0].orders;

        // Pro-rata would give 450 / 150
        assert_eq!(orders[0].withheld, Money::from_units(300));
        assert_eq!(orders[1].withheld, Money::from_units(300));
    }

    #[test]
    fn test_large_balances_keep_their_breakdown() {
        let case = case_with(vec![GarnishmentGroup::new(
            GarnishmentType::ChildSupport,
            vec![order("CS1", "100000000000000000", "0")],
        )]);
        let allocation = allocate(money("1000000000000000000"), &case, &RuleTable::federal_defaults()).unwrap();
        let result = &allocation.results[0];

        assert_eq!(result.withheld, money("100000000000000000"));
        assert_eq!(result.orders[0].withheld, result.withheld);
        assert_eq!(result.orders[0].remaining_balance, Money::ZERO);
    }

    #[test]
    fn test_unrepresentable_split_fails_instead_of_zeroing() {
        let huge = "10000000000000000000000000";
        let a = order("A", huge, "0");
        let b = order("B", huge, "0");
        let err = distribute(money(huge), &[&a, &b], AllocationMethod::ProRata).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }
}
