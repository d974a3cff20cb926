//! Administrative fees on granted withholdings.

use crate::case::Demographics;
use crate::config::{FeeSchedule, RuleTable, StatutoryRule};
use crate::error::Result;
use crate::garnishment::GarnishmentType;
use crate::money::Money;

/// Raw fee a schedule charges on `withheld`.
pub fn schedule_fee(schedule: &FeeSchedule, withheld: Money) -> Money {
    if withheld.is_zero() {
        return Money::ZERO;
    }
    match schedule {
        FeeSchedule::Flat { amount } => *amount,
        FeeSchedule::Percent {
            percent,
            minimum,
            maximum,
        } => {
            let mut fee = withheld.percent_of(*percent);
            if let Some(min) = minimum {
                fee = fee.max(*min);
            }
            if let Some(max) = maximum {
                fee = fee.min(*max);
            }
            fee
        }
        FeeSchedule::Tiered { tiers } => tiers
            .iter()
            .find(|tier| tier.up_to.map_or(true, |bound| withheld <= bound))
            .map_or(Money::ZERO, |tier| tier.amount + withheld.percent_of(tier.percent)),
    }
}

/// Fee for a type in a jurisdiction, straight from the rule's schedule.
pub fn fee(rules: &RuleTable, garnishment_type: GarnishmentType, withheld: Money, jurisdiction: &str) -> Result<Money> {
    let rule = rules.lookup(garnishment_type, jurisdiction, None)?;
    Ok(rule
        .fee
        .as_ref()
        .map_or(Money::ZERO, |schedule| schedule_fee(schedule, withheld)))
}

/// Fee actually withheld for one allocation slot.
///
/// Zero when nothing was granted, the rule has no schedule or the employee's
/// fees are suspended. Unless the rule allows fee-on-top, the fee is cut to
/// the headroom left between `granted` and the slot's `limit`.
pub fn assess(rule: &StatutoryRule, granted: Money, limit: Money, demographics: &Demographics) -> Money {
    if granted.is_zero() || demographics.garnishment_fees_suspended {
        return Money::ZERO;
    }
    let Some(schedule) = &rule.fee else {
        return Money::ZERO;
    };

    let fee = schedule_fee(schedule, granted);
    if rule.fee_on_top {
        fee
    } else {
        fee.min(limit.saturating_sub(granted))
    }
}
