//! Disposable earnings: gross pay less the deductions the law requires.

use crate::error::{EngineError, Result};
use crate::money::Money;
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Payroll deductions an enriched record may itemise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayrollDeduction {
    FederalIncomeTax,
    SocialSecurityTax,
    MedicareTax,
    StateTax,
    LocalTax,
    CaliforniaSdi,
    WilmingtonTax,
    FamliTax,
    IndustrialInsurance,
    UnionDues,
    MedicalInsurancePretax,
    LifeInsurance,
    Retirement401k,
}

impl PayrollDeduction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayrollDeduction::FederalIncomeTax => "federal_income_tax",
            PayrollDeduction::SocialSecurityTax => "social_security_tax",
            PayrollDeduction::MedicareTax => "medicare_tax",
            PayrollDeduction::StateTax => "state_tax",
            PayrollDeduction::LocalTax => "local_tax",
            PayrollDeduction::CaliforniaSdi => "california_sdi",
            PayrollDeduction::WilmingtonTax => "wilmington_tax",
            PayrollDeduction::FamliTax => "famli_tax",
            PayrollDeduction::IndustrialInsurance => "industrial_insurance",
            PayrollDeduction::UnionDues => "union_dues",
            PayrollDeduction::MedicalInsurancePretax => "medical_insurance_pretax",
            PayrollDeduction::LifeInsurance => "life_insurance",
            PayrollDeduction::Retirement401k => "retirement_401k",
        }
    }

    /// Taxes and legally required insurance reduce disposable earnings;
    /// voluntary deductions do not.
    pub fn is_mandatory(&self) -> bool {
        !matches!(
            self,
            PayrollDeduction::UnionDues
                | PayrollDeduction::MedicalInsurancePretax
                | PayrollDeduction::LifeInsurance
                | PayrollDeduction::Retirement401k
        )
    }
}

impl fmt::Display for PayrollDeduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayrollDeduction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "federal_income_tax" => Ok(PayrollDeduction::FederalIncomeTax),
            "social_security_tax" => Ok(PayrollDeduction::SocialSecurityTax),
            "medicare_tax" => Ok(PayrollDeduction::MedicareTax),
            "state_tax" => Ok(PayrollDeduction::StateTax),
            "local_tax" => Ok(PayrollDeduction::LocalTax),
            "california_sdi" => Ok(PayrollDeduction::CaliforniaSdi),
            "wilmington_tax" => Ok(PayrollDeduction::WilmingtonTax),
            "famli_tax" => Ok(PayrollDeduction::FamliTax),
            "industrial_insurance" => Ok(PayrollDeduction::IndustrialInsurance),
            "union_dues" => Ok(PayrollDeduction::UnionDues),
            "medical_insurance_pretax" => Ok(PayrollDeduction::MedicalInsurancePretax),
            "life_insurance" => Ok(PayrollDeduction::LifeInsurance),
            "retirement_401k" => Ok(PayrollDeduction::Retirement401k),
            _ => Err(EngineError::invalid(
                "payroll_deductions",
                format!("unrecognized deduction {}", s.trim()),
            )),
        }
    }
}

/// Resolves disposable earnings from gross pay and itemised deductions.
///
/// Every name must be a known [`PayrollDeduction`]; only mandatory items are
/// subtracted. The result is floored at zero.
///
/// # Errors
///
/// [`EngineError::InvalidInput`] for negative gross pay, a negative
/// deduction, an unrecognised deduction name or deductions too large to sum.
pub fn resolve(gross_pay: Money, deductions: &BTreeMap<String, Money>) -> Result<Money> {
    if gross_pay.is_negative() {
        return Err(EngineError::invalid(
            "gross_pay",
            format!("negative amount {}", gross_pay),
        ));
    }

    let mut mandatory = Money::ZERO;
    for (name, amount) in deductions {
        let deduction: PayrollDeduction = name.parse()?;
        if amount.is_negative() {
            return Err(EngineError::invalid(
                deduction.as_str(),
                format!("negative amount {}", amount),
            ));
        }
        if deduction.is_mandatory() {
            mandatory = mandatory.checked_add(*amount).ok_or_else(|| {
                EngineError::invalid("payroll_deductions", "mandatory deductions overflow")
            })?;
        }
    }

    let disposable = gross_pay.saturating_sub(mandatory);
    debug!(
        "Disposable earnings {} (gross {}, mandatory deductions {})",
        disposable, gross_pay, mandatory
    );
    Ok(disposable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deductions(items: &[(&str, i64)]) -> BTreeMap<String, Money> {
        items
            .iter()
            .map(|(name, units)| (name.to_string(), Money::from_units(*units)))
            .collect()
    }

    #[test]
    fn test_subtracts_only_mandatory_items() {
        let items = deductions(&[
            ("federal_income_tax", 100),
            ("social_security_tax", 62),
            ("medicare_tax", 15),
            ("union_dues", 20),
            ("retirement_401k", 50),
        ]);
        let de = resolve(Money::from_units(1000), &items).unwrap();
        assert_eq!(de, Money::from_units(823));
    }

    #[test]
    fn test_no_deductions() {
        let de = resolve(Money::from_units(500), &BTreeMap::new()).unwrap();
        assert_eq!(de, Money::from_units(500));
    }

    #[test]
    fn test_floors_at_zero() {
        let items = deductions(&[("federal_income_tax", 300), ("state_tax", 300)]);
        let de = resolve(Money::from_units(400), &items).unwrap();
        assert_eq!(de, Money::ZERO);
    }

    #[test]
    fn test_rejects_negative_gross() {
        let err = resolve(Money::from_units(-1), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { field, .. } if field == "gross_pay"));
    }

    #[test]
    fn test_rejects_unknown_deduction() {
        let items = deductions(&[("yacht_fund", 10)]);
        let err = resolve(Money::from_units(1000), &items).unwrap_err();
        assert!(err.to_string().contains("yacht_fund"));
    }

    #[test]
    fn test_rejects_negative_deduction() {
        let items = deductions(&[("medicare_tax", -5)]);
        assert!(resolve(Money::from_units(1000), &items).is_err());
    }

    #[test]
    fn test_rejects_overflowing_deductions() {
        let huge = Money::new(rust_decimal::Decimal::MAX);
        let items: BTreeMap<String, Money> = [("federal_income_tax", huge), ("state_tax", huge)]
            .into_iter()
            .map(|(name, amount)| (name.to_string(), amount))
            .collect();
        let err = resolve(Money::from_units(1000), &items).unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_deduction_names_round_trip() {
        for name in ["california_sdi", "famli_tax", "Wilmington_Tax"] {
            let parsed: PayrollDeduction = name.parse().unwrap();
            assert_eq!(parsed.as_str(), name.to_lowercase());
            assert!(parsed.is_mandatory());
        }
        assert!(!"life_insurance".parse::<PayrollDeduction>().unwrap().is_mandatory());
    }
}
