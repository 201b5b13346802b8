//! Tax rules and the tax pipeline.
//!
//! The `tax` module defines configurable deduction rules
//! ([`TaxConfiguration`]), the function that evaluates one rule against
//! a gross income ([`calculate_tax`]) and the [`TaxSchedule`] that runs
//! every applicable rule in priority order to produce a breakdown.
//! Rules are stored externally as JSON files and validated when loaded,
//! so a malformed bracket table is rejected before it can produce a
//! wrong amount.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PayrollError, Result};
use crate::models::{BreakdownLine, EmploymentType};
use crate::money::{percent_of, round_money};

/// How a rule turns income into an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxType {
    /// A fixed currency amount, independent of income.
    Flat,
    /// `rate` percent of the (capped) income.
    Percentage,
    /// Each bracket's slice of income is taxed at the bracket's rate.
    Progressive,
}

/// Which population a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliesTo {
    #[default]
    All,
    Employees,
    Contractors,
}

impl AppliesTo {
    pub fn covers(self, employment_type: EmploymentType) -> bool {
        match self {
            AppliesTo::All => true,
            AppliesTo::Employees => employment_type == EmploymentType::Employee,
            AppliesTo::Contractors => employment_type == EmploymentType::Contractor,
        }
    }
}

/// One slice of a progressive rule.  A missing `max` means the bracket
/// is unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBracket {
    pub min: Decimal,
    #[serde(default)]
    pub max: Option<Decimal>,
    /// Percentage on the 0-100 scale.
    pub rate: Decimal,
}

/// A named deduction rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxConfiguration {
    pub name: String,
    pub tax_type: TaxType,
    /// Currency amount for flat rules, percentage for percentage rules.
    #[serde(default)]
    pub rate: Option<Decimal>,
    /// Brackets ordered by ascending `min`; only used by progressive rules.
    #[serde(default)]
    pub brackets: Vec<TaxBracket>,
    #[serde(default)]
    pub minimum_income: Decimal,
    /// Income above this value is ignored by the calculation.
    #[serde(default)]
    pub maximum_income: Option<Decimal>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub applies_to: AppliesTo,
    /// Lower values are evaluated (and listed) first.
    #[serde(default)]
    pub priority: i32,
}

fn default_active() -> bool {
    true
}

impl TaxConfiguration {
    /// Checks the rule's internal consistency.
    ///
    /// Progressive rules need at least one bracket; brackets must start
    /// at or above zero, be ascending and contiguous (each `min` equal to
    /// the previous `max`), and only the last one may be unbounded.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            PayrollError::InvalidConfiguration(format!("tax rule '{}': {reason}", self.name))
        };

        if self.name.trim().is_empty() {
            return Err(PayrollError::InvalidConfiguration(
                "tax rule name cannot be empty".into(),
            ));
        }
        if self.minimum_income.is_sign_negative() {
            return Err(invalid("minimum income cannot be negative".into()));
        }
        if let Some(max) = self.maximum_income {
            if max < self.minimum_income {
                return Err(invalid("maximum income is below minimum income".into()));
            }
        }

        match self.tax_type {
            TaxType::Flat | TaxType::Percentage => {
                let rate = self
                    .rate
                    .ok_or_else(|| invalid(format!("{:?} rule requires a rate", self.tax_type)))?;
                if rate.is_sign_negative() {
                    return Err(invalid("rate cannot be negative".into()));
                }
                if self.tax_type == TaxType::Percentage && rate > Decimal::ONE_HUNDRED {
                    return Err(invalid("percentage rate cannot exceed 100".into()));
                }
            }
            TaxType::Progressive => validate_brackets(&self.brackets).map_err(invalid)?,
        }
        Ok(())
    }
}

fn validate_brackets(brackets: &[TaxBracket]) -> std::result::Result<(), String> {
    let first = brackets
        .first()
        .ok_or_else(|| "progressive rule requires at least one bracket".to_string())?;
    if first.min.is_sign_negative() {
        return Err("first bracket cannot start below zero".into());
    }

    let last_index = brackets.len() - 1;
    let mut previous_max: Option<Decimal> = None;
    for (index, bracket) in brackets.iter().enumerate() {
        if bracket.rate.is_sign_negative() || bracket.rate > Decimal::ONE_HUNDRED {
            return Err(format!("bracket {index} rate must be between 0 and 100"));
        }
        if let Some(expected) = previous_max {
            if bracket.min != expected {
                return Err(format!(
                    "bracket {index} starts at {} but the previous bracket ends at {expected}",
                    bracket.min
                ));
            }
        }
        match bracket.max {
            Some(max) if max <= bracket.min => {
                return Err(format!("bracket {index} must end above where it starts"));
            }
            Some(max) => previous_max = Some(max),
            None if index != last_index => {
                return Err(format!("only the last bracket may be unbounded (bracket {index})"));
            }
            None => {}
        }
    }
    Ok(())
}

/// Evaluates a single rule against a gross income.
///
/// Inactive rules and incomes below the rule's minimum yield zero.  An
/// income above the rule's maximum is capped at the maximum before the
/// calculation, so the maximum acts as a ceiling on taxable income.
pub fn calculate_tax(rule: &TaxConfiguration, gross_income: Decimal) -> Decimal {
    if !rule.is_active || gross_income < rule.minimum_income {
        return Decimal::ZERO;
    }
    let income = match rule.maximum_income {
        Some(max) if gross_income > max => max,
        _ => gross_income,
    };

    match rule.tax_type {
        TaxType::Flat => rule.rate.map_or(Decimal::ZERO, round_money),
        TaxType::Percentage => rule
            .rate
            .map_or(Decimal::ZERO, |rate| round_money(percent_of(income, rate))),
        TaxType::Progressive => calculate_progressive(&rule.brackets, income),
    }
}

/// Walks the brackets in the order given.  A bracket whose `min` is at
/// or above the income is skipped without ending the walk; the walk
/// ends once all income has been assigned to a bracket.
pub fn calculate_progressive(brackets: &[TaxBracket], income: Decimal) -> Decimal {
    let mut remaining = income;
    let mut tax = Decimal::ZERO;

    for bracket in brackets {
        if remaining <= Decimal::ZERO {
            break;
        }
        if income <= bracket.min {
            continue;
        }
        let taxable = match bracket.max {
            Some(max) => remaining.min(max - bracket.min),
            None => remaining,
        };
        tax += percent_of(taxable, bracket.rate);
        remaining -= taxable;
    }

    round_money(tax)
}

/// Result of running the pipeline: one line per rule that produced a
/// positive amount, and their total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub lines: Vec<BreakdownLine>,
    pub total: Decimal,
}

/// The validated, priority-ordered catalogue of tax rules.
///
/// A schedule is immutable once built and safe to share between
/// threads; computing a breakdown has no side effects, so it can be used
/// for previews as often as needed.
#[derive(Debug, Clone, Default)]
pub struct TaxSchedule {
    rules: Vec<TaxConfiguration>,
}

impl TaxSchedule {
    /// Validates every rule and orders them by ascending priority.
    /// Rules with equal priority keep their given order.
    pub fn new(mut rules: Vec<TaxConfiguration>) -> Result<Self> {
        for rule in &rules {
            rule.validate()?;
        }
        rules.sort_by_key(|rule| rule.priority);
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[TaxConfiguration] {
        &self.rules
    }

    /// Runs every active rule that applies to `employment_type`.
    pub fn calculate_total_taxes(
        &self,
        gross_income: Decimal,
        employment_type: EmploymentType,
    ) -> TaxBreakdown {
        let lines: Vec<BreakdownLine> = self
            .rules
            .iter()
            .filter(|rule| rule.is_active && rule.applies_to.covers(employment_type))
            .filter_map(|rule| {
                let amount = calculate_tax(rule, gross_income);
                (amount > Decimal::ZERO).then(|| BreakdownLine {
                    name: rule.name.clone(),
                    kind: rule.tax_type.into(),
                    rate: rule.rate,
                    amount,
                })
            })
            .collect();
        let total = round_money(lines.iter().map(|line| line.amount).sum());

        tracing::debug!(
            gross = %gross_income,
            ?employment_type,
            rules_applied = lines.len(),
            total = %total,
            "Calculated taxes"
        );
        TaxBreakdown { lines, total }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    One(TaxConfiguration),
    Many(Vec<TaxConfiguration>),
}

/// Load all tax rules from a directory.
///
/// Every `.json` file in the directory holds either a single rule or an
/// array of rules.  Files are read in name order.  A file that fails to
/// parse or validate aborts the load; a missing directory yields an
/// empty rule set.
pub fn load_tax_configurations_from_dir(path: &Path) -> Result<Vec<TaxConfiguration>> {
    let mut rules = Vec::new();
    if !path.is_dir() {
        tracing::warn!(path = %path.display(), "Tax rule directory not found, no taxes configured");
        return Ok(rules);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let file_path = entry.path();
        if entry.file_type()?.is_file()
            && file_path.extension().is_some_and(|ext| ext == "json")
        {
            files.push(file_path);
        }
    }
    files.sort();

    for file in files {
        let data = std::fs::read_to_string(&file)?;
        let parsed = serde_json::from_str::<RuleFile>(&data).map_err(|err| {
            PayrollError::InvalidConfiguration(format!("{}: {err}", file.display()))
        })?;
        let loaded = match parsed {
            RuleFile::One(rule) => vec![rule],
            RuleFile::Many(many) => many,
        };
        for rule in &loaded {
            rule.validate().map_err(|err| {
                PayrollError::InvalidConfiguration(format!("{}: {err}", file.display()))
            })?;
        }
        tracing::debug!(path = %file.display(), count = loaded.len(), "Loaded tax rules");
        rules.extend(loaded);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn flat(name: &str, amount: Decimal) -> TaxConfiguration {
        TaxConfiguration {
            name: name.into(),
            tax_type: TaxType::Flat,
            rate: Some(amount),
            brackets: Vec::new(),
            minimum_income: Decimal::ZERO,
            maximum_income: None,
            is_active: true,
            applies_to: AppliesTo::All,
            priority: 0,
        }
    }

    fn percentage(name: &str, rate: Decimal) -> TaxConfiguration {
        TaxConfiguration {
            tax_type: TaxType::Percentage,
            rate: Some(rate),
            ..flat(name, Decimal::ZERO)
        }
    }

    fn progressive(brackets: Vec<TaxBracket>) -> TaxConfiguration {
        TaxConfiguration {
            tax_type: TaxType::Progressive,
            rate: None,
            brackets,
            ..flat("Income tax", Decimal::ZERO)
        }
    }

    fn bracket(min: Decimal, max: Option<Decimal>, rate: Decimal) -> TaxBracket {
        TaxBracket { min, max, rate }
    }

    fn two_brackets() -> Vec<TaxBracket> {
        vec![
            bracket(dec!(0), Some(dec!(1000)), dec!(10)),
            bracket(dec!(1000), None, dec!(20)),
        ]
    }

    #[test]
    fn flat_rule_ignores_income_magnitude() {
        let rule = flat("Levy", dec!(50));
        assert_eq!(calculate_tax(&rule, dec!(190)), dec!(50));
        assert_eq!(calculate_tax(&rule, dec!(100000)), dec!(50));
    }

    #[test]
    fn inactive_rule_and_low_income_yield_zero() {
        let mut rule = percentage("State", dec!(5));
        rule.minimum_income = dec!(200);
        assert_eq!(calculate_tax(&rule, dec!(199.99)), Decimal::ZERO);
        assert_eq!(calculate_tax(&rule, dec!(200)), dec!(10));

        rule.is_active = false;
        assert_eq!(calculate_tax(&rule, dec!(500)), Decimal::ZERO);
    }

    #[test]
    fn percentage_rounds_to_cents() {
        let rule = percentage("State", dec!(3.3));
        assert_eq!(calculate_tax(&rule, dec!(123.45)), dec!(4.07));
    }

    #[test]
    fn maximum_income_caps_taxable_amount() {
        let mut rule = percentage("Social security", dec!(10));
        rule.maximum_income = Some(dec!(1000));
        assert_eq!(calculate_tax(&rule, dec!(5000)), dec!(100));
        assert_eq!(calculate_tax(&rule, dec!(800)), dec!(80));
    }

    #[test]
    fn progressive_brackets_tax_each_slice() {
        let rule = progressive(two_brackets());
        assert_eq!(calculate_tax(&rule, dec!(1500)), dec!(200));
        assert_eq!(calculate_tax(&rule, dec!(1000)), dec!(100));
        assert_eq!(calculate_tax(&rule, dec!(250.55)), dec!(25.06));
        assert_eq!(calculate_tax(&rule, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn progressive_skips_brackets_above_income() {
        let brackets = vec![
            bracket(dec!(500), Some(dec!(1000)), dec!(50)),
            bracket(dec!(0), Some(dec!(500)), dec!(10)),
        ];
        // The first bracket is skipped, the second still applies.
        assert_eq!(calculate_progressive(&brackets, dec!(400)), dec!(40));
    }

    #[test]
    fn progressive_stays_within_top_rate_bound() {
        let rule = progressive(vec![
            bracket(dec!(0), Some(dec!(300)), dec!(0)),
            bracket(dec!(300), Some(dec!(900)), dec!(12)),
            bracket(dec!(900), None, dec!(33)),
        ]);
        let mut income = Decimal::ZERO;
        while income <= dec!(3000) {
            let tax = calculate_tax(&rule, income);
            assert!(tax >= Decimal::ZERO);
            assert!(tax <= round_money(income * dec!(0.33)), "income {income}");
            income += dec!(37.5);
        }
    }

    #[test]
    fn percentage_is_monotonic_in_income() {
        let rule = percentage("State", dec!(7.25));
        let mut previous = Decimal::ZERO;
        let mut income = Decimal::ZERO;
        while income <= dec!(2000) {
            let tax = calculate_tax(&rule, income);
            assert!(tax >= previous);
            previous = tax;
            income += dec!(13.37);
        }
    }

    #[test]
    fn validation_rejects_malformed_brackets() {
        assert!(progressive(Vec::new()).validate().is_err());

        let gap = progressive(vec![
            bracket(dec!(0), Some(dec!(1000)), dec!(10)),
            bracket(dec!(1200), None, dec!(20)),
        ]);
        assert!(gap.validate().is_err());

        let overlap = progressive(vec![
            bracket(dec!(0), Some(dec!(1000)), dec!(10)),
            bracket(dec!(900), None, dec!(20)),
        ]);
        assert!(overlap.validate().is_err());

        let unbounded_middle = progressive(vec![
            bracket(dec!(0), None, dec!(10)),
            bracket(dec!(1000), None, dec!(20)),
        ]);
        assert!(unbounded_middle.validate().is_err());

        let inverted = progressive(vec![bracket(dec!(100), Some(dec!(50)), dec!(10))]);
        assert!(inverted.validate().is_err());

        assert!(progressive(two_brackets()).validate().is_ok());
    }

    #[test]
    fn validation_requires_rate_for_flat_and_percentage() {
        let mut rule = flat("Levy", dec!(10));
        rule.rate = None;
        assert!(matches!(
            rule.validate(),
            Err(PayrollError::InvalidConfiguration(_))
        ));
        assert!(percentage("Too much", dec!(101)).validate().is_err());
    }

    #[test]
    fn schedule_orders_by_priority_and_filters_scope() {
        let mut state = percentage("State", dec!(5));
        state.priority = 20;
        let mut federal = progressive(two_brackets());
        federal.name = "Federal".into();
        federal.priority = 10;
        let mut contractor_fee = flat("Contractor fee", dec!(15));
        contractor_fee.applies_to = AppliesTo::Contractors;
        let mut union_dues = flat("Union dues", dec!(12));
        union_dues.applies_to = AppliesTo::Employees;
        union_dues.priority = 30;
        let mut retired = flat("Retired levy", dec!(99));
        retired.is_active = false;

        let schedule =
            TaxSchedule::new(vec![state, federal, contractor_fee, union_dues, retired]).unwrap();
        let breakdown = schedule.calculate_total_taxes(dec!(1500), EmploymentType::Employee);

        let names: Vec<&str> = breakdown.lines.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["Federal", "State", "Union dues"]);
        assert_eq!(breakdown.lines[0].kind, crate::models::LineKind::Progressive);
        assert_eq!(breakdown.lines[0].rate, None);
        assert_eq!(breakdown.lines[1].rate, Some(dec!(5)));
        assert_eq!(breakdown.total, dec!(287));

        let contractor = schedule.calculate_total_taxes(dec!(1500), EmploymentType::Contractor);
        let names: Vec<&str> = contractor.lines.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["Contractor fee", "Federal", "State"]);
    }

    #[test]
    fn schedule_total_equals_sum_of_lines() {
        let schedule = TaxSchedule::new(vec![
            percentage("A", dec!(3.333)),
            percentage("B", dec!(1.111)),
            percentage("C", dec!(7.777)),
        ])
        .unwrap();
        let breakdown = schedule.calculate_total_taxes(dec!(1234.56), EmploymentType::Employee);
        let sum: Decimal = breakdown.lines.iter().map(|l| l.amount).sum();
        assert_eq!(breakdown.total, sum);
    }

    #[test]
    fn zero_amount_rules_are_left_out() {
        let mut high_earners = percentage("High earners", dec!(10));
        high_earners.minimum_income = dec!(10000);
        let schedule = TaxSchedule::new(vec![high_earners]).unwrap();
        let breakdown = schedule.calculate_total_taxes(dec!(500), EmploymentType::Employee);
        assert!(breakdown.lines.is_empty());
        assert_eq!(breakdown.total, Decimal::ZERO);
    }

    #[test]
    fn schedule_rejects_invalid_rule() {
        let result = TaxSchedule::new(vec![progressive(Vec::new())]);
        assert!(matches!(result, Err(PayrollError::InvalidConfiguration(_))));
    }

    #[test]
    fn deserializes_rule_with_defaults() {
        let rule: TaxConfiguration = serde_json::from_value(json!({
            "name": "Federal",
            "tax_type": "progressive",
            "brackets": [
                {"min": "0", "max": "1000", "rate": "10"},
                {"min": "1000", "rate": "20"}
            ]
        }))
        .unwrap();
        assert!(rule.is_active);
        assert_eq!(rule.applies_to, AppliesTo::All);
        assert_eq!(rule.brackets[1].max, None);
        assert_eq!(calculate_tax(&rule, dec!(1500)), dec!(200));
    }

    #[test]
    fn loads_rules_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a_federal.json"),
            r#"{"name": "Federal", "tax_type": "percentage", "rate": "10", "priority": 1}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b_local.json"),
            r#"[{"name": "City", "tax_type": "flat", "rate": "5"},
                {"name": "County", "tax_type": "flat", "rate": "2", "applies_to": "employees"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let rules = load_tax_configurations_from_dir(dir.path()).unwrap();
        let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Federal", "City", "County"]);
    }

    #[test]
    fn loading_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("broken.json"),
            r#"{"name": "Broken", "tax_type": "progressive", "brackets": []}"#,
        )
        .unwrap();
        let result = load_tax_configurations_from_dir(dir.path());
        assert!(matches!(result, Err(PayrollError::InvalidConfiguration(_))));

        std::fs::write(dir.path().join("broken.json"), r#"{"name": "X", "tax_type": "lump"}"#)
            .unwrap();
        assert!(load_tax_configurations_from_dir(dir.path()).is_err());
    }

    #[test]
    fn missing_directory_yields_no_rules() {
        let rules = load_tax_configurations_from_dir(Path::new("/nonexistent/tax_rules")).unwrap();
        assert!(rules.is_empty());
    }
}
