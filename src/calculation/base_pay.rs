//! Base pay calculation.
//!
//! This module turns an employee's salary into base pay for one period:
//! salary converted into the planilla currency, prorated over the days
//! worked, rounded per the engine settings.

use rust_decimal::Decimal;

use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::models::{AuditStep, Employee, PayFrequency, PayPeriod, SalaryBasis};

/// The result of a base pay calculation, including the audit step.
#[derive(Debug, Clone)]
pub struct BasePayResult {
    /// Salary per period in the planilla currency.
    pub salary: Decimal,
    /// Base pay for the days worked, rounded.
    pub base_pay: Decimal,
    /// Days worked after absences.
    pub days_worked: Decimal,
    /// Days in a full period for the planilla's frequency.
    pub days_per_period: Decimal,
    /// Planilla-currency units per unit of the salary currency.
    pub exchange_rate: Decimal,
    /// The audit step recording this calculation.
    pub audit_step: AuditStep,
}

/// Calculates base pay for an employee and period.
///
/// Days worked are the configured days per period when the employee was
/// employed the whole period, otherwise the employed days capped at the
/// days per period. Absences are subtracted, never below zero.
///
/// - [`SalaryBasis::Prorated`]: `salary × days_worked ÷ days_per_period`
/// - [`SalaryBasis::Flat`]: the full salary
///
/// # Arguments
///
/// * `employee` - The employee
/// * `period` - The pay period
/// * `frequency` - The planilla's pay frequency
/// * `settings` - Days per period and rounding
/// * `absences` - Days absent in the period
/// * `exchange_rate` - Planilla-currency units per salary-currency unit
/// * `step_number` - The audit step number to assign
///
/// # Errors
///
/// Returns [`EngineError::InvalidEmployee`] if the employee was not employed
/// on any day of the period, or [`EngineError::StructuralConfig`] if the
/// frequency has zero days per period.
///
/// # Examples
///
/// ```
/// use payroll_engine::calculation::calculate_base_pay;
/// use payroll_engine::config::EngineSettings;
/// use payroll_engine::models::{Employee, PayFrequency, PayPeriod, SalaryBasis};
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
///
/// let employee = Employee {
///     id: "emp_001".to_string(),
///     name: "Ana".to_string(),
///     active: true,
///     hire_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
///     termination_date: None,
///     birth_date: None,
///     salary: Decimal::new(10_000, 0),
///     salary_basis: SalaryBasis::Prorated,
///     currency: "USD".to_string(),
///     attributes: Default::default(),
/// };
/// let period = PayPeriod::new(
///     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
///     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
/// );
///
/// let result = calculate_base_pay(
///     &employee,
///     &period,
///     PayFrequency::Monthly,
///     &EngineSettings::default(),
///     Decimal::new(3, 0),
///     Decimal::ONE,
///     1,
/// ).unwrap();
///
/// assert_eq!(result.days_worked, Decimal::new(27, 0));
/// assert_eq!(result.base_pay, Decimal::new(9_000, 0));
/// ```
pub fn calculate_base_pay(
    employee: &Employee,
    period: &PayPeriod,
    frequency: PayFrequency,
    settings: &EngineSettings,
    absences: Decimal,
    exchange_rate: Decimal,
    step_number: u32,
) -> EngineResult<BasePayResult> {
    let days_per_period = Decimal::from(settings.days_per_period.for_frequency(frequency));
    if days_per_period.is_zero() {
        return Err(EngineError::structural(
            "days_per_period",
            format!("{:?} frequency has zero days per period", frequency),
        ));
    }

    let employed_days = employee.employed_days(period);
    if employed_days == 0 {
        return Err(EngineError::InvalidEmployee {
            employee_id: employee.id.clone(),
            message: format!(
                "not employed between {} and {}",
                period.start_date, period.end_date
            ),
        });
    }

    let days_employed = if employed_days >= period.days() {
        days_per_period
    } else {
        Decimal::from(employed_days).min(days_per_period)
    };
    let days_worked = (days_employed - absences).max(Decimal::ZERO);

    let salary = employee
        .salary
        .checked_mul(exchange_rate)
        .ok_or_else(|| overflow("salary conversion"))?;

    let unrounded = match employee.salary_basis {
        SalaryBasis::Prorated => salary
            .checked_mul(days_worked)
            .and_then(|amount| amount.checked_div(days_per_period))
            .ok_or_else(|| overflow("salary proration"))?,
        SalaryBasis::Flat => salary,
    };
    let base_pay = settings.rounding.apply(unrounded);

    let audit_step = AuditStep {
        step_number,
        rule_id: "base_pay".to_string(),
        rule_name: "Base Pay".to_string(),
        input: serde_json::json!({
            "salary": employee.salary.to_string(),
            "currency": employee.currency,
            "exchange_rate": exchange_rate.to_string(),
            "salary_basis": employee.salary_basis,
            "employed_days": employed_days,
            "absences": absences.to_string(),
            "days_per_period": days_per_period.to_string()
        }),
        output: serde_json::json!({
            "days_worked": days_worked.to_string(),
            "base_pay": base_pay.to_string()
        }),
        reasoning: match employee.salary_basis {
            SalaryBasis::Prorated => format!(
                "{} × {} days ÷ {} days per period = {}",
                salary, days_worked, days_per_period, base_pay
            ),
            SalaryBasis::Flat => format!("Flat salary of {} per period", base_pay),
        },
    };

    Ok(BasePayResult {
        salary,
        base_pay,
        days_worked,
        days_per_period,
        exchange_rate,
        audit_step,
    })
}

fn overflow(operation: &str) -> EngineError {
    EngineError::CalculationError {
        message: format!("arithmetic overflow in {}", operation),
    }
}
