//! Configuration types for the payroll engine.
//!
//! This module contains the strongly-typed configuration structures that
//! are deserialized from YAML configuration files.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::models::{ConceptCatalog, PayFrequency};
use crate::rules::{CalculationRule, InMemoryCatalog, RuleSchema, RuleStatus};

/// How amounts are rounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Half away from zero.
    #[default]
    HalfUp,
    /// Half to even (banker's rounding).
    HalfEven,
    /// Towards zero.
    Down,
}

/// Rounding applied to base pay and concept amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingConfig {
    /// Decimal places kept.
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    /// Rounding mode.
    #[serde(default)]
    pub strategy: RoundingMode,
}

fn default_decimals() -> u32 {
    2
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            decimals: default_decimals(),
            strategy: RoundingMode::default(),
        }
    }
}

impl RoundingConfig {
    /// Rounds an amount.
    ///
    /// # Example
    ///
    /// ```
    /// use payroll_engine::config::{RoundingConfig, RoundingMode};
    /// use rust_decimal::Decimal;
    ///
    /// let half_up = RoundingConfig { decimals: 2, strategy: RoundingMode::HalfUp };
    /// let half_even = RoundingConfig { decimals: 2, strategy: RoundingMode::HalfEven };
    ///
    /// assert_eq!(half_up.apply(Decimal::new(3_335, 3)), Decimal::new(334, 2));
    /// assert_eq!(half_even.apply(Decimal::new(3_345, 3)), Decimal::new(334, 2));
    /// ```
    pub fn apply(&self, amount: Decimal) -> Decimal {
        let strategy = match self.strategy {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::Down => RoundingStrategy::ToZero,
        };
        amount.round_dp_with_strategy(self.decimals, strategy)
    }
}

/// Days that make up a full period, per frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaysPerPeriod {
    /// Weekly periods.
    #[serde(default = "default_weekly")]
    pub weekly: u32,
    /// Biweekly periods.
    #[serde(default = "default_biweekly")]
    pub biweekly: u32,
    /// Semimonthly periods.
    #[serde(default = "default_semimonthly")]
    pub semimonthly: u32,
    /// Monthly periods.
    #[serde(default = "default_monthly")]
    pub monthly: u32,
}

fn default_weekly() -> u32 {
    7
}

fn default_biweekly() -> u32 {
    14
}

fn default_semimonthly() -> u32 {
    15
}

fn default_monthly() -> u32 {
    30
}

impl Default for DaysPerPeriod {
    fn default() -> Self {
        Self {
            weekly: default_weekly(),
            biweekly: default_biweekly(),
            semimonthly: default_semimonthly(),
            monthly: default_monthly(),
        }
    }
}

impl DaysPerPeriod {
    /// Days for a frequency.
    pub fn for_frequency(&self, frequency: PayFrequency) -> u32 {
        match frequency {
            PayFrequency::Weekly => self.weekly,
            PayFrequency::Biweekly => self.biweekly,
            PayFrequency::Semimonthly => self.semimonthly,
            PayFrequency::Monthly => self.monthly,
        }
    }
}

/// Batch queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Runs with more employees than this are split into one unit per employee.
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Units executed at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_threshold() -> usize {
    50
}

fn default_workers() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            workers: default_workers(),
        }
    }
}

/// Engine-wide settings from `engine.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Currency exchange rates are quoted against.
    pub base_currency: String,
    /// Days per period, per frequency.
    #[serde(default)]
    pub days_per_period: DaysPerPeriod,
    /// Rounding of amounts.
    #[serde(default)]
    pub rounding: RoundingConfig,
    /// Month the fiscal year starts in (1-12).
    #[serde(default = "default_fiscal_month")]
    pub fiscal_year_start_month: u32,
    /// Novelty code whose total reduces days worked.
    #[serde(default = "default_absence_code")]
    pub absence_code: String,
    /// Novelty codes exposed as `novelty.<code>` even when an employee
    /// reported none in the period. Their value is then zero.
    #[serde(default)]
    pub novelty_codes: Vec<String>,
    /// Batch queue sizing.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Named values exposed to formulas as `config.<key>`.
    #[serde(default)]
    pub values: BTreeMap<String, Decimal>,
}

fn default_fiscal_month() -> u32 {
    1
}

fn default_absence_code() -> String {
    "days_absent".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_currency: "USD".to_string(),
            days_per_period: DaysPerPeriod::default(),
            rounding: RoundingConfig::default(),
            fiscal_year_start_month: default_fiscal_month(),
            absence_code: default_absence_code(),
            novelty_codes: Vec::new(),
            batch: BatchConfig::default(),
            values: BTreeMap::new(),
        }
    }
}

impl EngineSettings {
    /// The fiscal year `date` belongs to, named by the calendar year it
    /// starts in.
    ///
    /// # Example
    ///
    /// ```
    /// use payroll_engine::config::EngineSettings;
    /// use chrono::NaiveDate;
    ///
    /// let settings = EngineSettings { fiscal_year_start_month: 7, ..EngineSettings::default() };
    /// assert_eq!(settings.fiscal_year(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()), 2024);
    /// assert_eq!(settings.fiscal_year(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()), 2025);
    /// ```
    pub fn fiscal_year(&self, date: NaiveDate) -> i32 {
        if date.month() >= self.fiscal_year_start_month.clamp(1, 12) {
            date.year()
        } else {
            date.year() - 1
        }
    }
}

/// One file under `rules/`: a rule version with its schema inline.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleFile {
    /// Rule code.
    pub code: String,
    /// Version number.
    #[serde(default = "default_version")]
    pub version: u32,
    /// First effective date.
    pub effective_from: NaiveDate,
    /// Last effective date, inclusive.
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
    /// The rule definition.
    #[serde(flatten)]
    pub schema: RuleSchema,
}

fn default_version() -> u32 {
    1
}

/// A rule file becomes a draft rule; publishing validates and activates it.
impl From<RuleFile> for CalculationRule {
    fn from(file: RuleFile) -> Self {
        Self {
            code: file.code,
            version: file.version,
            schema: file.schema,
            effective_from: file.effective_from,
            effective_to: file.effective_to,
            status: RuleStatus::Draft,
        }
    }
}

/// The complete engine configuration loaded from YAML files.
///
/// This struct aggregates all configuration loaded from the various
/// YAML files in a configuration directory.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    settings: EngineSettings,
    concepts: ConceptCatalog,
    catalog: Arc<InMemoryCatalog>,
}

impl EngineConfig {
    /// Creates a new EngineConfig from its component parts.
    pub fn new(settings: EngineSettings, concepts: ConceptCatalog, catalog: Arc<InMemoryCatalog>) -> Self {
        Self {
            settings,
            concepts,
            catalog,
        }
    }

    /// Returns the engine settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Returns the concept catalog.
    pub fn concepts(&self) -> &ConceptCatalog {
        &self.concepts
    }

    /// Returns the rule catalog.
    pub fn catalog(&self) -> Arc<InMemoryCatalog> {
        Arc::clone(&self.catalog)
    }
}
