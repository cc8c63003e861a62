//! Snapshot capture during a calculation.
//!
//! [`SnapshotRecorder`] is the only way a calculation reads settings,
//! exchange rates, concept definitions and rule versions. Every value it
//! hands out is copied into the bundle it is building. When replaying a
//! stored bundle, captured values win over live data; anything the bundle
//! does not hold is read live and captured.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::EngineSettings;
use crate::error::EngineResult;
use crate::models::{ConceptDefinition, SnapshotBundle};
use crate::repository::PayrollRepository;
use crate::rules::{CalculationRule, RuleCatalog};

const CONFIG_PREFIX: &str = "config.";

/// Builds the snapshot of one employee's calculation.
#[derive(Debug)]
pub struct SnapshotRecorder<'a> {
    captured: SnapshotBundle,
    replay: Option<&'a SnapshotBundle>,
}

impl<'a> SnapshotRecorder<'a> {
    /// Starts a recorder. With a `replay` bundle, its settings replace
    /// `live_settings`.
    pub fn new(
        calculation_date: NaiveDate,
        live_settings: &EngineSettings,
        replay: Option<&'a SnapshotBundle>,
    ) -> Self {
        let settings = replay.map_or_else(|| live_settings.clone(), |bundle| bundle.settings.clone());
        Self {
            captured: SnapshotBundle::new(calculation_date, settings),
            replay,
        }
    }

    /// Returns true when replaying a stored bundle.
    pub fn is_replaying(&self) -> bool {
        self.replay.is_some()
    }

    /// The settings in force.
    pub fn settings(&self) -> &EngineSettings {
        &self.captured.settings
    }

    /// The date the calculation is made as of.
    pub fn calculation_date(&self) -> NaiveDate {
        self.captured.calculation_date
    }

    /// Units of base currency per unit of `currency`. The base currency is
    /// always 1 and is not captured.
    pub fn exchange_rate(
        &mut self,
        currency: &str,
        repository: &dyn PayrollRepository,
    ) -> EngineResult<Decimal> {
        if currency == self.captured.settings.base_currency {
            return Ok(Decimal::ONE);
        }
        if let Some(rate) = self.captured.exchange_rates.get(currency) {
            return Ok(*rate);
        }
        let rate = match self.replay.and_then(|b| b.exchange_rates.get(currency)) {
            Some(rate) => *rate,
            None => repository.get_exchange_rate(currency, self.calculation_date())?,
        };
        self.captured
            .exchange_rates
            .insert(currency.to_string(), rate);
        Ok(rate)
    }

    /// The rule version for `code`: the replayed one if captured, otherwise
    /// the one the catalog has in force on the calculation date.
    pub fn rule(&mut self, code: &str, catalog: &dyn RuleCatalog) -> EngineResult<CalculationRule> {
        let rule = match self.replay.and_then(|b| b.formula_for(code)) {
            Some(rule) => {
                debug!(rule = %rule.key(), "Replaying captured rule");
                rule.clone()
            }
            None => catalog.find(code, self.calculation_date())?,
        };
        self.captured
            .formulas
            .entry(rule.key())
            .or_insert_with(|| rule.clone());
        Ok(rule)
    }

    /// The definition to apply for a concept: the replayed one if captured,
    /// otherwise `live`.
    pub fn concept(&mut self, live: &ConceptDefinition) -> ConceptDefinition {
        let definition = self
            .replay
            .and_then(|b| b.concepts.get(&live.code))
            .unwrap_or(live)
            .clone();
        self.captured
            .concepts
            .entry(definition.code.clone())
            .or_insert_with(|| definition.clone());
        definition
    }

    /// Configured values: the settings' values overlaid with replayed ones.
    pub fn config_values(&self) -> BTreeMap<String, Decimal> {
        let mut values = self.captured.settings.values.clone();
        if let Some(bundle) = self.replay {
            values.extend(bundle.config_values.iter().map(|(k, v)| (k.clone(), *v)));
        }
        values
    }

    /// Captures the `config.<key>` values among canonical keys a rule read.
    pub fn record_consulted(&mut self, keys: &BTreeSet<String>) {
        let values = self.config_values();
        for key in keys {
            if let Some(name) = key.strip_prefix(CONFIG_PREFIX) {
                if let Some(value) = values.get(name) {
                    self.captured
                        .config_values
                        .entry(name.to_string())
                        .or_insert(*value);
                }
            }
        }
    }

    /// The captured bundle.
    pub fn finish(self) -> SnapshotBundle {
        self.captured
    }
}
