//! Versioned calculation-rule catalog.
//!
//! The engine receives its catalog as an `Arc<dyn RuleCatalog>` at
//! construction. [`InMemoryCatalog`] implements the full rule lifecycle:
//! draft → validated → active → superseded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};

use super::schema::RuleSchema;
use super::validator::validate_schema;

/// Lifecycle state of a rule version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// Saved, not yet validated.
    #[default]
    Draft,
    /// Passed schema validation.
    Validated,
    /// The current version for its effective window.
    Active,
    /// Replaced by a newer version; still resolvable inside its window.
    Superseded,
}

/// One version of a calculation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRule {
    /// Rule code, referenced by concepts.
    pub code: String,
    /// Version number, unique per code.
    pub version: u32,
    /// The rule definition.
    pub schema: RuleSchema,
    /// First date the version applies to.
    pub effective_from: NaiveDate,
    /// Last date the version applies to, inclusive.
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
    /// Lifecycle state.
    #[serde(default)]
    pub status: RuleStatus,
}

impl CalculationRule {
    /// `code@version`, the key used in snapshots.
    pub fn key(&self) -> String {
        format!("{}@{}", self.code, self.version)
    }

    /// Returns true if `date` falls inside the effective window.
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.is_none_or(|to| date <= to)
    }

    fn is_resolvable(&self) -> bool {
        matches!(self.status, RuleStatus::Active | RuleStatus::Superseded)
    }
}

/// Read access to calculation rules, as the engine needs it.
pub trait RuleCatalog: Send + Sync {
    /// Finds the rule version in force for `code` on `date`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RuleNotFound`] if no active or superseded
    /// version covers the date.
    fn find(&self, code: &str, date: NaiveDate) -> EngineResult<CalculationRule>;

    /// Records that a finalized result used `code@version`. A referenced
    /// version can no longer be replaced or removed.
    fn mark_referenced(&self, code: &str, version: u32) -> EngineResult<()>;
}

#[derive(Debug, Default)]
struct CatalogState {
    rules: BTreeMap<String, Vec<CalculationRule>>,
    referenced: BTreeSet<(String, u32)>,
}

/// A catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, CatalogState>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, CatalogState>> {
        self.state.write().map_err(|_| poisoned())
    }

    /// Saves a rule version as a draft.
    ///
    /// Re-saving an unreferenced `code@version` replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] if the version is referenced by
    /// a finalized result.
    pub fn register(&self, mut rule: CalculationRule) -> EngineResult<()> {
        let mut state = self.write()?;
        if state.referenced.contains(&(rule.code.clone(), rule.version)) {
            return Err(EngineError::invalid_state(
                format!("rule {}", rule.key()),
                "version is referenced by a finalized result; create a new version",
            ));
        }
        rule.status = RuleStatus::Draft;
        let versions = state.rules.entry(rule.code.clone()).or_default();
        versions.retain(|existing| existing.version != rule.version);
        versions.push(rule);
        versions.sort_by_key(|r| r.version);
        Ok(())
    }

    /// Validates a draft version.
    ///
    /// # Errors
    ///
    /// Returns the validator's error, or [`EngineError::NotFound`].
    pub fn validate(&self, code: &str, version: u32) -> EngineResult<()> {
        let mut state = self.write()?;
        let rule = find_version(&mut state, code, version)?;
        validate_schema(&rule.code, &rule.schema)?;
        if rule.status == RuleStatus::Draft {
            rule.status = RuleStatus::Validated;
        }
        Ok(())
    }

    /// Activates a validated version.
    ///
    /// Every other active version of the code becomes superseded and its
    /// window is closed the day before the new version starts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] if the version is still a draft.
    pub fn activate(&self, code: &str, version: u32) -> EngineResult<()> {
        let mut state = self.write()?;
        let rule = find_version(&mut state, code, version)?;
        match rule.status {
            RuleStatus::Validated | RuleStatus::Active => {}
            RuleStatus::Draft => {
                return Err(EngineError::invalid_state(
                    format!("rule {}", rule.key()),
                    "a draft must be validated before activation",
                ));
            }
            RuleStatus::Superseded => {
                return Err(EngineError::invalid_state(
                    format!("rule {}", rule.key()),
                    "a superseded version cannot be reactivated",
                ));
            }
        }
        rule.status = RuleStatus::Active;
        let starts = rule.effective_from;

        if let Some(versions) = state.rules.get_mut(code) {
            for other in versions
                .iter_mut()
                .filter(|r| r.version != version && r.status == RuleStatus::Active)
            {
                other.status = RuleStatus::Superseded;
                let closing = starts.pred_opt().unwrap_or(starts);
                other.effective_to = Some(other.effective_to.map_or(closing, |to| to.min(closing)));
            }
        }
        info!(rule = code, version = version, effective_from = %starts, "Rule activated");
        Ok(())
    }

    /// Registers, validates and activates a version in one call.
    pub fn publish(&self, rule: CalculationRule) -> EngineResult<()> {
        let code = rule.code.clone();
        let version = rule.version;
        self.register(rule)?;
        self.validate(&code, version)?;
        self.activate(&code, version)
    }

    /// Deletes a version that no finalized result references.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] for a referenced version.
    pub fn remove(&self, code: &str, version: u32) -> EngineResult<()> {
        let mut state = self.write()?;
        if state.referenced.contains(&(code.to_string(), version)) {
            return Err(EngineError::invalid_state(
                format!("rule {}@{}", code, version),
                "version is referenced by a finalized result",
            ));
        }
        find_version(&mut state, code, version)?;
        if let Some(versions) = state.rules.get_mut(code) {
            versions.retain(|r| r.version != version);
        }
        Ok(())
    }

    /// Returns a specific version.
    pub fn get(&self, code: &str, version: u32) -> EngineResult<CalculationRule> {
        let state = self.read()?;
        state
            .rules
            .get(code)
            .and_then(|versions| versions.iter().find(|r| r.version == version))
            .cloned()
            .ok_or_else(|| EngineError::not_found("Rule", format!("{}@{}", code, version)))
    }

    /// Returns true if any version of `code` is registered.
    pub fn contains(&self, code: &str) -> bool {
        self.read()
            .map(|state| state.rules.get(code).is_some_and(|versions| !versions.is_empty()))
            .unwrap_or(false)
    }

    /// Returns true if `code@version` is referenced.
    pub fn is_referenced(&self, code: &str, version: u32) -> bool {
        self.read()
            .map(|state| state.referenced.contains(&(code.to_string(), version)))
            .unwrap_or(false)
    }

    /// Number of rule codes in the catalog.
    pub fn len(&self) -> usize {
        self.read().map(|state| state.rules.len()).unwrap_or(0)
    }

    /// Returns true if the catalog holds no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleCatalog for InMemoryCatalog {
    fn find(&self, code: &str, date: NaiveDate) -> EngineResult<CalculationRule> {
        let state = self.read()?;
        state
            .rules
            .get(code)
            .and_then(|versions| {
                versions
                    .iter()
                    .filter(|r| r.is_resolvable() && r.is_effective_on(date))
                    .max_by_key(|r| r.version)
            })
            .cloned()
            .ok_or_else(|| EngineError::RuleNotFound {
                code: code.to_string(),
                date,
            })
    }

    fn mark_referenced(&self, code: &str, version: u32) -> EngineResult<()> {
        let mut state = self.write()?;
        find_version(&mut state, code, version)?;
        state.referenced.insert((code.to_string(), version));
        Ok(())
    }
}

fn find_version<'s>(
    state: &'s mut CatalogState,
    code: &str,
    version: u32,
) -> EngineResult<&'s mut CalculationRule> {
    state
        .rules
        .get_mut(code)
        .and_then(|versions| versions.iter_mut().find(|r| r.version == version))
        .ok_or_else(|| EngineError::not_found("Rule", format!("{}@{}", code, version)))
}

fn poisoned() -> EngineError {
    EngineError::CalculationError {
        message: "rule catalog lock poisoned".to_string(),
    }
}
