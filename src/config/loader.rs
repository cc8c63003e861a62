//! Configuration loading functionality.
//!
//! This module provides the [`ConfigLoader`] type for loading engine
//! configurations from YAML files.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::models::{ConceptCatalog, ConceptKind};
use crate::rules::{CalculationRule, InMemoryCatalog};

use super::types::{EngineConfig, EngineSettings, RuleFile};

/// Loads and provides access to engine configuration.
///
/// The `ConfigLoader` reads YAML configuration files from a directory,
/// validates every calculation rule, and publishes them into an
/// [`InMemoryCatalog`].
///
/// # Directory Structure
///
/// The configuration directory should have the following structure:
/// ```text
/// config/default/
/// ├── engine.yaml     # Settings: currency, days per period, rounding, values
/// ├── concepts.yaml   # Perceptions, deductions and benefits
/// └── rules/
///     └── income_tax.yaml  # One calculation rule version per file
/// ```
///
/// # Example
///
/// ```no_run
/// use payroll_engine::config::ConfigLoader;
///
/// let loader = ConfigLoader::load("./config/default").unwrap();
/// println!("Base currency: {}", loader.settings().base_currency);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: EngineConfig,
}

impl ConfigLoader {
    /// Loads configuration from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration directory (e.g., "./config/default")
    ///
    /// # Returns
    ///
    /// Returns a `ConfigLoader` instance on success, or an error if:
    /// - `engine.yaml` or `concepts.yaml` is missing
    /// - Any file contains invalid YAML
    /// - Any rule fails validation
    /// - A rule-driven concept references a rule that was not loaded
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();

        let settings = Self::load_yaml::<EngineSettings>(&path.join("engine.yaml"))?;
        let concepts = Self::load_yaml::<ConceptCatalog>(&path.join("concepts.yaml"))?;

        let catalog = InMemoryCatalog::new();
        let rules_dir = path.join("rules");
        let rules = Self::load_rules(&rules_dir)?;
        let rule_count = rules.len();
        for rule in rules {
            catalog.publish(rule)?;
        }

        for kind in [ConceptKind::Perception, ConceptKind::Deduction, ConceptKind::Benefit] {
            for concept in concepts.of_kind(kind) {
                if let Some(code) = concept.rule_code() {
                    if !catalog.contains(code) {
                        return Err(EngineError::InvalidSchema {
                            rule: code.to_string(),
                            message: format!(
                                "concept '{}' references a rule that is not configured",
                                concept.code
                            ),
                        });
                    }
                }
            }
        }

        info!(
            path = %path.display(),
            rules = rule_count,
            concepts = concepts.by_code().len(),
            "Configuration loaded"
        );

        Ok(Self {
            config: EngineConfig::new(settings, concepts, Arc::new(catalog)),
        })
    }

    /// Loads and parses a YAML file.
    fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> EngineResult<T> {
        let path_str = path.display().to_string();

        let content = fs::read_to_string(path).map_err(|_| EngineError::ConfigNotFound {
            path: path_str.clone(),
        })?;

        serde_yaml::from_str(&content).map_err(|e| EngineError::ConfigParseError {
            path: path_str,
            message: e.to_string(),
        })
    }

    /// Loads every rule file from the rules directory, sorted by code and
    /// version so activation order is deterministic. A missing directory
    /// means no rules.
    fn load_rules(rules_dir: &Path) -> EngineResult<Vec<CalculationRule>> {
        if !rules_dir.exists() {
            return Ok(Vec::new());
        }

        let rules_dir_str = rules_dir.display().to_string();
        let entries = fs::read_dir(rules_dir).map_err(|_| EngineError::ConfigNotFound {
            path: rules_dir_str.clone(),
        })?;

        let mut rules: Vec<CalculationRule> = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|_| EngineError::ConfigNotFound {
                path: rules_dir_str.clone(),
            })?;

            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
            {
                rules.push(Self::load_yaml::<RuleFile>(&path)?.into());
            }
        }

        rules.sort_by(|a, b| (&a.code, a.version).cmp(&(&b.code, b.version)));
        Ok(rules)
    }

    /// Returns the underlying engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the engine settings.
    pub fn settings(&self) -> &EngineSettings {
        self.config.settings()
    }

    /// Returns the concept catalog.
    pub fn concepts(&self) -> &ConceptCatalog {
        self.config.concepts()
    }

    /// Returns the rule catalog.
    pub fn catalog(&self) -> Arc<InMemoryCatalog> {
        self.config.catalog()
    }
}
