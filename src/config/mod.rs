//! Configuration loading and management for the payroll engine.
//!
//! This module provides functionality to load engine configurations from YAML files,
//! including engine settings, the concept catalog, and versioned calculation rules.
//!
//! # Example
//!
//! ```no_run
//! use payroll_engine::config::ConfigLoader;
//!
//! let config = ConfigLoader::load("./config/default").unwrap();
//! println!("Rounding to {} decimals", config.settings().rounding.decimals);
//! ```

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{
    BatchConfig, DaysPerPeriod, EngineConfig, EngineSettings, RoundingConfig, RoundingMode,
    RuleFile,
};
