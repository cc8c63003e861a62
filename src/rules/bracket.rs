//! Progressive bracket tables.
//!
//! A bracket table splits an amount range into contiguous segments, each
//! with its own marginal rate and fixed base. Tables are validated once when
//! a rule is saved into the catalog; lookups assume a valid table.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// One range of a bracket table.
///
/// # Example
///
/// ```
/// use payroll_engine::rules::Bracket;
/// use rust_decimal::Decimal;
///
/// let bracket = Bracket {
///     lower: Decimal::new(5_000, 0),
///     upper: None,
///     rate: Decimal::new(15, 2),
///     fixed: Decimal::ZERO,
/// };
/// assert!(bracket.is_unbounded());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    /// Inclusive lower bound.
    pub lower: Decimal,
    /// Exclusive upper bound; `None` means unbounded.
    #[serde(default)]
    pub upper: Option<Decimal>,
    /// Marginal rate applied to the amount above `lower`.
    pub rate: Decimal,
    /// Fixed amount owed at `lower`.
    #[serde(default, alias = "base")]
    pub fixed: Decimal,
}

impl Bracket {
    /// Returns true if this bracket has no upper bound.
    pub fn is_unbounded(&self) -> bool {
        self.upper.is_none()
    }
}

/// An ordered list of brackets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketTable {
    /// Brackets in ascending order.
    pub brackets: Vec<Bracket>,
}

/// The outcome of [`BracketTable::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BracketResolution {
    /// Position of the selected bracket in the table.
    pub index: usize,
    /// The selected bracket.
    pub bracket: Bracket,
    /// `fixed + (amount - lower) * rate`, floored at zero.
    pub computed: Decimal,
}

impl BracketTable {
    /// Creates a table from brackets without validating it.
    pub fn new(brackets: Vec<Bracket>) -> Self {
        Self { brackets }
    }

    /// Checks the structural invariants of the table.
    ///
    /// The brackets must be non-empty, ascending and contiguous (each upper
    /// bound equals the next lower bound), with exactly one unbounded bracket
    /// in last position. Bounds, rates and fixed bases must be non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedBracketTable`] naming `table_name`.
    pub fn validate(&self, table_name: &str) -> EngineResult<()> {
        let malformed = |message: String| EngineError::MalformedBracketTable {
            table: table_name.to_string(),
            message,
        };

        let Some(last) = self.brackets.last() else {
            return Err(malformed("table has no brackets".to_string()));
        };
        if !last.is_unbounded() {
            return Err(malformed("last bracket must be unbounded".to_string()));
        }
        let unbounded = self.brackets.iter().filter(|b| b.is_unbounded()).count();
        if unbounded != 1 {
            return Err(malformed(format!(
                "exactly one unbounded bracket is allowed, found {}",
                unbounded
            )));
        }
        if self.brackets[0].lower.is_sign_negative() {
            return Err(malformed("first lower bound must not be negative".to_string()));
        }

        for (index, bracket) in self.brackets.iter().enumerate() {
            if bracket.rate.is_sign_negative() || bracket.fixed.is_sign_negative() {
                return Err(malformed(format!(
                    "bracket {} has a negative rate or fixed base",
                    index
                )));
            }
            if let Some(upper) = bracket.upper {
                if upper <= bracket.lower {
                    return Err(malformed(format!(
                        "bracket {} upper bound {} is not above lower bound {}",
                        index, upper, bracket.lower
                    )));
                }
                let next = &self.brackets[index + 1];
                if next.lower != upper {
                    return Err(malformed(format!(
                        "bracket {} ends at {} but bracket {} starts at {}",
                        index,
                        upper,
                        index + 1,
                        next.lower
                    )));
                }
            }
        }
        Ok(())
    }

    /// Finds the bracket for `amount` and computes its value.
    ///
    /// Brackets are scanned in ascending order and the first whose upper
    /// bound is unbounded or at least `amount` is selected. The result is
    /// `fixed + (amount - lower) * rate`, floored at zero. Returns `None`
    /// only for an empty table, which validation never admits.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CalculationError`] if the computation
    /// overflows.
    ///
    /// # Example
    ///
    /// ```
    /// use payroll_engine::rules::{Bracket, BracketTable};
    /// use rust_decimal::Decimal;
    /// use std::str::FromStr;
    ///
    /// let table = BracketTable::new(vec![
    ///     Bracket { lower: Decimal::ZERO, upper: Some(Decimal::new(5_000, 0)), rate: Decimal::ZERO, fixed: Decimal::ZERO },
    ///     Bracket { lower: Decimal::new(5_000, 0), upper: None, rate: Decimal::new(15, 2), fixed: Decimal::ZERO },
    /// ]);
    ///
    /// let resolution = table.resolve(Decimal::new(10_230, 0)).unwrap().unwrap();
    /// assert_eq!(resolution.index, 1);
    /// assert_eq!(resolution.computed, Decimal::from_str("784.5").unwrap());
    /// ```
    pub fn resolve(&self, amount: Decimal) -> EngineResult<Option<BracketResolution>> {
        let Some(index) = self
            .brackets
            .iter()
            .position(|b| b.upper.is_none_or(|upper| upper >= amount))
            .or_else(|| self.brackets.len().checked_sub(1))
        else {
            return Ok(None);
        };
        let bracket = &self.brackets[index];
        let computed = amount
            .checked_sub(bracket.lower)
            .and_then(|excess| excess.checked_mul(bracket.rate))
            .and_then(|marginal| marginal.checked_add(bracket.fixed))
            .ok_or_else(|| EngineError::CalculationError {
                message: format!("arithmetic overflow in bracket {} for {}", index, amount),
            })?;
        Ok(Some(BracketResolution {
            index,
            bracket: bracket.clone(),
            computed: computed.max(Decimal::ZERO),
        }))
    }
}
