use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outcome of resolving an amount against the rate table at posting time.
///
/// Both values are stored on the entry and never recomputed, so later
/// rate changes cannot rewrite history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrencyResolution {
    pub fcy_amount: f64,
    pub exchange_rate: f64,
}

/// Exchange rates, expressed as foreign units per functional unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    functional: String,
    rates: HashMap<String, f64>,
}

impl RateTable {
    pub fn new(functional: impl Into<String>) -> Self {
        Self {
            functional: functional.into(),
            rates: HashMap::new(),
        }
    }

    pub fn functional_code(&self) -> &str {
        &self.functional
    }

    pub fn set_rate(&mut self, code: impl Into<String>, units_per_functional: f64) -> &mut Self {
        self.rates.insert(code.into(), units_per_functional);
        self
    }

    /// Resolve a functional-currency amount into its display currency.
    ///
    /// The functional currency resolves to rate 1. A missing code also
    /// resolves to rate 1 with a warning instead of failing the post.
    pub fn resolve(&self, amount_functional: f64, currency_code: &str) -> CurrencyResolution {
        let exchange_rate = if currency_code == self.functional {
            1.0
        } else {
            match self.rates.get(currency_code) {
                Some(rate) => *rate,
                None => {
                    warn!(currency = currency_code, "no exchange rate on file, falling back to 1");
                    1.0
                }
            }
        };

        CurrencyResolution {
            fcy_amount: amount_functional * exchange_rate,
            exchange_rate,
        }
    }
}
