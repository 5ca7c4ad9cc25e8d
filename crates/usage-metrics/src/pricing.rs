use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Price per 1000 tokens for one source
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    #[serde(default)]
    pub prompt_per_1k: f64,
    #[serde(default)]
    pub complete_per_1k: f64,
}

/// Source name -> token price; unknown sources cost nothing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    prices: HashMap<String, TokenPrice>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, source: impl Into<String>, price: TokenPrice) -> Self {
        self.prices.insert(source.into(), price);
        self
    }

    pub fn set_price(&mut self, source: impl Into<String>, price: TokenPrice) {
        self.prices.insert(source.into(), price);
    }

    pub fn price_for(&self, source: &str) -> TokenPrice {
        self.prices.get(source).copied().unwrap_or_default()
    }

    /// Cost per second for the given token rates
    pub fn cost_per_second(
        &self,
        source: &str,
        prompt_per_second: f64,
        complete_per_second: f64,
    ) -> f64 {
        let price = self.price_for(source);
        (prompt_per_second / 1000.0) * price.prompt_per_1k
            + (complete_per_second / 1000.0) * price.complete_per_1k
    }
}
