use serde::{Deserialize, Serialize};

/// Provider verdict on whether a symbol exists and what it refers to.
///
/// Field-level so that answers from several providers can be merged
/// field by field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolValidation {
    pub symbol: String,
    pub is_valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Confidence in the verdict, 0.0..=1.0
    pub confidence: f64,
}

impl SymbolValidation {
    pub fn valid(symbol: impl Into<String>, confidence: f64) -> Self {
        Self {
            symbol: symbol.into(),
            is_valid: true,
            name: None,
            exchange: None,
            asset_type: None,
            currency: None,
            confidence,
        }
    }

    pub fn invalid(symbol: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            ..Self::valid(symbol, 1.0)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_asset_type(mut self, asset_type: impl Into<String>) -> Self {
        self.asset_type = Some(asset_type.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
}
