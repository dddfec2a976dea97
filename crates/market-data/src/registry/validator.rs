//! Provider payload validation.
//!
//! Checks an adapter's answer before the orchestrator accepts it:
//! - the payload kind must match the requested operation
//! - bar invariants (high >= low, open/close within [low, high])
//! - non-negative prices and volumes
//! - validation confidences within [0, 1]
//!
//! Hard issues reject the payload, which then counts as a provider failure
//! and drives failover. Soft issues are logged and the payload is accepted.

use log::warn;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{Bar, MarketData, Operation, Quote, SymbolValidation};

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Hard failure - reject payload, try next provider.
    Hard,
    /// Soft warning - accept payload but log warning.
    Soft,
}

/// A single problem found in a payload.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
}

impl ValidationIssue {
    fn hard(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Hard,
            message,
        }
    }

    fn soft(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Soft,
            message,
        }
    }
}

/// Validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Whether to reject negative prices.
    pub reject_negative_prices: bool,
    /// Whether to reject bars violating OHLC ordering.
    pub reject_invalid_ohlc: bool,
    /// Prices above this are logged as suspicious.
    pub max_price: Option<Decimal>,
    /// Whether to warn on zero volume.
    pub warn_on_zero_volume: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            reject_negative_prices: true,
            reject_invalid_ohlc: true,
            max_price: Some(Decimal::from(1_000_000_000i64)),
            warn_on_zero_volume: true,
        }
    }
}

/// Validates provider payloads for shape and data quality.
#[derive(Clone, Debug, Default)]
pub struct PayloadValidator {
    config: ValidatorConfig,
}

impl PayloadValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a payload returned by `provider` for `operation`.
    ///
    /// Returns `ProviderInvalidResponse` with every hard issue joined when the
    /// payload must be rejected.
    pub fn validate(
        &self,
        provider: &str,
        operation: Operation,
        data: &MarketData,
    ) -> Result<(), MarketDataError> {
        if data.operation() != operation {
            return Err(MarketDataError::ProviderInvalidResponse {
                provider: provider.to_string(),
                message: format!(
                    "expected {} payload, got {}",
                    operation,
                    data.operation()
                ),
            });
        }

        let mut issues = Vec::new();
        match data {
            MarketData::Bars(bars) => {
                for bar in bars {
                    self.validate_bar(bar, &mut issues);
                }
            }
            MarketData::Quotes(quotes) => {
                for quote in quotes {
                    self.validate_quote(quote, &mut issues);
                }
            }
            MarketData::Validations(validations) => {
                for validation in validations {
                    validate_confidence(validation, &mut issues);
                }
            }
            MarketData::SearchResults(_) | MarketData::Fundamentals(_) => {}
        }

        let hard: Vec<&str> = issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Hard)
            .map(|i| i.message.as_str())
            .collect();

        if !hard.is_empty() {
            return Err(MarketDataError::ProviderInvalidResponse {
                provider: provider.to_string(),
                message: hard.join("; "),
            });
        }

        for issue in issues.iter().filter(|i| i.severity == ValidationSeverity::Soft) {
            warn!("Payload warning from {}: {}", provider, issue.message);
        }

        Ok(())
    }

    fn validate_bar(&self, bar: &Bar, issues: &mut Vec<ValidationIssue>) {
        if self.config.reject_negative_prices {
            for (label, value) in [
                ("open", bar.open),
                ("high", bar.high),
                ("low", bar.low),
                ("close", bar.close),
            ] {
                if value < Decimal::ZERO {
                    issues.push(ValidationIssue::hard(format!(
                        "{} {}: negative {} price {}",
                        bar.symbol, bar.timestamp, label, value
                    )));
                }
            }
        }

        if self.config.reject_invalid_ohlc {
            if bar.high < bar.low {
                issues.push(ValidationIssue::hard(format!(
                    "{} {}: high ({}) is less than low ({})",
                    bar.symbol, bar.timestamp, bar.high, bar.low
                )));
            } else {
                for (label, value) in [("open", bar.open), ("close", bar.close)] {
                    if value < bar.low || value > bar.high {
                        issues.push(ValidationIssue::hard(format!(
                            "{} {}: {} ({}) is outside low/high range ({}-{})",
                            bar.symbol, bar.timestamp, label, value, bar.low, bar.high
                        )));
                    }
                }
            }
        }

        if let Some(max) = self.config.max_price {
            if bar.high > max {
                issues.push(ValidationIssue::soft(format!(
                    "{}: high ({}) exceeds max threshold ({})",
                    bar.symbol, bar.high, max
                )));
            }
        }

        self.validate_volume(&bar.symbol, bar.volume, issues);
    }

    fn validate_quote(&self, quote: &Quote, issues: &mut Vec<ValidationIssue>) {
        if self.config.reject_negative_prices {
            if quote.price < Decimal::ZERO {
                issues.push(ValidationIssue::hard(format!(
                    "{}: negative price {}",
                    quote.symbol, quote.price
                )));
            }
            for (label, value) in [("bid", quote.bid), ("ask", quote.ask)] {
                if let Some(value) = value.filter(|v| *v < Decimal::ZERO) {
                    issues.push(ValidationIssue::hard(format!(
                        "{}: negative {} {}",
                        quote.symbol, label, value
                    )));
                }
            }
        }

        if let (Some(bid), Some(ask)) = (quote.bid, quote.ask) {
            if bid > ask {
                issues.push(ValidationIssue::soft(format!(
                    "{}: crossed market, bid {} above ask {}",
                    quote.symbol, bid, ask
                )));
            }
        }

        if let Some(max) = self.config.max_price {
            if quote.price > max {
                issues.push(ValidationIssue::soft(format!(
                    "{}: price ({}) exceeds max threshold ({})",
                    quote.symbol, quote.price, max
                )));
            }
        }

        self.validate_volume(&quote.symbol, quote.volume, issues);
    }

    fn validate_volume(
        &self,
        symbol: &str,
        volume: Option<Decimal>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if let Some(volume) = volume {
            if volume < Decimal::ZERO {
                issues.push(ValidationIssue::hard(format!(
                    "{}: negative volume {}",
                    symbol, volume
                )));
            } else if self.config.warn_on_zero_volume && volume == Decimal::ZERO {
                issues.push(ValidationIssue::soft(format!("{}: zero volume", symbol)));
            }
        }
    }
}

fn validate_confidence(validation: &SymbolValidation, issues: &mut Vec<ValidationIssue>) {
    if !(0.0..=1.0).contains(&validation.confidence) {
        issues.push(ValidationIssue::hard(format!(
            "{}: confidence {} is outside [0, 1]",
            validation.symbol, validation.confidence
        )));
    }
}
