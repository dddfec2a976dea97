//! Declared provider capabilities.
//!
//! The orchestrator only considers providers that declare support for the
//! requested operation; the rest are recorded as skipped.

use serde::{Deserialize, Serialize};

use crate::models::Operation;

/// Which logical operations a provider serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCapabilities {
    /// Whether the provider serves historical bars.
    pub supports_historical: bool,

    /// Whether the provider serves real-time quotes.
    pub supports_realtime: bool,

    /// Whether the provider can validate symbols.
    pub supports_validation: bool,

    /// Whether the provider supports symbol search.
    pub supports_search: bool,

    /// Whether the provider serves company fundamentals.
    pub supports_fundamentals: bool,
}

impl ProviderCapabilities {
    pub const fn all() -> Self {
        Self {
            supports_historical: true,
            supports_realtime: true,
            supports_validation: true,
            supports_search: true,
            supports_fundamentals: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            supports_historical: false,
            supports_realtime: false,
            supports_validation: false,
            supports_search: false,
            supports_fundamentals: false,
        }
    }

    /// Capabilities covering exactly the given operations.
    pub fn only(operations: &[Operation]) -> Self {
        operations.iter().fold(Self::none(), |caps, op| caps.with(*op))
    }

    pub fn with(mut self, operation: Operation) -> Self {
        match operation {
            Operation::Historical => self.supports_historical = true,
            Operation::Realtime => self.supports_realtime = true,
            Operation::ValidateSymbols => self.supports_validation = true,
            Operation::Search => self.supports_search = true,
            Operation::Fundamentals => self.supports_fundamentals = true,
        }
        self
    }

    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Historical => self.supports_historical,
            Operation::Realtime => self.supports_realtime,
            Operation::ValidateSymbols => self.supports_validation,
            Operation::Search => self.supports_search,
            Operation::Fundamentals => self.supports_fundamentals,
        }
    }

    /// Supported operations in declaration order.
    pub fn operations(&self) -> Vec<Operation> {
        Operation::ALL
            .iter()
            .copied()
            .filter(|op| self.supports(*op))
            .collect()
    }
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_sets_requested_operations() {
        let caps = ProviderCapabilities::only(&[Operation::Historical, Operation::Search]);
        assert!(caps.supports(Operation::Historical));
        assert!(caps.supports(Operation::Search));
        assert!(!caps.supports(Operation::Realtime));
        assert!(!caps.supports(Operation::ValidateSymbols));
        assert!(!caps.supports(Operation::Fundamentals));
        assert_eq!(
            caps.operations(),
            vec![Operation::Historical, Operation::Search]
        );
    }

    #[test]
    fn test_all_and_none() {
        for op in Operation::ALL {
            assert!(ProviderCapabilities::all().supports(op));
            assert!(!ProviderCapabilities::none().supports(op));
        }
    }

    #[test]
    fn test_missing_fields_default_to_supported() {
        let caps: ProviderCapabilities =
            serde_json::from_str(r#"{"supports_search": false}"#).unwrap();
        assert!(!caps.supports(Operation::Search));
        assert!(caps.supports(Operation::Historical));
    }
}
