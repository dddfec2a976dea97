//! Logical operations a provider can serve.

use serde::{Deserialize, Serialize};

/// A logical fetch operation, independent of any provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Historical OHLCV bars for a date range.
    Historical,
    /// Latest real-time quotes.
    Realtime,
    /// Symbol existence/metadata validation.
    ValidateSymbols,
    /// Free-text symbol search.
    Search,
    /// Company fundamentals.
    Fundamentals,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Historical,
        Operation::Realtime,
        Operation::ValidateSymbols,
        Operation::Search,
        Operation::Fundamentals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::Realtime => "realtime",
            Self::ValidateSymbols => "validate_symbols",
            Self::Search => "search",
            Self::Fundamentals => "fundamentals",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
