//! Provider orchestration.
//!
//! - `circuit_breaker` - Per-provider Closed/Open/HalfOpen breakers
//! - `health` - Rolling health windows and candidate ranking
//! - `validator` - Payload sanity checks applied to every provider answer
//! - `skip_reason` - Per-request diagnostics of what was tried and why
//! - `failover` - The orchestrator walking a provider chain

mod circuit_breaker;
mod failover;
mod health;
mod skip_reason;
mod validator;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use failover::{ConfirmedAnswers, FailoverOrchestrator};
pub use health::{health_score, HealthConfig, HealthMonitor, HealthStatus, ProviderHealth};
pub use skip_reason::{FetchDiagnostics, ProviderAttempt, SkipReason};
pub use validator::{PayloadValidator, ValidationIssue, ValidationSeverity, ValidatorConfig};
