// =============================================================================
// Scanner error taxonomy
// =============================================================================
//
// Fatal variants (ConfigInvalid, and BusUnavailable when it occurs during
// startup) are meant to propagate to `main` via `anyhow` and trigger process
// exit. Every other variant is handled locally at the point of use: logged,
// counted, and never bubbled past the task that produced it.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("failed to decode message: {0}")]
    DecodeFailure(String),

    #[error("message failed validation: {0}")]
    ValidationFailure(String),

    #[error("state store rejected update for {symbol}: {reason}")]
    TransientStateError { symbol: String, reason: String },

    #[error("rule {rule_id} failed to compile: {reason}")]
    RuleCompileFailure { rule_id: String, reason: String },

    #[error("rule {rule_id} evaluation error for {symbol}: {reason}")]
    EvaluationError {
        rule_id: String,
        symbol: String,
        reason: String,
    },

    #[error("failed to emit alert: {0}")]
    EmitFailure(String),
}
