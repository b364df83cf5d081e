// src/error.rs
//
// =============================================================================
// PREPFLOW: ERROR TAXONOMY (v 0.1 )
// =============================================================================
//
// Every failure the orchestration core can raise.
//
// Policy:
// - Fatal errors halt the run where they happen. Physical and chemical state
//   cannot be rolled back, so nothing upstream retries them.
// - `ConsumableExhausted` is the only recoverable kind. A pool raises it and
//   the tip tracker absorbs it by resetting the rack.

use crate::core::{LabwareId, ModuleKind, PipetteClass};
use thiserror::Error;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Labware is not where the run believes it is.
    #[error("consistency error: {labware} expected on {expected} but recorded on {actual}")]
    Consistency {
        labware: LabwareId,
        expected: ModuleKind,
        actual: String,
    },

    #[error("{class} tips exhausted: {used}/{capacity} used in current rack set")]
    ConsumableExhausted {
        class: PipetteClass,
        used: u32,
        capacity: u32,
    },

    /// Invalid option combination, caught before any motion.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transfer failed during '{step}': {reason}")]
    Transfer { step: String, reason: String },

    #[error("thermal failure on {module}: {reason}")]
    Thermal { module: ModuleKind, reason: String },

    #[error("hardware command failed on {module}: {reason}")]
    Hardware { module: ModuleKind, reason: String },

    #[error("operator confirmation for '{prompt}' failed: {reason}")]
    Operator { prompt: String, reason: String },

    #[error("invalid waste volume: {0} uL")]
    InvalidVolume(f64),
}

impl ProtocolError {
    pub fn config(msg: impl Into<String>) -> Self {
        ProtocolError::Configuration(msg.into())
    }

    pub fn consistency(labware: LabwareId, expected: ModuleKind, actual: Option<ModuleKind>) -> Self {
        ProtocolError::Consistency {
            labware,
            expected,
            actual: actual
                .map(|m| m.to_string())
                .unwrap_or_else(|| "nowhere".into()),
        }
    }

    /// Whether the run must stop. Only tip exhaustion can be recovered.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::ConsumableExhausted { .. })
    }
}
