//! Error types for shadow account flows.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the commitment engine, the operation builder, the relay
/// client and the recovery flows.
///
/// Flows never retry or swallow these: once an operation reaches the relay its
/// side effects are irreversible, so every error aborts the flow with the
/// original cause attached.
#[derive(Debug, Error)]
pub enum ShadowError {
    // ═══════════════════════════════════════════════════════════════════════════════
    // INPUT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Malformed input caught before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    // ═══════════════════════════════════════════════════════════════════════════════
    // EXTERNAL SERVICE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// The relay answered with a non-null `error` envelope. Carries the
    /// serialized error payload verbatim.
    #[error("relay rpc error: {0}")]
    Rpc(String),

    /// Proof generation failed or the proof did not verify locally.
    #[error("proof error: {0}")]
    Proof(String),

    /// The chain is not in the state the flow expects.
    #[error("unexpected chain state: {0}")]
    ChainState(String),

    /// A liveness wait exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A liveness wait was cancelled by its owner.
    #[error("operation cancelled")]
    Cancelled,

    // ═══════════════════════════════════════════════════════════════════════════════
    // TRANSPORT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("node error: {0}")]
    Node(#[from] ethers::providers::ProviderError),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("abi error: {0}")]
    Abi(#[from] ethers::abi::Error),

    // ═══════════════════════════════════════════════════════════════════════════════
    // INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShadowError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ShadowError::Validation(msg.into())
    }

    pub(crate) fn chain_state(msg: impl Into<String>) -> Self {
        ShadowError::ChainState(msg.into())
    }
}

pub type Result<T, E = ShadowError> = std::result::Result<T, E>;
