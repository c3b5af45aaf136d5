//! shadowlings-core
//!
//! Privacy-preserving recovery for smart accounts.
//!
//! An owner derives a "shadow" account from a commitment over
//! `(owner, entropy, salt)`. The shadow is activated through an EIP-7702
//! delegation to the invoker contract and driven through ERC-4337 user
//! operations. Registration and recovery are authenticated by Groth16 proofs
//! of commitment preimage knowledge instead of a private key.
//!
//! Layers, leaves first:
//! 1. [`commitment`] and [`shadow`]: pure derivation
//! 2. [`builder`] and [`userop`]: operation assembly, packing and hashing
//! 3. [`bundler`]: JSON-RPC relay transport
//! 4. [`orchestrator`]: the register and recover flows

pub mod builder;
pub mod bundler;
pub mod commitment;
pub mod config;
pub mod context;
pub mod contracts;
pub mod encoding;
pub mod error;
pub mod field;
pub mod groth16;
pub mod mimc;
pub mod node;
pub mod orchestrator;
pub mod poll;
pub mod proving;
pub mod shadow;
pub mod userop;

use sha3::{Digest, Keccak256};

pub use builder::OperationBuilder;
pub use bundler::{BundlerClient, UserOperationLookup};
pub use commitment::Commitment;
pub use config::ShadowlingsConfig;
pub use context::ShadowlingsContext;
pub use error::{Result, ShadowError};
pub use field::FieldElement;
pub use node::{ChainNode, EthersNode};
pub use orchestrator::{
    RecoverRequest, RecoveryOrchestrator, RecoveryTransaction, RegisterOutcome, RegisterRequest,
    ShadowInfo,
};
pub use poll::PollPolicy;
pub use proving::{Circuit, GeneratedProof, HttpProver, Proof, ProvingService};
pub use shadow::{derive_shadow_address, Shadow, ShadowStore};
pub use userop::{Activation, Authorization, GasPolicy, SignedUserOperation, UserOperation};

pub(crate) fn keccak256(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data.as_ref()));
    out
}
