//! Commitment values binding an owner to a shadow.
//!
//! ```text
//! owner_hash = H(owner, entropy)
//! salt_hash  = H(salt, PEPPER)
//! commit     = H(owner_hash, salt_hash)
//! nullifier  = H(operation_hash & FIELD_MASK, salt_hash)
//! ```
//!
//! Only `commit` (and, on registration, `salt_hash`) is ever published.

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, ShadowError},
    field::FieldElement,
    mimc::hash2,
};

/// Domain separation constant mixed into every salt hash.
pub const PEPPER: u64 = 42;

/// Hash an owner address with optional entropy bytes, read as a big-endian
/// integer. Fails when the entropy does not fit the field.
pub fn owner_hash(owner: Address, entropy: &[u8]) -> Result<FieldElement> {
    let entropy = FieldElement::from_be_slice(entropy).map_err(|e| match e {
        ShadowError::Validation(msg) => ShadowError::validation(format!("entropy: {}", msg)),
        other => other,
    })?;
    Ok(hash2(FieldElement::from_address(owner), entropy))
}

pub fn salt_hash(salt: FieldElement) -> FieldElement {
    salt_hash_with_pepper(salt, FieldElement::from_u64(PEPPER))
}

pub fn salt_hash_with_pepper(salt: FieldElement, pepper: FieldElement) -> FieldElement {
    hash2(salt, pepper)
}

pub fn commit(owner_hash: FieldElement, salt_hash: FieldElement) -> FieldElement {
    hash2(owner_hash, salt_hash)
}

/// Fold a 256-bit operation hash into the field by masking to 248 bits.
pub fn execution_hash(operation_hash: H256) -> FieldElement {
    FieldElement::from_masked_hash(operation_hash)
}

pub fn nullifier(execution_hash: FieldElement, salt_hash: FieldElement) -> FieldElement {
    hash2(execution_hash, salt_hash)
}

/// The three derived values for one (owner, entropy, salt) triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub owner_hash: FieldElement,
    pub salt_hash: FieldElement,
    pub commit: FieldElement,
}

impl Commitment {
    pub fn derive(owner: Address, entropy: &[u8], salt: FieldElement) -> Result<Self> {
        Self::from_salt_hash(owner, entropy, salt_hash(salt))
    }

    /// Recovery only knows the published salt hash, never the salt.
    pub fn from_salt_hash(owner: Address, entropy: &[u8], salt_hash: FieldElement) -> Result<Self> {
        let owner_hash = owner_hash(owner, entropy)?;
        Ok(Self {
            owner_hash,
            salt_hash,
            commit: commit(owner_hash, salt_hash),
        })
    }

    pub fn nullifier_for(&self, operation_hash: H256) -> (FieldElement, FieldElement) {
        let execution = execution_hash(operation_hash);
        (execution, nullifier(execution, self.salt_hash))
    }
}
