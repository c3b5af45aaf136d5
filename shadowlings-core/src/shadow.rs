//! Shadow address derivation and the local shadow list.
//!
//! A shadow is the account that "signed" an EIP-7702 authorization delegating
//! to the invoker, where the signature is synthetic:
//!
//! ```text
//! r        = keccak256("Shadowlings.r") - 1
//! s        = commit (32 bytes, big-endian)
//! yParity  = 0
//! message  = keccak256(0x05 || 0xd7 || 0x80 || 0x94 || invoker || 0x80)
//!          = keccak256(0x05 || rlp([chainId = 0, invoker, nonce = 0]))
//! ```
//!
//! Recovering the public key from that signature gives an address nobody holds
//! a key for, but which the invoker can reproduce on-chain from the commit
//! alone. All four encodings above are consensus-critical.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use ethers::types::{Address, H256, U256};
use k256::{
    elliptic_curve::{
        ops::Reduce, point::DecompressPoint, sec1::ToEncodedPoint, subtle::Choice, PrimeField,
    },
    AffinePoint, FieldBytes, ProjectivePoint, Scalar, U256 as ScalarUint,
};
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    commitment::Commitment,
    encoding::{checksum, serde_checksum},
    error::{Result, ShadowError},
    field::FieldElement,
    keccak256,
};

/// EIP-7702 authorization magic byte.
pub const AUTHORIZATION_MAGIC: u8 = 0x05;

pub const SIGNATURE_LABEL: &[u8] = b"Shadowlings.r";

/// The fixed `yParity` of every shadow signature.
pub const SIGNATURE_Y_PARITY: u8 = 0;

/// Salt width drawn for new shadows. 31 bytes always fit the field.
pub const SALT_BYTES: usize = 31;

static SIGNATURE_R: Lazy<H256> = Lazy::new(|| {
    let label = U256::from_big_endian(&keccak256(SIGNATURE_LABEL));
    let mut out = [0u8; 32];
    // keccak256 of a fixed label, never zero
    label.overflowing_sub(U256::one()).0.to_big_endian(&mut out);
    H256(out)
});

/// The fixed `r` component shared by every shadow signature.
pub fn signature_r() -> H256 {
    *SIGNATURE_R
}

/// `0x05 || rlp([0, invoker, 0])` for a chain-agnostic, nonce-zero
/// authorization.
pub fn authorization_preimage(invoker: Address) -> [u8; 25] {
    let mut preimage = [0u8; 25];
    preimage[0] = AUTHORIZATION_MAGIC;
    // list header: 0xc0 + payload length (1 + 21 + 1)
    preimage[1] = 0xd7;
    // chainId = 0 encodes as the empty string
    preimage[2] = 0x80;
    // 20-byte string header
    preimage[3] = 0x94;
    preimage[4..24].copy_from_slice(invoker.as_bytes());
    // nonce = 0
    preimage[24] = 0x80;
    preimage
}

pub fn authorization_hash(invoker: Address) -> H256 {
    H256(keccak256(authorization_preimage(invoker)))
}

/// Standard secp256k1 public key recovery: `Q = r⁻¹ · (s·R − z·G)`, returning
/// the Ethereum address of `Q`.
pub fn recover_address(message: H256, r: H256, s: H256, y_parity: u8) -> Result<Address> {
    let r_bytes = FieldBytes::clone_from_slice(r.as_bytes());
    let s_bytes = FieldBytes::clone_from_slice(s.as_bytes());

    let r_scalar = Option::<Scalar>::from(Scalar::from_repr(r_bytes))
        .filter(|r| !bool::from(r.is_zero()))
        .ok_or_else(|| ShadowError::validation("signature r is not a valid scalar"))?;
    let s_scalar = Option::<Scalar>::from(Scalar::from_repr(s_bytes))
        .ok_or_else(|| ShadowError::validation("signature s is not a valid scalar"))?;
    let z = <Scalar as Reduce<ScalarUint>>::reduce_bytes(&FieldBytes::clone_from_slice(
        message.as_bytes(),
    ));

    let big_r = Option::<AffinePoint>::from(AffinePoint::decompress(
        &r_bytes,
        Choice::from(y_parity & 1),
    ))
    .ok_or_else(|| ShadowError::validation("signature r is not the x-coordinate of a curve point"))?;
    let r_inv = Option::<Scalar>::from(r_scalar.invert())
        .ok_or_else(|| ShadowError::validation("signature r is not invertible"))?;

    let q = (ProjectivePoint::from(big_r) * s_scalar - ProjectivePoint::GENERATOR * z) * r_inv;
    if q == ProjectivePoint::IDENTITY {
        return Err(ShadowError::validation("recovered key is the point at infinity"));
    }

    let encoded = q.to_affine().to_encoded_point(false);
    // skip the 0x04 SEC1 tag
    let digest = keccak256(&encoded.as_bytes()[1..]);
    Ok(Address::from_slice(&digest[12..]))
}

/// The `(yParity, r, s)` triple the invoker reports for `commit`.
pub fn delegation_signature(commit: FieldElement) -> (u8, H256, H256) {
    (SIGNATURE_Y_PARITY, signature_r(), commit.to_h256())
}

/// Derive the shadow account for `commit` under `invoker`. Pure and
/// deterministic.
pub fn derive_shadow_address(commit: FieldElement, invoker: Address) -> Result<Address> {
    let (y_parity, r, s) = delegation_signature(commit);
    recover_address(authorization_hash(invoker), r, s, y_parity)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCAL SHADOW LIST
// ═══════════════════════════════════════════════════════════════════════════════

/// A locally tracked shadow account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shadow {
    #[serde(with = "serde_checksum")]
    pub address: Address,
    pub salt: FieldElement,
}

impl Shadow {
    /// Draw a fresh salt and derive the matching shadow.
    pub fn generate(owner: Address, entropy: &[u8], invoker: Address) -> Result<Self> {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes[32 - SALT_BYTES..]);
        let salt = FieldElement::from_be_bytes(&bytes)?;
        Self::with_salt(owner, entropy, salt, invoker)
    }

    pub fn with_salt(
        owner: Address,
        entropy: &[u8],
        salt: FieldElement,
        invoker: Address,
    ) -> Result<Self> {
        let commitment = Commitment::derive(owner, entropy, salt)?;
        let address = derive_shadow_address(commitment.commit, invoker)?;
        Ok(Self { address, salt })
    }
}

/// Ordered shadow lists, one JSON file per owner.
#[derive(Clone, Debug)]
pub struct ShadowStore {
    dir: PathBuf,
}

impl ShadowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, owner: Address) -> PathBuf {
        self.dir.join(format!("{}_shadows.json", checksum(&owner)))
    }

    pub fn list(&self, owner: Address) -> Result<Vec<Shadow>> {
        match fs::read(self.path(owner)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, owner: Address, shadows: &[Shadow]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(owner);
        fs::write(&path, serde_json::to_vec_pretty(shadows)?)?;
        debug!(path = %path.display(), count = shadows.len(), "persisted shadows");
        Ok(())
    }

    /// Generate a new shadow for `owner` and append it.
    pub fn create(&self, owner: Address, entropy: &[u8], invoker: Address) -> Result<Shadow> {
        let shadow = Shadow::generate(owner, entropy, invoker)?;
        self.add(owner, shadow.clone())?;
        Ok(shadow)
    }

    pub fn add(&self, owner: Address, shadow: Shadow) -> Result<Vec<Shadow>> {
        let mut shadows = self.list(owner)?;
        shadows.push(shadow);
        self.persist(owner, &shadows)?;
        Ok(shadows)
    }

    /// Forget a shadow locally. On-chain state is untouched.
    pub fn remove(&self, owner: Address, address: Address) -> Result<Vec<Shadow>> {
        let mut shadows = self.list(owner)?;
        shadows.retain(|shadow| shadow.address != address);
        self.persist(owner, &shadows)?;
        Ok(shadows)
    }
}
