//! BN254 scalar field elements as they cross the proving boundary.
//!
//! Every value fed to the circuits (owner, entropy, salt, hashes, nullifiers)
//! is a [`FieldElement`]. Conversions from wider integers are checked: values
//! at or above the modulus are rejected, never silently reduced.

use std::{fmt, str::FromStr};

use ethers::types::{Address, H256, U256};
use halo2curves_axiom::{
    bn256::Fr,
    ff::{Field, PrimeField},
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, ShadowError};

/// Width in bits of values that always fit the proving field.
pub const FIELD_MASK_BITS: u32 = 248;

/// `2^248 - 1`. Applied to 256-bit operation hashes so they enter the field
/// without wrapping around the modulus.
pub const FIELD_MASK: U256 = U256([u64::MAX, u64::MAX, u64::MAX, 0x00ff_ffff_ffff_ffff]);

/// An element of the BN254 scalar field.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FieldElement(Fr);

impl FieldElement {
    pub const ZERO: Self = Self(Fr::ZERO);

    pub fn from_fr(fr: Fr) -> Self {
        Self(fr)
    }

    pub fn to_fr(self) -> Fr {
        self.0
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Fr::from(value))
    }

    /// Interpret 32 big-endian bytes as an integer. Fails if it does not fit.
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let mut repr = *bytes;
        repr.reverse();
        Option::<Fr>::from(Fr::from_repr(repr))
            .map(Self)
            .ok_or_else(|| {
                ShadowError::validation(format!(
                    "0x{} does not fit the field modulus",
                    hex::encode(bytes)
                ))
            })
    }

    /// Interpret an arbitrary big-endian byte string as an integer.
    ///
    /// Used for entropy, which users supply as free-form bytes. Empty input is
    /// zero.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > 32 {
            return Err(ShadowError::validation(format!(
                "{} bytes do not fit a field element",
                bytes.len()
            )));
        }
        let mut buf = [0u8; 32];
        buf[32 - bytes.len()..].copy_from_slice(bytes);
        Self::from_be_bytes(&buf)
    }

    pub fn from_u256(value: U256) -> Result<Self> {
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        Self::from_be_bytes(&buf)
    }

    /// Addresses are 160-bit and always fit.
    pub fn from_address(address: Address) -> Self {
        Self(reduce_be_bytes_to_fr(address.as_bytes()))
    }

    /// Keep the low 248 bits of a 256-bit hash.
    pub fn from_masked_hash(hash: H256) -> Self {
        let mut bytes = hash.to_fixed_bytes();
        bytes[0] = 0;
        Self(reduce_be_bytes_to_fr(&bytes))
    }

    /// Parse a `0x`-prefixed (or bare) hex integer of at most 64 digits.
    pub fn parse_hex(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > 64 {
            return Err(ShadowError::validation(format!(
                "'{}' is not a 32-byte hex integer",
                s
            )));
        }
        let padded = format!("{:0>64}", digits);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|e| ShadowError::validation(format!("invalid hex '{}': {}", s, e)))?;
        Self::from_be_bytes(&bytes)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = self.0.to_repr();
        bytes.reverse();
        bytes
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.to_be_bytes())
    }

    pub fn to_h256(&self) -> H256 {
        H256::from(self.to_be_bytes())
    }

    pub fn is_zero(&self) -> bool {
        bool::from(self.0.is_zero())
    }
}

/// Horner reduction of big-endian bytes into the field. Never fails; callers
/// that need range checks go through [`FieldElement::from_be_bytes`].
pub fn reduce_be_bytes_to_fr(bytes: &[u8]) -> Fr {
    let base = Fr::from(256);
    bytes
        .iter()
        .fold(Fr::ZERO, |acc, byte| acc * base + Fr::from(*byte as u64))
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self)
    }
}

impl FromStr for FieldElement {
    type Err = ShadowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_hex(s)
    }
}

impl From<Address> for FieldElement {
    fn from(address: Address) -> Self {
        Self::from_address(address)
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_hex(&s).map_err(de::Error::custom)
    }
}
