//! Hex renderings shared by the relay wire format and the shadow store.

use ethers::{
    types::{Address, U256},
    utils::to_checksum,
};

/// Minimal-width hex quantity, `0x0` for zero.
pub fn quantity(value: impl Into<U256>) -> String {
    let value = value.into();
    if value.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", value)
    }
}

/// `0x`-prefixed hex of arbitrary bytes, `0x` when empty.
pub fn hex_data(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn checksum(address: &Address) -> String {
    to_checksum(address, None)
}

/// Serde module rendering addresses in checksum case. Deserialization accepts
/// any case.
pub mod serde_checksum {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(address: &Address, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&checksum(address))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        Address::deserialize(deserializer)
    }
}
