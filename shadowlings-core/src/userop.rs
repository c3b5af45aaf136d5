//! ERC-4337 v0.7 user operations: the unpacked form the flows build, the packed
//! form the EntryPoint hashes, and the JSON form the relay accepts.

use ethers::{
    abi::Token,
    types::{Address, Bytes, H256, U256},
};
use serde::{Deserialize, Serialize};

use crate::encoding::{checksum, hex_data, quantity};

/// Factory marker telling the relay the account activates through an EIP-7702
/// authorization rather than a deploying factory.
pub const EIP7702_FACTORY_MARKER: &str = "0x7702";

/// An EIP-7702 delegation authorization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub chain_id: U256,
    pub address: Address,
    pub nonce: U256,
    pub y_parity: u8,
    pub r: H256,
    pub s: H256,
}

impl Authorization {
    /// A chain-agnostic, nonce-zero authorization delegating to `address`.
    pub fn universal(address: Address, y_parity: u8, r: H256, s: H256) -> Self {
        Self {
            chain_id: U256::zero(),
            address,
            nonce: U256::zero(),
            y_parity,
            r,
            s,
        }
    }
}

/// How an undeployed account comes into existence.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    None,
    ContractFactory { factory: Address, data: Bytes },
    Delegation { authorization: Authorization },
}

impl Activation {
    /// The `initCode` the EntryPoint hashes. Delegated accounts carry only the
    /// delegate address.
    pub fn init_code(&self) -> Bytes {
        match self {
            Activation::None => Bytes::new(),
            Activation::ContractFactory { factory, data } => {
                let mut code = factory.as_bytes().to_vec();
                code.extend_from_slice(data);
                code.into()
            }
            Activation::Delegation { authorization } => {
                Bytes::from(authorization.address.as_bytes().to_vec())
            }
        }
    }
}

/// Default gas and fee parameters. Policy constants, never estimated.
///
/// Kept at 64 bits so the policy loads from config files and environment
/// variables; widened to the 128-bit packed fields when an operation is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasPolicy {
    pub verification_gas_limit: u64,
    pub call_gas_limit: u64,
    pub pre_verification_gas: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            verification_gas_limit: 500_000,
            call_gas_limit: 100_000,
            pre_verification_gas: 100_000,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 20_000_000_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paymaster {
    pub address: Address,
    pub verification_gas_limit: u128,
    pub post_op_gas_limit: u128,
    pub data: Bytes,
}

impl Paymaster {
    /// `paymaster || verificationGasLimit(16) || postOpGasLimit(16) || data`
    pub fn and_data(&self) -> Bytes {
        let mut out = Vec::with_capacity(20 + 32 + self.data.len());
        out.extend_from_slice(self.address.as_bytes());
        out.extend_from_slice(&self.verification_gas_limit.to_be_bytes());
        out.extend_from_slice(&self.post_op_gas_limit.to_be_bytes());
        out.extend_from_slice(&self.data);
        out.into()
    }
}

/// Fold two 128-bit values into one word, `hi` in the upper half.
pub fn pack_gas(hi: u128, lo: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&hi.to_be_bytes());
    word[16..].copy_from_slice(&lo.to_be_bytes());
    word
}

pub fn unpack_gas(word: &[u8; 32]) -> (u128, u128) {
    let mut hi = [0u8; 16];
    let mut lo = [0u8; 16];
    hi.copy_from_slice(&word[..16]);
    lo.copy_from_slice(&word[16..]);
    (u128::from_be_bytes(hi), u128::from_be_bytes(lo))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub activation: Activation,
    pub call_data: Bytes,
    pub call_gas_limit: u128,
    pub verification_gas_limit: u128,
    pub pre_verification_gas: u128,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub paymaster: Option<Paymaster>,
}

impl UserOperation {
    pub fn new(sender: Address, nonce: U256, call_data: Bytes, gas: &GasPolicy) -> Self {
        Self {
            sender,
            nonce,
            activation: Activation::None,
            call_data,
            call_gas_limit: u128::from(gas.call_gas_limit),
            verification_gas_limit: u128::from(gas.verification_gas_limit),
            pre_verification_gas: u128::from(gas.pre_verification_gas),
            max_fee_per_gas: u128::from(gas.max_fee_per_gas),
            max_priority_fee_per_gas: u128::from(gas.max_priority_fee_per_gas),
            paymaster: None,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_paymaster(mut self, paymaster: Paymaster) -> Self {
        self.paymaster = Some(paymaster);
        self
    }

    /// The packed form with an empty signature, as hashed by the EntryPoint.
    pub fn pack(&self) -> PackedUserOperation {
        PackedUserOperation {
            sender: self.sender,
            nonce: self.nonce,
            init_code: self.activation.init_code(),
            call_data: self.call_data.clone(),
            account_gas_limits: pack_gas(self.verification_gas_limit, self.call_gas_limit),
            pre_verification_gas: U256::from(self.pre_verification_gas),
            gas_fees: pack_gas(self.max_priority_fee_per_gas, self.max_fee_per_gas),
            paymaster_and_data: self
                .paymaster
                .as_ref()
                .map(Paymaster::and_data)
                .unwrap_or_default(),
            signature: Bytes::new(),
        }
    }

    pub fn sign(self, signature: Bytes) -> SignedUserOperation {
        SignedUserOperation {
            operation: self,
            signature,
        }
    }
}

/// `PackedUserOperation` as declared by the v0.7 EntryPoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub account_gas_limits: [u8; 32],
    pub pre_verification_gas: U256,
    pub gas_fees: [u8; 32],
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl PackedUserOperation {
    /// ABI tuple `(address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes)`.
    pub fn into_token(self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::Bytes(self.init_code.to_vec()),
            Token::Bytes(self.call_data.to_vec()),
            Token::FixedBytes(self.account_gas_limits.to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees.to_vec()),
            Token::Bytes(self.paymaster_and_data.to_vec()),
            Token::Bytes(self.signature.to_vec()),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUserOperation {
    pub operation: UserOperation,
    pub signature: Bytes,
}

impl SignedUserOperation {
    /// Render for `eth_sendUserOperation`.
    pub fn to_wire(&self) -> WireUserOperation {
        let op = &self.operation;
        let mut wire = WireUserOperation {
            sender: checksum(&op.sender),
            nonce: quantity(op.nonce),
            factory: None,
            factory_data: None,
            eip7702_auth: None,
            call_data: hex_data(&op.call_data),
            call_gas_limit: quantity(op.call_gas_limit),
            verification_gas_limit: quantity(op.verification_gas_limit),
            pre_verification_gas: quantity(op.pre_verification_gas),
            max_fee_per_gas: quantity(op.max_fee_per_gas),
            max_priority_fee_per_gas: quantity(op.max_priority_fee_per_gas),
            paymaster: None,
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
            paymaster_data: None,
            signature: hex_data(&self.signature),
        };

        match &op.activation {
            Activation::None => {}
            Activation::ContractFactory { factory, data } => {
                wire.factory = Some(checksum(factory));
                wire.factory_data = Some(hex_data(data));
            }
            Activation::Delegation { authorization } => {
                wire.factory = Some(format!("{:0<42}", EIP7702_FACTORY_MARKER));
                wire.factory_data = Some("0x".to_string());
                wire.eip7702_auth = Some(WireAuthorization {
                    chain_id: quantity(authorization.chain_id),
                    address: checksum(&authorization.address),
                    nonce: quantity(authorization.nonce),
                    y_parity: quantity(authorization.y_parity),
                    r: quantity(U256::from_big_endian(authorization.r.as_bytes())),
                    s: quantity(U256::from_big_endian(authorization.s.as_bytes())),
                });
            }
        }

        if let Some(paymaster) = &op.paymaster {
            wire.paymaster = Some(checksum(&paymaster.address));
            wire.paymaster_verification_gas_limit =
                Some(quantity(paymaster.verification_gas_limit));
            wire.paymaster_post_op_gas_limit = Some(quantity(paymaster.post_op_gas_limit));
            wire.paymaster_data = Some(hex_data(&paymaster.data));
        }

        wire
    }
}

/// Relay JSON encoding of a signed operation. Optional groups are omitted
/// entirely when absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUserOperation {
    pub sender: String,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub factory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub factory_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub eip7702_auth: Option<WireAuthorization>,
    pub call_data: String,
    pub call_gas_limit: String,
    pub verification_gas_limit: String,
    pub pre_verification_gas: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub paymaster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub paymaster_verification_gas_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub paymaster_post_op_gas_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub paymaster_data: Option<String>,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAuthorization {
    pub chain_id: String,
    pub address: String,
    pub nonce: String,
    pub y_parity: String,
    pub r: String,
    pub s: String,
}
