//! Invoker and EntryPoint ABI boundaries.
//!
//! Calldata is assembled by hand from the function signature's selector and
//! `abi::encode`. The wrappers below bind those encoders to a [`ChainNode`].

use std::sync::Arc;

use ethers::{
    abi::{self, ParamType, Token},
    types::{Address, BlockNumber, Bytes, Filter, H256, U256},
    utils::id,
};
use tracing::debug;

use crate::{
    error::{Result, ShadowError},
    field::FieldElement,
    node::ChainNode,
    proving::Proof,
    userop::{Authorization, PackedUserOperation},
};

/// Topic of the log an account emits when it registers a salt hash.
pub const REGISTER_TOPIC: H256 = H256([
    0x6e, 0x2b, 0xac, 0x2c, 0xdd, 0x35, 0x23, 0x22,
    0x09, 0xf7, 0x42, 0x20, 0x97, 0x4a, 0x16, 0x37,
    0xad, 0x04, 0x07, 0xde, 0xaf, 0x17, 0x81, 0x51,
    0x45, 0x43, 0x72, 0xab, 0x3e, 0x8c, 0xfa, 0x3b,
]);

pub const ENTRY_POINT_SIG: &str = "ENTRY_POINT()";
pub const GET_SHADOWLING_SIG: &str = "getShadowling(uint256)";
pub const GET_DELEGATION_SIGNATURE_SIG: &str = "getShadowlingDelegationSignature(uint256)";
pub const REGISTER_SIG: &str = "register(uint256)";
pub const EXECUTE_SIG: &str = "execute(address,address,uint256)";
pub const EXECUTE_WITH_RECOVERY_SIG: &str = "executeWithRecovery(uint256,uint256,address,address,uint256,((uint256,uint256),(uint256[2],uint256[2]),(uint256,uint256)))";

pub const GET_USER_OP_HASH_SIG: &str =
    "getUserOpHash((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes))";
pub const GET_NONCE_SIG: &str = "getNonce(address,uint192)";
pub const BALANCE_OF_SIG: &str = "balanceOf(address)";
pub const DEPOSIT_TO_SIG: &str = "depositTo(address)";

pub const MINT_SIG: &str = "mint(address,uint256)";

fn calldata(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend_from_slice(&abi::encode(tokens));
    data.into()
}

fn field(value: FieldElement) -> Token {
    Token::Uint(value.to_u256())
}

fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>> {
    Ok(abi::decode(types, data)?)
}

fn unexpected(what: &str) -> ShadowError {
    ShadowError::ChainState(format!("unexpected return data for {}", what))
}

// ═══════════════════════════════════════════════════════════════════════════════
// INVOKER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn encode_entry_point() -> Bytes {
    calldata(ENTRY_POINT_SIG, &[])
}

pub fn encode_get_shadowling(commit: FieldElement) -> Bytes {
    calldata(GET_SHADOWLING_SIG, &[field(commit)])
}

pub fn encode_get_delegation_signature(commit: FieldElement) -> Bytes {
    calldata(GET_DELEGATION_SIGNATURE_SIG, &[field(commit)])
}

pub fn encode_register(salt_hash: FieldElement) -> Bytes {
    calldata(REGISTER_SIG, &[field(salt_hash)])
}

pub fn encode_execute(token: Address, to: Address, amount: U256) -> Bytes {
    calldata(
        EXECUTE_SIG,
        &[Token::Address(token), Token::Address(to), Token::Uint(amount)],
    )
}

pub fn encode_execute_with_recovery(
    commit: FieldElement,
    salt_hash: FieldElement,
    token: Address,
    to: Address,
    amount: U256,
    proof: &Proof,
) -> Bytes {
    calldata(
        EXECUTE_WITH_RECOVERY_SIG,
        &[
            field(commit),
            field(salt_hash),
            Token::Address(token),
            Token::Address(to),
            Token::Uint(amount),
            proof.to_token(),
        ],
    )
}

/// The user operation signature for registration:
/// `abi.encode(uint256 commit, uint256 nullifier, (uint256[2], uint256[2][2], uint256[2]) proof)`.
pub fn encode_register_signature(
    commit: FieldElement,
    nullifier: FieldElement,
    proof: &Proof,
) -> Bytes {
    abi::encode(&[field(commit), field(nullifier), proof.to_array_token()]).into()
}

pub fn decode_address(data: &[u8], what: &str) -> Result<Address> {
    decode(&[ParamType::Address], data)?
        .into_iter()
        .next()
        .and_then(Token::into_address)
        .ok_or_else(|| unexpected(what))
}

pub fn decode_bool(data: &[u8], what: &str) -> Result<bool> {
    decode(&[ParamType::Bool], data)?
        .into_iter()
        .next()
        .and_then(Token::into_bool)
        .ok_or_else(|| unexpected(what))
}

pub fn decode_uint(data: &[u8], what: &str) -> Result<U256> {
    decode(&[ParamType::Uint(256)], data)?
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| unexpected(what))
}

pub fn decode_bytes32(data: &[u8], what: &str) -> Result<H256> {
    decode(&[ParamType::FixedBytes(32)], data)?
        .into_iter()
        .next()
        .and_then(Token::into_fixed_bytes)
        .filter(|b| b.len() == 32)
        .map(|b| H256::from_slice(&b))
        .ok_or_else(|| unexpected(what))
}

/// `(uint8 yParity, bytes32 r, bytes32 s)`
pub fn decode_delegation_signature(data: &[u8]) -> Result<(u8, H256, H256)> {
    let tokens = decode(
        &[ParamType::Uint(8), ParamType::FixedBytes(32), ParamType::FixedBytes(32)],
        data,
    )?;
    match tokens.as_slice() {
        [Token::Uint(y), Token::FixedBytes(r), Token::FixedBytes(s)]
            if *y <= U256::from(1u8) && r.len() == 32 && s.len() == 32 =>
        {
            Ok((y.low_u32() as u8, H256::from_slice(r), H256::from_slice(s)))
        }
        _ => Err(unexpected(GET_DELEGATION_SIGNATURE_SIG)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

pub fn encode_get_user_op_hash(op: PackedUserOperation) -> Bytes {
    calldata(GET_USER_OP_HASH_SIG, &[op.into_token()])
}

pub fn encode_get_nonce(sender: Address, key: U256) -> Bytes {
    calldata(GET_NONCE_SIG, &[Token::Address(sender), Token::Uint(key)])
}

pub fn encode_balance_of(account: Address) -> Bytes {
    calldata(BALANCE_OF_SIG, &[Token::Address(account)])
}

pub fn encode_deposit_to(account: Address) -> Bytes {
    calldata(DEPOSIT_TO_SIG, &[Token::Address(account)])
}

/// Test token faucet used when funding shadows.
pub fn encode_mint(to: Address, amount: U256) -> Bytes {
    calldata(MINT_SIG, &[Token::Address(to), Token::Uint(amount)])
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPED WRAPPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// The Shadowlings invoker contract.
#[derive(Clone)]
pub struct Invoker {
    node: Arc<dyn ChainNode>,
    address: Address,
}

impl Invoker {
    pub fn new(node: Arc<dyn ChainNode>, address: Address) -> Self {
        Self { node, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn call(&self, data: Bytes) -> Result<Bytes> {
        self.node.call(self.address, data, None).await
    }

    pub async fn entry_point(&self) -> Result<Address> {
        let out = self.call(encode_entry_point()).await?;
        decode_address(&out, ENTRY_POINT_SIG)
    }

    pub async fn shadowling(&self, commit: FieldElement) -> Result<Address> {
        let out = self.call(encode_get_shadowling(commit)).await?;
        decode_address(&out, GET_SHADOWLING_SIG)
    }

    /// The activation authorization for the shadow of `commit`.
    pub async fn delegation_authorization(&self, commit: FieldElement) -> Result<Authorization> {
        let out = self.call(encode_get_delegation_signature(commit)).await?;
        let (y_parity, r, s) = decode_delegation_signature(&out)?;
        Ok(Authorization::universal(self.address, y_parity, r, s))
    }
}

/// The ERC-4337 EntryPoint the invoker trusts.
#[derive(Clone)]
pub struct EntryPoint {
    node: Arc<dyn ChainNode>,
    address: Address,
}

impl EntryPoint {
    pub fn new(node: Arc<dyn ChainNode>, address: Address) -> Self {
        Self { node, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn call(&self, data: Bytes) -> Result<Bytes> {
        self.node.call(self.address, data, None).await
    }

    pub async fn user_op_hash(&self, op: PackedUserOperation) -> Result<H256> {
        let out = self.call(encode_get_user_op_hash(op)).await?;
        decode_bytes32(&out, GET_USER_OP_HASH_SIG)
    }

    pub async fn nonce(&self, sender: Address, key: U256) -> Result<U256> {
        let out = self.call(encode_get_nonce(sender, key)).await?;
        decode_uint(&out, GET_NONCE_SIG)
    }

    pub async fn balance_of(&self, account: Address) -> Result<U256> {
        let out = self.call(encode_balance_of(account)).await?;
        decode_uint(&out, BALANCE_OF_SIG)
    }
}

/// Data of the first registration log `shadow` emitted, if any.
pub async fn registration(node: &dyn ChainNode, shadow: Address) -> Result<Option<Bytes>> {
    let filter = Filter::new()
        .address(shadow)
        .topic0(REGISTER_TOPIC)
        .from_block(BlockNumber::Earliest)
        .to_block(BlockNumber::Latest);
    let logs = node.logs(&filter).await?;
    debug!(shadow = ?shadow, count = logs.len(), "registration logs");
    Ok(logs.into_iter().next().map(|log| log.data))
}
