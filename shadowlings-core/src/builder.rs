//! Assembles user operations for shadow accounts.

use std::sync::Arc;

use ethers::types::{Address, Bytes, H256, U256};
use tracing::debug;

use crate::{
    contracts::{EntryPoint, Invoker},
    error::{Result, ShadowError},
    field::FieldElement,
    node::ChainNode,
    shadow::{authorization_hash, recover_address},
    userop::{Activation, GasPolicy, PackedUserOperation, SignedUserOperation, UserOperation, WireUserOperation},
};

/// Nonce key every shadow operation uses.
pub const NONCE_KEY: U256 = U256([0; 4]);

pub struct OperationBuilder {
    node: Arc<dyn ChainNode>,
    invoker: Invoker,
    entry_point: EntryPoint,
    gas: GasPolicy,
}

impl OperationBuilder {
    pub fn new(
        node: Arc<dyn ChainNode>,
        invoker: Invoker,
        entry_point: EntryPoint,
        gas: GasPolicy,
    ) -> Self {
        Self {
            node,
            invoker,
            entry_point,
            gas,
        }
    }

    /// Build an unsigned operation for `shadow` carrying `call_data`.
    ///
    /// Accounts with no transaction history get an EIP-7702 activation from
    /// the invoker's delegation signature.
    pub async fn build(
        &self,
        shadow: Address,
        commit: FieldElement,
        call_data: Bytes,
    ) -> Result<UserOperation> {
        let nonce = self.entry_point.nonce(shadow, NONCE_KEY).await?;
        let activation = self.activation(shadow, commit).await?;
        debug!(
            shadow = ?shadow,
            nonce = %nonce,
            activating = !matches!(activation, Activation::None),
            "built user operation"
        );
        Ok(UserOperation::new(shadow, nonce, call_data, &self.gas).with_activation(activation))
    }

    pub async fn activation(&self, shadow: Address, commit: FieldElement) -> Result<Activation> {
        if !self.node.transaction_count(shadow).await?.is_zero() {
            return Ok(Activation::None);
        }
        let authorization = self.invoker.delegation_authorization(commit).await?;
        // the EntryPoint rejects an authorization that does not recover to the sender
        let authority = recover_address(
            authorization_hash(authorization.address),
            authorization.r,
            authorization.s,
            authorization.y_parity,
        )?;
        if authority != shadow {
            return Err(ShadowError::chain_state(format!(
                "delegation signature recovers to {:?}, not shadow {:?}",
                authority, shadow
            )));
        }
        Ok(Activation::Delegation { authorization })
    }

    pub fn pack(&self, op: &UserOperation) -> PackedUserOperation {
        op.pack()
    }

    /// The EntryPoint's canonical hash of `op`.
    pub async fn hash(&self, op: &UserOperation) -> Result<H256> {
        self.entry_point.user_op_hash(op.pack()).await
    }

    pub fn serialize(&self, op: &SignedUserOperation) -> WireUserOperation {
        op.to_wire()
    }

    pub fn gas(&self) -> &GasPolicy {
        &self.gas
    }
}
