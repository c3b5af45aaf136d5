//! Register and recover flows.
//!
//! Each flow is a straight pipeline over a [`ShadowlingsContext`]. Any error
//! aborts the flow with its original cause; nothing is retried and nothing
//! already sent to the relay is undone.

use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    commitment::Commitment,
    context::ShadowlingsContext,
    contracts::{
        decode_bool, encode_execute_with_recovery, encode_register, encode_register_signature,
        registration, EXECUTE_WITH_RECOVERY_SIG,
    },
    error::{Result, ShadowError},
    field::FieldElement,
    poll::poll_until,
    proving::{Circuit, GeneratedProof},
    shadow::derive_shadow_address,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterRequest {
    pub owner: Address,
    pub entropy: Vec<u8>,
    pub salt: FieldElement,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOutcome {
    pub shadow: Address,
    pub commitment: Commitment,
    pub user_op_hash: H256,
    pub nullifier: FieldElement,
    pub transaction_hash: H256,
    pub receipt: TransactionReceipt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoverRequest {
    pub owner: Address,
    pub entropy: Vec<u8>,
    /// The salt hash published at registration. The salt itself is not needed.
    pub salt_hash: FieldElement,
    /// Token to move, or the zero address for ether.
    pub token: Address,
    pub to: Address,
    pub amount: U256,
}

/// An owner transaction ready to be signed and sent. Already dry-run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryTransaction {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub commit: FieldElement,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowInfo {
    pub commitment: Commitment,
    pub shadow: Address,
    pub balance: U256,
    pub deposit: U256,
    /// Data of the registration log, if the shadow has registered.
    pub registration: Option<Bytes>,
}

pub struct RecoveryOrchestrator<'a> {
    ctx: &'a ShadowlingsContext,
}

impl<'a> RecoveryOrchestrator<'a> {
    pub fn new(ctx: &'a ShadowlingsContext) -> Self {
        Self { ctx }
    }

    /// Derive the shadow for `commit` and check the invoker agrees.
    async fn resolve_shadow(&self, commit: FieldElement) -> Result<Address> {
        let invoker = self.ctx.invoker();
        let local = derive_shadow_address(commit, invoker.address())?;
        let onchain = invoker.shadowling(commit).await?;
        if local != onchain {
            return Err(ShadowError::chain_state(format!(
                "invoker reports shadow {:?} for commit {}, derived {:?}",
                onchain, commit, local
            )));
        }
        Ok(local)
    }

    async fn prove_and_verify(
        &self,
        circuit: Circuit,
        inputs: &[FieldElement],
    ) -> Result<GeneratedProof> {
        let prover = self.ctx.prover();
        let generated = prover.prove(circuit, inputs).await?;
        let public = circuit.public_inputs(inputs);
        if generated.inputs.as_slice() != public {
            return Err(ShadowError::Proof(format!(
                "{} proof commits to public inputs {:?}, requested {:?}",
                circuit,
                generated.inputs.iter().map(ToString::to_string).collect::<Vec<_>>(),
                public.iter().map(ToString::to_string).collect::<Vec<_>>(),
            )));
        }
        if !prover.verify(circuit, &generated).await? {
            return Err(ShadowError::Proof(format!(
                "{} proof failed local verification",
                circuit
            )));
        }
        debug!(circuit = %circuit, "proof verified locally");
        Ok(generated)
    }

    /// Publish the salt hash for a shadow through a proof-authenticated user
    /// operation and wait for its inclusion.
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterOutcome> {
        let commitment = Commitment::derive(request.owner, &request.entropy, request.salt)?;
        let shadow = self.resolve_shadow(commitment.commit).await?;
        info!(shadow = ?shadow, commit = %commitment.commit, "registering shadow");

        if registration(self.ctx.node().as_ref(), shadow).await?.is_some() {
            return Err(ShadowError::chain_state(format!(
                "shadow {:?} is already registered",
                shadow
            )));
        }

        let builder = self.ctx.builder();
        let op = builder
            .build(shadow, commitment.commit, encode_register(commitment.salt_hash))
            .await?;
        let user_op_hash = builder.hash(&op).await?;
        let (execution, nullifier) = commitment.nullifier_for(user_op_hash);
        debug!(user_op_hash = ?user_op_hash, nullifier = %nullifier, "operation hashed");

        let inputs = [
            commitment.commit,
            nullifier,
            execution,
            commitment.salt_hash,
            commitment.owner_hash,
            request.salt,
        ];
        let generated = self.prove_and_verify(Circuit::Register, &inputs).await?;

        let signed = op.sign(encode_register_signature(
            commitment.commit,
            nullifier,
            &generated.proof,
        ));
        let bundler = self.ctx.bundler();
        let relay_hash = bundler
            .send_user_operation(&signed, self.ctx.entry_point().address())
            .await?;
        if relay_hash != user_op_hash {
            warn!(
                relay = ?relay_hash,
                local = ?user_op_hash,
                "relay reported a different operation hash"
            );
        }
        info!(user_op_hash = ?user_op_hash, "operation submitted, waiting for inclusion");

        let lookup = poll_until(self.ctx.poll_policy(), &self.ctx.cancellation(), || {
            bundler.user_operation_by_hash(user_op_hash)
        })
        .await?;

        let receipt = self
            .ctx
            .node()
            .transaction_receipt(lookup.transaction_hash)
            .await?
            .ok_or_else(|| {
                ShadowError::chain_state(format!(
                    "no receipt for transaction {:?} carrying operation {:?}",
                    lookup.transaction_hash, user_op_hash
                ))
            })?;
        info!(
            shadow = ?shadow,
            transaction = ?lookup.transaction_hash,
            block = ?receipt.block_number,
            "shadow registered"
        );

        Ok(RegisterOutcome {
            shadow,
            commitment,
            user_op_hash,
            nullifier,
            transaction_hash: lookup.transaction_hash,
            receipt,
        })
    }

    /// Prepare an owner-signed transfer out of a shadow, authenticated by a
    /// recovery proof. The returned transaction has been dry-run but not sent.
    pub async fn recover(&self, request: RecoverRequest) -> Result<RecoveryTransaction> {
        let commitment =
            Commitment::from_salt_hash(request.owner, &request.entropy, request.salt_hash)?;
        // already range-checked by the owner hash
        let entropy = FieldElement::from_be_slice(&request.entropy)?;
        let shadow = self.resolve_shadow(commitment.commit).await?;
        info!(shadow = ?shadow, to = ?request.to, amount = %request.amount, "recovering shadow");

        let inputs = [
            commitment.commit,
            FieldElement::from_address(request.owner),
            commitment.salt_hash,
            entropy,
        ];
        let generated = self.prove_and_verify(Circuit::Recovery, &inputs).await?;

        let data = encode_execute_with_recovery(
            commitment.commit,
            commitment.salt_hash,
            request.token,
            request.to,
            request.amount,
            &generated.proof,
        );

        let out = self
            .ctx
            .node()
            .call(shadow, data.clone(), Some(request.owner))
            .await?;
        if out.is_empty() {
            return Err(ShadowError::chain_state(format!(
                "recovery dry-run against {:?} returned no data",
                shadow
            )));
        }
        if !decode_bool(&out, EXECUTE_WITH_RECOVERY_SIG)? {
            return Err(ShadowError::chain_state(format!(
                "recovery dry-run against {:?} returned false",
                shadow
            )));
        }
        debug!(shadow = ?shadow, "recovery dry-run succeeded");

        Ok(RecoveryTransaction {
            from: request.owner,
            to: shadow,
            data,
            commit: commitment.commit,
        })
    }

    /// Current on-chain view of one shadow.
    pub async fn shadow_info(
        &self,
        owner: Address,
        entropy: &[u8],
        salt: FieldElement,
    ) -> Result<ShadowInfo> {
        let commitment = Commitment::derive(owner, entropy, salt)?;
        let shadow = derive_shadow_address(commitment.commit, self.ctx.invoker().address())?;
        let node = self.ctx.node();
        let balance = node.balance(shadow).await?;
        let deposit = self.ctx.entry_point().balance_of(shadow).await?;
        let registration = registration(node.as_ref(), shadow).await?;
        Ok(ShadowInfo {
            commitment,
            shadow,
            balance,
            deposit,
            registration,
        })
    }
}
