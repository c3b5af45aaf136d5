//! Process-wide handles, opened once and passed to every flow.

use std::sync::Arc;

use ethers::types::Address;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    builder::OperationBuilder,
    bundler::BundlerClient,
    config::ShadowlingsConfig,
    contracts::{EntryPoint, Invoker},
    error::Result,
    node::{ChainNode, EthersNode},
    poll::PollPolicy,
    proving::{HttpProver, ProvingService},
    userop::GasPolicy,
};

/// Connected node, contracts, relay and prover for one process.
pub struct ShadowlingsContext {
    node: Arc<dyn ChainNode>,
    chain_id: u64,
    invoker: Invoker,
    entry_point: EntryPoint,
    bundler: BundlerClient,
    prover: Arc<dyn ProvingService>,
    gas: GasPolicy,
    poll: PollPolicy,
    cancel: CancellationToken,
}

impl ShadowlingsContext {
    /// Connect everything `config` names. Fails before any flow runs when the
    /// node is unreachable or no invoker can be resolved.
    pub async fn open(config: &ShadowlingsConfig) -> Result<Self> {
        let node: Arc<dyn ChainNode> = Arc::new(EthersNode::connect(&config.rpc_url)?);
        let chain_id = node.chain_id().await?;
        let invoker = config.resolve_invoker(chain_id)?;
        let prover: Arc<dyn ProvingService> = Arc::new(HttpProver::new(
            config.prover_url.clone(),
            config.artifacts_dir.clone(),
        ));
        let bundler = BundlerClient::new(config.bundler_url.clone());
        Self::assemble(node, chain_id, invoker, bundler, prover, config.gas, config.poll).await
    }

    /// Assemble a context from explicit components.
    pub async fn from_parts(
        node: Arc<dyn ChainNode>,
        invoker: Address,
        bundler: BundlerClient,
        prover: Arc<dyn ProvingService>,
        gas: GasPolicy,
        poll: PollPolicy,
    ) -> Result<Self> {
        let chain_id = node.chain_id().await?;
        Self::assemble(node, chain_id, invoker, bundler, prover, gas, poll).await
    }

    async fn assemble(
        node: Arc<dyn ChainNode>,
        chain_id: u64,
        invoker: Address,
        bundler: BundlerClient,
        prover: Arc<dyn ProvingService>,
        gas: GasPolicy,
        poll: PollPolicy,
    ) -> Result<Self> {
        let invoker = Invoker::new(node.clone(), invoker);
        let entry_point = EntryPoint::new(node.clone(), invoker.entry_point().await?);
        info!(
            chain_id,
            invoker = ?invoker.address(),
            entry_point = ?entry_point.address(),
            bundler = bundler.url(),
            "context opened"
        );
        Ok(Self {
            node,
            chain_id,
            invoker,
            entry_point,
            bundler,
            prover,
            gas,
            poll,
            cancel: CancellationToken::new(),
        })
    }

    pub fn node(&self) -> &Arc<dyn ChainNode> {
        &self.node
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }

    pub fn bundler(&self) -> &BundlerClient {
        &self.bundler
    }

    pub fn prover(&self) -> &Arc<dyn ProvingService> {
        &self.prover
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.poll
    }

    pub fn builder(&self) -> OperationBuilder {
        OperationBuilder::new(
            self.node.clone(),
            self.invoker.clone(),
            self.entry_point.clone(),
            self.gas,
        )
    }

    /// Token observed by every wait this context starts. Cancelling it (for
    /// instance from a signal handler) aborts in-flight polling.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel outstanding waits and release the components.
    pub fn close(self) {
        self.cancel.cancel();
        info!(chain_id = self.chain_id, "context closed");
    }
}
