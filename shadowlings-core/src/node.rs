//! Node RPC boundary.

use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Filter, Log, TransactionReceipt,
        TransactionRequest, H256, U256,
    },
};
use tracing::debug;

use crate::error::{Result, ShadowError};

/// The node queries the flows depend on.
#[async_trait]
pub trait ChainNode: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// `eth_call` at the latest block.
    async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes>;

    async fn transaction_count(&self, address: Address) -> Result<U256>;

    async fn balance(&self, address: Address) -> Result<U256>;

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>>;
}

fn chain_id_from_u256(id: U256) -> Result<u64> {
    u64::try_from(id).map_err(|_| {
        ShadowError::chain_state(format!("node reported chain id {} wider than 64 bits", id))
    })
}

/// [`ChainNode`] over an HTTP JSON-RPC endpoint.
#[derive(Clone, Debug)]
pub struct EthersNode {
    provider: Provider<Http>,
}

impl EthersNode {
    pub fn connect(url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| ShadowError::validation(format!("invalid node url '{}': {}", url, e)))?;
        Ok(Self { provider })
    }

    pub fn provider(&self) -> &Provider<Http> {
        &self.provider
    }
}

#[async_trait]
impl ChainNode for EthersNode {
    async fn chain_id(&self) -> Result<u64> {
        chain_id_from_u256(self.provider.get_chainid().await?)
    }

    async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes> {
        let mut request = TransactionRequest::new().to(to).data(data);
        if let Some(from) = from {
            request = request.from(from);
        }
        let tx: TypedTransaction = request.into();
        debug!(to = ?to, "eth_call");
        Ok(self.provider.call(&tx, None).await?)
    }

    async fn transaction_count(&self, address: Address) -> Result<U256> {
        Ok(self.provider.get_transaction_count(address, None).await?)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.provider.get_balance(address, None).await?)
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        Ok(self.provider.get_transaction_receipt(hash).await?)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        Ok(self.provider.get_logs(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn node_answering_chain_id(chain_id: &'static str) -> EthersNode {
        let app = Router::new().route(
            "/",
            post(move |Json(request): Json<Value>| async move {
                Json(json!({ "jsonrpc": "2.0", "id": request["id"], "result": chain_id }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        EthersNode::connect(&format!("http://{}/", addr)).unwrap()
    }

    #[test]
    fn test_chain_id_bounds() {
        assert_eq!(chain_id_from_u256(U256::from(1337)).unwrap(), 1337);
        assert_eq!(chain_id_from_u256(U256::from(u64::MAX)).unwrap(), u64::MAX);
        assert!(matches!(
            chain_id_from_u256(U256::from(u64::MAX) + 1),
            Err(ShadowError::ChainState(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_chain_id_is_chain_state_error() {
        let node = node_answering_chain_id("0x539").await;
        assert_eq!(node.chain_id().await.unwrap(), 1337);

        let node = node_answering_chain_id("0x10000000000000000").await;
        assert!(matches!(node.chain_id().await, Err(ShadowError::ChainState(_))));
    }
}
