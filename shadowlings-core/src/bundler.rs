//! JSON-RPC client for an ERC-4337 bundler.
//!
//! A plain transport: one POST per call, no retries, no timeouts beyond the
//! HTTP client's own. Request ids come from a per-instance counter that starts
//! at zero and advances exactly once per request, whatever the method.

use std::sync::atomic::{AtomicU64, Ordering};

use ethers::types::{Address, H256, U64};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    encoding::checksum,
    error::{Result, ShadowError},
    userop::SignedUserOperation,
};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

/// Inclusion record returned by `eth_getUserOperationByHash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationLookup {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default)]
    pub entry_point: Option<Address>,
}

#[derive(Debug)]
pub struct BundlerClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl BundlerClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn supported_entry_points(&self) -> Result<Vec<Address>> {
        self.request("eth_supportedEntryPoints", json!([])).await
    }

    /// Submit a signed operation. Returns the hash the bundler assigned.
    pub async fn send_user_operation(
        &self,
        op: &SignedUserOperation,
        entry_point: Address,
    ) -> Result<H256> {
        let params = json!([op.to_wire(), checksum(&entry_point)]);
        self.request("eth_sendUserOperation", params).await
    }

    /// `None` until the operation is included on-chain.
    pub async fn user_operation_by_hash(&self, hash: H256) -> Result<Option<UserOperationLookup>> {
        self.request("eth_getUserOperationByHash", json!([hash])).await
    }

    /// Issue one request and decode its `result`.
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let result = self.send(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Issue one request and return its raw `result`.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        debug!(id, method, "bundler request");

        let response: JsonRpcResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            debug!(id, method, %error, "bundler error");
            return Err(ShadowError::Rpc(error.to_string()));
        }
        Ok(response.result)
    }
}
