#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use ethers::{
    abi::{self, ParamType, Token},
    types::{Address, Bytes, Filter, Log, TransactionReceipt, H256, U256, U64},
    utils::{id, keccak256},
};
use serde_json::{json, Value};
use shadowlings_core::{
    contracts::{
        EXECUTE_WITH_RECOVERY_SIG, ENTRY_POINT_SIG, GET_DELEGATION_SIGNATURE_SIG,
        GET_NONCE_SIG, GET_SHADOWLING_SIG, GET_USER_OP_HASH_SIG, BALANCE_OF_SIG, REGISTER_TOPIC,
    },
    shadow::delegation_signature,
    BundlerClient, ChainNode, Circuit, FieldElement, GasPolicy, GeneratedProof, PollPolicy, Proof,
    ProvingService, Result, ShadowError, ShadowlingsContext,
};
use tokio::net::TcpListener;

pub const CHAIN_ID: u64 = 1337;

pub fn invoker() -> Address {
    "0xa82B48085abF81e6Cbe3Aa9D9e33B43b43977adD".parse().unwrap()
}

pub fn entry_point() -> Address {
    "0x0000000071727De22E5E9d8BAf0edAc6f37da032".parse().unwrap()
}

pub fn owner() -> Address {
    "0x1111111111111111111111111111111111111111".parse().unwrap()
}

pub fn entropy() -> Vec<u8> {
    vec![0x5a, 0xfe]
}

pub fn salt() -> FieldElement {
    FieldElement::parse_hex("0x01020304").unwrap()
}

pub fn fast_poll() -> PollPolicy {
    PollPolicy {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2,
        timeout: Duration::from_secs(5),
    }
}

fn selector(data: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&data[..4]);
    out
}

fn commit_arg(data: &[u8]) -> FieldElement {
    let tokens = abi::decode(&[ParamType::Uint(256)], &data[4..]).unwrap();
    let value = tokens.into_iter().next().and_then(Token::into_uint).unwrap();
    FieldElement::from_u256(value).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct NodeState {
    pub transaction_count: U256,
    pub balance: U256,
    pub deposit: U256,
    pub nonce: U256,
    /// Answer `getShadowling` with this instead of the derived shadow.
    pub shadow_override: Option<Address>,
    pub registration_logs: Vec<Log>,
    /// `None` answers the recovery dry-run with empty data.
    pub recovery_result: Option<bool>,
    pub receipt_missing: bool,
    pub calls: Vec<(Address, Bytes, Option<Address>)>,
    pub chain_id_queries: usize,
}

/// In-memory node answering invoker and EntryPoint calls by selector.
#[derive(Debug, Default)]
pub struct FakeNode {
    pub state: Mutex<NodeState>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<F: FnOnce(&mut NodeState)>(&self, f: F) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn calls_to(&self, to: Address) -> Vec<Bytes> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(addr, _, _)| *addr == to)
            .map(|(_, data, _)| data.clone())
            .collect()
    }

    /// The hash this node reports for `getUserOpHash` calldata.
    pub fn user_op_hash_for(calldata: &[u8]) -> H256 {
        H256(keccak256(calldata))
    }
}

pub fn registration_log(shadow: Address, data: Vec<u8>) -> Log {
    Log {
        address: shadow,
        topics: vec![REGISTER_TOPIC],
        data: data.into(),
        ..Default::default()
    }
}

#[async_trait]
impl ChainNode for FakeNode {
    async fn chain_id(&self) -> Result<u64> {
        self.state.lock().unwrap().chain_id_queries += 1;
        Ok(CHAIN_ID)
    }

    async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((to, data.clone(), from));
        let sel = selector(&data);

        let out = if to == invoker() && sel == id(ENTRY_POINT_SIG) {
            abi::encode(&[Token::Address(entry_point())])
        } else if to == invoker() && sel == id(GET_SHADOWLING_SIG) {
            let shadow = match state.shadow_override {
                Some(shadow) => shadow,
                None => shadowlings_core::derive_shadow_address(commit_arg(&data), invoker())?,
            };
            abi::encode(&[Token::Address(shadow)])
        } else if to == invoker() && sel == id(GET_DELEGATION_SIGNATURE_SIG) {
            let (y_parity, r, s) = delegation_signature(commit_arg(&data));
            abi::encode(&[
                Token::Uint(U256::from(y_parity)),
                Token::FixedBytes(r.as_bytes().to_vec()),
                Token::FixedBytes(s.as_bytes().to_vec()),
            ])
        } else if to == entry_point() && sel == id(GET_NONCE_SIG) {
            abi::encode(&[Token::Uint(state.nonce)])
        } else if to == entry_point() && sel == id(GET_USER_OP_HASH_SIG) {
            abi::encode(&[Token::FixedBytes(
                Self::user_op_hash_for(&data).as_bytes().to_vec(),
            )])
        } else if to == entry_point() && sel == id(BALANCE_OF_SIG) {
            abi::encode(&[Token::Uint(state.deposit)])
        } else if sel == id(EXECUTE_WITH_RECOVERY_SIG) {
            match state.recovery_result {
                Some(ok) => abi::encode(&[Token::Bool(ok)]),
                None => Vec::new(),
            }
        } else {
            return Err(ShadowError::ChainState(format!(
                "fake node has no answer for {:?} 0x{}",
                to,
                hex::encode(sel)
            )));
        };
        Ok(out.into())
    }

    async fn transaction_count(&self, _address: Address) -> Result<U256> {
        Ok(self.state.lock().unwrap().transaction_count)
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        if self.state.lock().unwrap().receipt_missing {
            return Ok(None);
        }
        Ok(Some(TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(7)),
            status: Some(U64::from(1)),
            ..Default::default()
        }))
    }

    async fn logs(&self, _filter: &Filter) -> Result<Vec<Log>> {
        Ok(self.state.lock().unwrap().registration_logs.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Prover that answers with a fixed proof over the circuit's public inputs.
/// `verify` accepts only proofs this prover issued, and only when `valid`.
#[derive(Debug)]
pub struct FakeProver {
    pub valid: bool,
    pub requests: Mutex<Vec<(Circuit, Vec<FieldElement>)>>,
    /// Replace the public input at this index before answering.
    pub substitute: Mutex<Option<(usize, FieldElement)>>,
    issued: Mutex<Vec<(Circuit, Vec<FieldElement>)>>,
}

impl FakeProver {
    pub fn new(valid: bool) -> Arc<Self> {
        Arc::new(Self {
            valid,
            requests: Mutex::new(Vec::new()),
            substitute: Mutex::new(None),
            issued: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<(Circuit, Vec<FieldElement>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn substitute(&self, index: usize, value: FieldElement) {
        *self.substitute.lock().unwrap() = Some((index, value));
    }
}

pub fn fixed_proof() -> Proof {
    Proof {
        a: [U256::from(1), U256::from(2)],
        b: [[U256::from(3), U256::from(4)], [U256::from(5), U256::from(6)]],
        c: [U256::from(7), U256::from(8)],
    }
}

#[async_trait]
impl ProvingService for FakeProver {
    async fn prove(&self, circuit: Circuit, inputs: &[FieldElement]) -> Result<GeneratedProof> {
        self.requests
            .lock()
            .unwrap()
            .push((circuit, inputs.to_vec()));
        let mut public = circuit.public_inputs(inputs).to_vec();
        if let Some((index, value)) = *self.substitute.lock().unwrap() {
            public[index] = value;
        }
        self.issued.lock().unwrap().push((circuit, public.clone()));
        Ok(GeneratedProof {
            proof: fixed_proof(),
            inputs: public,
        })
    }

    async fn verify(&self, circuit: Circuit, proof: &GeneratedProof) -> Result<bool> {
        let issued = self
            .issued
            .lock()
            .unwrap()
            .iter()
            .any(|(c, inputs)| *c == circuit && *inputs == proof.inputs);
        Ok(self.valid && issued && proof.proof == fixed_proof())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUNDLER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct BundlerInner {
    pub requests: Vec<Value>,
    /// `eth_getUserOperationByHash` answers null this many times first.
    pub pending_lookups: u32,
    /// `None` keeps the operation pending forever.
    pub transaction_hash: Option<H256>,
    pub send_result: H256,
    pub error: Option<Value>,
}

impl Default for BundlerInner {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            pending_lookups: 0,
            transaction_hash: Some(H256::repeat_byte(0x7e)),
            send_result: H256::repeat_byte(0x77),
            error: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockBundler {
    pub inner: Arc<Mutex<BundlerInner>>,
}

impl MockBundler {
    pub fn with<F: FnOnce(&mut BundlerInner)>(&self, f: F) {
        f(&mut self.inner.lock().unwrap());
    }

    pub fn requests(&self) -> Vec<Value> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Serve on an ephemeral port and return the endpoint URL.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/rpc", post(bundler_rpc))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/rpc", addr)
    }
}

async fn bundler_rpc(State(mock): State<MockBundler>, Json(request): Json<Value>) -> Json<Value> {
    let mut inner = mock.inner.lock().unwrap();
    inner.requests.push(request.clone());
    let id = request["id"].clone();

    if let Some(error) = inner.error.clone() {
        return Json(json!({ "jsonrpc": "2.0", "id": id, "error": error }));
    }

    let result = match request["method"].as_str().unwrap_or_default() {
        "eth_supportedEntryPoints" => json!([format!("{:?}", entry_point())]),
        "eth_sendUserOperation" => json!(inner.send_result),
        "eth_getUserOperationByHash" => {
            if inner.pending_lookups > 0 {
                inner.pending_lookups -= 1;
                Value::Null
            } else {
                match inner.transaction_hash {
                    Some(tx) => json!({
                        "userOpHash": request["params"][0],
                        "transactionHash": tx,
                        "blockNumber": "0x7",
                        "blockHash": H256::repeat_byte(0x0b),
                        "entryPoint": format!("{:?}", entry_point()),
                    }),
                    None => Value::Null,
                }
            }
        }
        other => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method {} not found", other) },
            }))
        }
    };
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result, "error": null }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Harness {
    pub node: Arc<FakeNode>,
    pub prover: Arc<FakeProver>,
    pub bundler: MockBundler,
    pub ctx: ShadowlingsContext,
}

pub async fn harness(valid_proofs: bool, poll: PollPolicy) -> Harness {
    let node = FakeNode::new();
    let prover = FakeProver::new(valid_proofs);
    let bundler = MockBundler::default();
    let url = bundler.spawn().await;
    let ctx = ShadowlingsContext::from_parts(
        node.clone(),
        invoker(),
        BundlerClient::new(url),
        prover.clone(),
        GasPolicy::default(),
        poll,
    )
    .await
    .unwrap();
    Harness {
        node,
        prover,
        bundler,
        ctx,
    }
}
