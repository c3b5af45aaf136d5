//! Proving service boundary.
//!
//! Proof generation happens out of process. The core only sends field-element
//! inputs, receives a Groth16 proof, and checks it locally before anything
//! built on it reaches the chain.

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use ethers::{abi::Token, types::U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{Result, ShadowError},
    field::FieldElement,
    groth16::{self, VerifyingKey},
};

/// Circuits the recovery scheme proves against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Circuit {
    Register,
    Recovery,
}

impl Circuit {
    pub fn name(&self) -> &'static str {
        match self {
            Circuit::Register => "register",
            Circuit::Recovery => "recovery",
        }
    }

    /// How many leading inputs the circuit exposes publicly. The rest are
    /// witness-only.
    pub fn public_input_count(&self) -> usize {
        match self {
            // commit, nullifier, executionHash, saltHash
            Circuit::Register => 4,
            // commit, owner, saltHash
            Circuit::Recovery => 3,
        }
    }

    /// The public prefix of `inputs`, which a proof for this circuit must
    /// commit to.
    pub fn public_inputs<'a>(&self, inputs: &'a [FieldElement]) -> &'a [FieldElement] {
        &inputs[..self.public_input_count().min(inputs.len())]
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A Groth16 proof with G2 coordinates in EVM order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub a: [U256; 2],
    pub b: [[U256; 2]; 2],
    pub c: [U256; 2],
}

impl Proof {
    /// `((uint256,uint256),(uint256[2],uint256[2]),(uint256,uint256))`, the
    /// struct form the invoker's recovery entry point takes.
    pub fn to_token(&self) -> Token {
        let pair = |w: &[U256; 2]| Token::Tuple(vec![Token::Uint(w[0]), Token::Uint(w[1])]);
        Token::Tuple(vec![
            pair(&self.a),
            Token::Tuple(vec![uint_array(&self.b[0]), uint_array(&self.b[1])]),
            pair(&self.c),
        ])
    }

    /// `(uint256[2],uint256[2][2],uint256[2])`, the array form carried in
    /// registration signatures. Same words as [`Proof::to_token`].
    pub fn to_array_token(&self) -> Token {
        Token::Tuple(vec![
            uint_array(&self.a),
            Token::FixedArray(vec![uint_array(&self.b[0]), uint_array(&self.b[1])]),
            uint_array(&self.c),
        ])
    }
}

fn uint_array(words: &[U256; 2]) -> Token {
    Token::FixedArray(vec![Token::Uint(words[0]), Token::Uint(words[1])])
}

/// A proof together with the public inputs the prover committed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedProof {
    pub proof: Proof,
    pub inputs: Vec<FieldElement>,
}

#[async_trait]
pub trait ProvingService: Send + Sync {
    /// Generate a proof for `circuit` from ordered inputs.
    async fn prove(&self, circuit: Circuit, inputs: &[FieldElement]) -> Result<GeneratedProof>;

    /// Verify a proof against the circuit's verifying key.
    async fn verify(&self, circuit: Circuit, proof: &GeneratedProof) -> Result<bool>;
}

#[derive(Serialize)]
struct ProveRequest<'a> {
    inputs: &'a [FieldElement],
}

/// Remote prover over HTTP with local verification.
///
/// Verifying keys are read from `<artifacts_dir>/<circuit>/verification.key`
/// on first use and cached for the life of the prover.
pub struct HttpProver {
    client: reqwest::Client,
    base_url: String,
    artifacts_dir: PathBuf,
    keys: Mutex<HashMap<Circuit, Arc<VerifyingKey>>>,
}

impl HttpProver {
    pub fn new(base_url: impl Into<String>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, artifacts_dir)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            artifacts_dir: artifacts_dir.into(),
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn verification_key_path(&self, circuit: Circuit) -> PathBuf {
        self.artifacts_dir.join(circuit.name()).join("verification.key")
    }

    fn cached_key(&self, circuit: Circuit) -> Result<Option<Arc<VerifyingKey>>> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| ShadowError::Proof("verifying key cache poisoned".into()))?;
        Ok(keys.get(&circuit).cloned())
    }

    async fn verifying_key(&self, circuit: Circuit) -> Result<Arc<VerifyingKey>> {
        if let Some(vk) = self.cached_key(circuit)? {
            return Ok(vk);
        }
        let path = self.verification_key_path(circuit);
        debug!(circuit = %circuit, path = %path.display(), "loading verifying key");
        let vk = tokio::task::spawn_blocking(move || VerifyingKey::load(&path))
            .await
            .map_err(|e| ShadowError::Proof(format!("verifying key task failed: {}", e)))??;
        let vk = Arc::new(vk);
        self.keys
            .lock()
            .map_err(|_| ShadowError::Proof("verifying key cache poisoned".into()))?
            .insert(circuit, vk.clone());
        Ok(vk)
    }
}

#[async_trait]
impl ProvingService for HttpProver {
    async fn prove(&self, circuit: Circuit, inputs: &[FieldElement]) -> Result<GeneratedProof> {
        let url = format!("{}/prove/{}", self.base_url, circuit);
        info!(circuit = %circuit, inputs = inputs.len(), "requesting proof");

        let response = self
            .client
            .post(&url)
            .json(&ProveRequest { inputs })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShadowError::Proof(format!(
                "prover returned {} for {}: {}",
                status, circuit, body
            )));
        }

        let generated: GeneratedProof = response.json().await?;
        debug!(circuit = %circuit, public_inputs = generated.inputs.len(), "proof received");
        Ok(generated)
    }

    async fn verify(&self, circuit: Circuit, proof: &GeneratedProof) -> Result<bool> {
        let vk = self.verifying_key(circuit).await?;
        let proof = proof.clone();
        // pairing check is CPU-bound
        tokio::task::spawn_blocking(move || groth16::verify(&vk, &proof.proof, &proof.inputs))
            .await
            .map_err(|e| ShadowError::Proof(format!("verification task failed: {}", e)))?
    }
}
