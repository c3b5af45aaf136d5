//! Runtime configuration.
//!
//! Values come from an optional config file layered under `SHADOWLINGS_*`
//! environment variables. Nested keys use `__`, e.g.
//! `SHADOWLINGS_POLL__TIMEOUT_MS=30000`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use config::{Config, Environment, File};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Result, ShadowError},
    poll::PollPolicy,
    userop::GasPolicy,
};

pub const ENV_PREFIX: &str = "SHADOWLINGS";

/// Name of the invoker contract in deployment manifests.
pub const INVOKER_DEPLOYMENT: &str = "Shadowlings";
/// Test token minted to shadows by demo funding.
pub const DEMO_TOKEN_DEPLOYMENT: &str = "ShadowToken";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowlingsConfig {
    pub rpc_url: String,
    pub bundler_url: String,
    pub prover_url: String,
    pub artifacts_dir: PathBuf,
    /// Invoker address. Falls back to the deployments manifest when unset.
    pub invoker: Option<Address>,
    pub deployments_path: Option<PathBuf>,
    pub shadows_dir: PathBuf,
    pub gas: GasPolicy,
    pub poll: PollPolicy,
    /// Hex private key used to fund shadows. Never logged.
    #[serde(skip_serializing)]
    pub funder_key: Option<String>,
}

impl Default for ShadowlingsConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            bundler_url: "http://localhost:3000/rpc".to_string(),
            prover_url: "http://localhost:8080".to_string(),
            artifacts_dir: PathBuf::from("circuits"),
            invoker: None,
            deployments_path: None,
            shadows_dir: PathBuf::from(".shadowlings"),
            gas: GasPolicy::default(),
            poll: PollPolicy::default(),
            funder_key: None,
        }
    }
}

impl ShadowlingsConfig {
    /// Load from an optional file plus the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with_env(file, None)
    }

    /// Like [`ShadowlingsConfig::load`] with an explicit environment map in
    /// place of the process environment.
    pub fn load_with_env(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );
        let config: Self = builder.build()?.try_deserialize()?;
        debug!(
            rpc_url = %config.rpc_url,
            bundler_url = %config.bundler_url,
            prover_url = %config.prover_url,
            "configuration loaded"
        );
        Ok(config)
    }

    /// The invoker for `chain_id`: the configured address, else the
    /// deployments manifest entry.
    pub fn resolve_invoker(&self, chain_id: u64) -> Result<Address> {
        if let Some(invoker) = self.invoker {
            return Ok(invoker);
        }
        if self.deployments_path.is_none() {
            return Err(ShadowError::validation(
                "no invoker address configured and no deployments file set",
            ));
        }
        self.deployment(chain_id, INVOKER_DEPLOYMENT)
    }

    /// Address of contract `name` on `chain_id` from the deployments manifest.
    pub fn deployment(&self, chain_id: u64, name: &str) -> Result<Address> {
        let path = self
            .deployments_path
            .as_deref()
            .ok_or_else(|| ShadowError::validation("no deployments file set"))?;
        Deployments::load(path)?.get(chain_id, name).ok_or_else(|| {
            ShadowError::validation(format!(
                "{} has no {} deployment for chain {}",
                path.display(),
                name,
                chain_id
            ))
        })
    }
}

/// Contract addresses per chain id, `{ "<chainId>": { "<name>": "0x.." } }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deployments(HashMap<String, HashMap<String, Address>>);

impl Deployments {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn get(&self, chain_id: u64, name: &str) -> Option<Address> {
        self.0.get(&chain_id.to_string())?.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = ShadowlingsConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config, ShadowlingsConfig::default());
        assert_eq!(config.bundler_url, "http://localhost:3000/rpc");
        assert_eq!(config.gas.max_fee_per_gas, 20_000_000_000);
    }

    #[test]
    fn test_env_overrides_nested() {
        let config = ShadowlingsConfig::load_with_env(
            None,
            env(&[
                ("SHADOWLINGS_RPC_URL", "http://node:8545"),
                ("SHADOWLINGS_POLL__TIMEOUT_MS", "30000"),
                ("SHADOWLINGS_GAS__CALL_GAS_LIMIT", "250000"),
                ("SHADOWLINGS_INVOKER", "0xa82B48085abF81e6Cbe3Aa9D9e33B43b43977adD"),
            ]),
        )
        .unwrap();
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.poll.timeout, Duration::from_secs(30));
        assert_eq!(config.poll.initial_delay, Duration::from_millis(250));
        assert_eq!(config.gas.call_gas_limit, 250_000);
        assert_eq!(config.gas.verification_gas_limit, 500_000);
        assert_eq!(config.resolve_invoker(1).unwrap(), config.invoker.unwrap());
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadowlings.toml");
        std::fs::write(
            &path,
            "prover_url = \"http://prover:9000\"\nshadows_dir = \"/tmp/shadows\"\n",
        )
        .unwrap();
        let config = ShadowlingsConfig::load_with_env(
            Some(&path),
            env(&[("SHADOWLINGS_PROVER_URL", "http://override:1")]),
        )
        .unwrap();
        assert_eq!(config.prover_url, "http://override:1");
        assert_eq!(config.shadows_dir, PathBuf::from("/tmp/shadows"));
    }

    #[test]
    fn test_gas_policy_from_file_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadowlings.toml");
        std::fs::write(
            &path,
            "[gas]\nmax_fee_per_gas = 50000000000\nverification_gas_limit = 750000\n",
        )
        .unwrap();
        let config = ShadowlingsConfig::load_with_env(
            Some(&path),
            env(&[("SHADOWLINGS_GAS__MAX_PRIORITY_FEE_PER_GAS", "2000000000")]),
        )
        .unwrap();
        assert_eq!(config.gas.max_fee_per_gas, 50_000_000_000);
        assert_eq!(config.gas.verification_gas_limit, 750_000);
        assert_eq!(config.gas.max_priority_fee_per_gas, 2_000_000_000);
        assert_eq!(config.gas.call_gas_limit, 100_000);
    }

    #[test]
    fn test_invoker_from_deployments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.json");
        std::fs::write(
            &path,
            r#"{"1337": {"Shadowlings": "0xa82B48085abF81e6Cbe3Aa9D9e33B43b43977adD", "ShadowToken": "0x1111111111111111111111111111111111111111"}}"#,
        )
        .unwrap();
        let config = ShadowlingsConfig {
            deployments_path: Some(path),
            ..ShadowlingsConfig::default()
        };
        assert_eq!(
            config.resolve_invoker(1337).unwrap(),
            "0xa82B48085abF81e6Cbe3Aa9D9e33B43b43977adD".parse::<Address>().unwrap()
        );
        assert!(matches!(
            config.resolve_invoker(1),
            Err(ShadowError::Validation(_))
        ));
        assert_eq!(
            config.deployment(1337, DEMO_TOKEN_DEPLOYMENT).unwrap(),
            Address::repeat_byte(0x11)
        );
        assert!(config.deployment(1337, "Missing").is_err());
    }

    #[test]
    fn test_missing_invoker_is_validation_error() {
        assert!(matches!(
            ShadowlingsConfig::default().resolve_invoker(1337),
            Err(ShadowError::Validation(_))
        ));
    }
}
