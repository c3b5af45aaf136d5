//! shadowlings
//!
//! Operator tooling for shadow accounts: derive and track shadows, register
//! their salt hashes, prepare recovery transfers and fund them on test
//! networks.

mod fund;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::{Address, U256};
use serde::Serialize;
use shadowlings_core::{
    commitment::salt_hash, BundlerClient, ChainNode, Commitment, EthersNode, FieldElement,
    RecoverRequest, RecoveryOrchestrator, RegisterRequest, Shadow, ShadowStore,
    ShadowlingsConfig, ShadowlingsContext,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "shadowlings=info,shadowlings_core=info";

#[derive(Parser)]
#[command(
    name = "shadowlings",
    about = "Private recovery for smart accounts through shadow addresses"
)]
struct Cli {
    /// Config file layered under SHADOWLINGS_* environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the commitment and shadow address for a salt.
    Address(SaltArgs),
    /// Print balances and registration state of a shadow as JSON.
    Info(SaltArgs),
    /// Publish a shadow's salt hash through a proof-authenticated operation.
    Register(SaltArgs),
    /// Prepare an owner transaction moving funds out of a shadow.
    Recover(RecoverArgs),
    /// Send ether or test tokens to a shadow and top up its EntryPoint deposit.
    Fund(fund::FundArgs),
    /// Query the relay.
    #[command(subcommand)]
    Relay(RelayCommand),
    /// Manage the local shadow list.
    #[command(subcommand)]
    Shadows(ShadowsCommand),
}

#[derive(Subcommand)]
enum RelayCommand {
    /// List the EntryPoints the relay accepts operations for.
    EntryPoints,
}

#[derive(Subcommand)]
enum ShadowsCommand {
    List(OwnerArgs),
    /// Track a new shadow. Draws a random salt unless one is given.
    Add {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long, value_parser = parse_field)]
        salt: Option<FieldElement>,
    },
    /// Stop tracking a shadow. On-chain state is untouched.
    Remove {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long, value_parser = parse_address)]
        address: Address,
    },
}

#[derive(Args, Clone)]
pub(crate) struct OwnerArgs {
    #[arg(long, value_parser = parse_address)]
    pub owner: Address,
    /// Entropy as text, hashed in as its UTF-8 bytes.
    #[arg(long, conflicts_with = "entropy_hex")]
    pub entropy: Option<String>,
    /// Entropy as raw hex bytes.
    #[arg(long)]
    pub entropy_hex: Option<String>,
}

impl OwnerArgs {
    pub fn entropy_bytes(&self) -> Result<Vec<u8>> {
        match (&self.entropy, &self.entropy_hex) {
            (Some(text), _) => Ok(text.as_bytes().to_vec()),
            (None, Some(raw)) => hex::decode(raw.trim_start_matches("0x"))
                .with_context(|| format!("invalid entropy hex '{}'", raw)),
            (None, None) => Ok(Vec::new()),
        }
    }
}

#[derive(Args, Clone)]
pub(crate) struct SaltArgs {
    #[command(flatten)]
    pub owner: OwnerArgs,
    #[arg(long, value_parser = parse_field)]
    pub salt: FieldElement,
}

#[derive(Args)]
struct RecoverArgs {
    #[command(flatten)]
    owner: OwnerArgs,
    /// Salt hash published at registration.
    #[arg(long, value_parser = parse_field)]
    salt_hash: FieldElement,
    /// Token to move. Ether when omitted.
    #[arg(long, value_parser = parse_address)]
    token: Option<Address>,
    #[arg(long, value_parser = parse_address)]
    to: Address,
    /// Amount in ether units, e.g. `0.5`.
    #[arg(long, value_parser = parse_amount)]
    amount: U256,
}

pub(crate) fn parse_address(s: &str) -> Result<Address, String> {
    s.parse()
        .map_err(|e| format!("invalid address '{}': {}", s, e))
}

pub(crate) fn parse_field(s: &str) -> Result<FieldElement, String> {
    FieldElement::parse_hex(s).map_err(|e| e.to_string())
}

pub(crate) fn parse_amount(s: &str) -> Result<U256, String> {
    ethers::utils::parse_ether(s).map_err(|e| format!("invalid amount '{}': {}", s, e))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The invoker address, asking the node for its chain id only when the
/// deployments manifest has to be consulted.
async fn resolve_invoker(config: &ShadowlingsConfig) -> Result<Address> {
    if let Some(invoker) = config.invoker {
        return Ok(invoker);
    }
    let node = EthersNode::connect(&config.rpc_url)?;
    let chain_id = node.chain_id().await.context("failed to read chain id")?;
    Ok(config.resolve_invoker(chain_id)?)
}

async fn open(config: &ShadowlingsConfig) -> Result<ShadowlingsContext> {
    let ctx = ShadowlingsContext::open(config)
        .await
        .context("failed to open context")?;
    let cancel = ctx.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    Ok(ctx)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressOutput {
    #[serde(flatten)]
    commitment: Commitment,
    shadow: Address,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so RUST_LOG can come from it
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ShadowlingsConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Address(args) => {
            let entropy = args.owner.entropy_bytes()?;
            let commitment = Commitment::derive(args.owner.owner, &entropy, args.salt)?;
            let invoker = resolve_invoker(&config).await?;
            let shadow = shadowlings_core::derive_shadow_address(commitment.commit, invoker)?;
            print_json(&AddressOutput { commitment, shadow })
        }
        Commands::Info(args) => {
            let entropy = args.owner.entropy_bytes()?;
            let ctx = open(&config).await?;
            let info = RecoveryOrchestrator::new(&ctx)
                .shadow_info(args.owner.owner, &entropy, args.salt)
                .await;
            ctx.close();
            print_json(&info?)
        }
        Commands::Register(args) => {
            let entropy = args.owner.entropy_bytes()?;
            let ctx = open(&config).await?;
            let outcome = RecoveryOrchestrator::new(&ctx)
                .register(RegisterRequest {
                    owner: args.owner.owner,
                    entropy,
                    salt: args.salt,
                })
                .await;
            ctx.close();
            print_json(&outcome.context("registration failed")?)
        }
        Commands::Recover(args) => {
            let entropy = args.owner.entropy_bytes()?;
            let ctx = open(&config).await?;
            let tx = RecoveryOrchestrator::new(&ctx)
                .recover(RecoverRequest {
                    owner: args.owner.owner,
                    entropy,
                    salt_hash: args.salt_hash,
                    token: args.token.unwrap_or_else(Address::zero),
                    to: args.to,
                    amount: args.amount,
                })
                .await;
            ctx.close();
            print_json(&tx.context("recovery failed")?)
        }
        Commands::Fund(args) => fund::run(&config, args).await,
        Commands::Relay(RelayCommand::EntryPoints) => {
            let bundler = BundlerClient::new(config.bundler_url.clone());
            let entry_points = bundler.supported_entry_points().await?;
            print_json(&entry_points)
        }
        Commands::Shadows(command) => shadows(&config, command).await,
    }
}

async fn shadows(config: &ShadowlingsConfig, command: ShadowsCommand) -> Result<()> {
    let store = ShadowStore::new(config.shadows_dir.clone());
    match command {
        ShadowsCommand::List(owner) => print_json(&store.list(owner.owner)?),
        ShadowsCommand::Add { owner, salt } => {
            let entropy = owner.entropy_bytes()?;
            let invoker = resolve_invoker(config).await?;
            let shadow = match salt {
                Some(salt) => {
                    let shadow = Shadow::with_salt(owner.owner, &entropy, salt, invoker)?;
                    store.add(owner.owner, shadow.clone())?;
                    shadow
                }
                None => store.create(owner.owner, &entropy, invoker)?,
            };
            info!(
                shadow = ?shadow.address,
                salt_hash = %salt_hash(shadow.salt),
                "tracking shadow"
            );
            print_json(&shadow)
        }
        ShadowsCommand::Remove { owner, address } => {
            if !store.list(owner.owner)?.iter().any(|s| s.address == address) {
                bail!("{:?} is not tracked for {:?}", address, owner.owner);
            }
            print_json(&store.remove(owner.owner, address)?)
        }
    }
}
