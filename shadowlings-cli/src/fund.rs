//! Test network funding for shadows.

use anyhow::{Context, Result};
use clap::Args;
use ethers::{
    prelude::*,
    types::{Address, TransactionRequest, U256},
    utils::parse_ether,
};
use serde::Serialize;
use shadowlings_core::{
    config::DEMO_TOKEN_DEPLOYMENT,
    contracts::{encode_deposit_to, encode_mint},
    Commitment, ShadowlingsConfig, ShadowlingsContext,
};
use tracing::{debug, info};

use crate::{parse_address, parse_amount, SaltArgs};

/// Deposits below this are topped up.
const MIN_DEPOSIT_ETHER: u64 = 1;
const DEPOSIT_TOP_UP_ETHER: u64 = 10;

#[derive(Args)]
pub(crate) struct FundArgs {
    #[command(flatten)]
    shadow: SaltArgs,
    /// Amount in ether units.
    #[arg(long, value_parser = parse_amount, default_value = "1")]
    amount: U256,
    /// Mint this test token instead of sending ether.
    #[arg(long, value_parser = parse_address)]
    token: Option<Address>,
    /// Also send ether and mint the deployed demo token.
    #[arg(long)]
    pub(crate) demo: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Transfer {
    /// Zero for ether.
    token: Address,
    transaction: H256,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FundOutput {
    shadow: Address,
    transfers: Vec<Transfer>,
    deposit_top_up: Option<H256>,
}

/// Tokens to fund in order, zero standing for ether. Demo funding adds ether
/// and the demo token after the requested one, without repeats.
fn funding_tokens(token: Option<Address>, demo_token: Option<Address>) -> Vec<Address> {
    let mut tokens = vec![token.unwrap_or_else(Address::zero)];
    if let Some(demo_token) = demo_token {
        for extra in [Address::zero(), demo_token] {
            if !tokens.contains(&extra) {
                tokens.push(extra);
            }
        }
    }
    tokens
}

type Funder = SignerMiddleware<Provider<Http>, LocalWallet>;

async fn send(client: &Funder, tx: TransactionRequest) -> Result<H256> {
    let pending = client.send_transaction(tx, None).await?;
    let hash = pending.tx_hash();
    debug!(tx = ?hash, "transaction submitted");
    let receipt = pending
        .await?
        .with_context(|| format!("transaction {:?} was dropped", hash))?;
    if receipt.status != Some(1u64.into()) {
        anyhow::bail!("transaction {:?} reverted", hash);
    }
    Ok(hash)
}

pub(crate) async fn run(config: &ShadowlingsConfig, args: FundArgs) -> Result<()> {
    let key = config
        .funder_key
        .as_deref()
        .context("SHADOWLINGS_FUNDER_KEY is not set")?;

    let ctx = crate::open(config).await?;
    let result = fund(&ctx, config, key, args).await;
    ctx.close();
    crate::print_json(&result?)
}

async fn fund(
    ctx: &ShadowlingsContext,
    config: &ShadowlingsConfig,
    key: &str,
    args: FundArgs,
) -> Result<FundOutput> {
    let entropy = args.shadow.owner.entropy_bytes()?;
    let commitment = Commitment::derive(args.shadow.owner.owner, &entropy, args.shadow.salt)?;
    let shadow =
        shadowlings_core::derive_shadow_address(commitment.commit, ctx.invoker().address())?;

    let demo_token = if args.demo {
        let token = config
            .deployment(ctx.chain_id(), DEMO_TOKEN_DEPLOYMENT)
            .context("demo funding needs the deployed test token")?;
        Some(token)
    } else {
        None
    };

    let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
        .context("failed to create HTTP provider")?;
    let wallet = key
        .parse::<LocalWallet>()
        .context("invalid funder key")?
        .with_chain_id(ctx.chain_id());
    let client = SignerMiddleware::new(provider, wallet);

    let mut transfers = Vec::new();
    for token in funding_tokens(args.token, demo_token) {
        let transaction = if token == Address::zero() {
            info!(shadow = ?shadow, amount = %args.amount, "sending ether");
            send(&client, TransactionRequest::new().to(shadow).value(args.amount)).await?
        } else {
            info!(shadow = ?shadow, token = ?token, amount = %args.amount, "minting tokens");
            let tx = TransactionRequest::new()
                .to(token)
                .data(encode_mint(shadow, args.amount));
            send(&client, tx).await?
        };
        transfers.push(Transfer { token, transaction });
    }

    let deposit = ctx.entry_point().balance_of(shadow).await?;
    let deposit_top_up = if deposit < parse_ether(MIN_DEPOSIT_ETHER)? {
        let top_up = parse_ether(DEPOSIT_TOP_UP_ETHER)?;
        info!(shadow = ?shadow, deposit = %deposit, "topping up EntryPoint deposit");
        let tx = TransactionRequest::new()
            .to(ctx.entry_point().address())
            .data(encode_deposit_to(shadow))
            .value(top_up);
        Some(send(&client, tx).await?)
    } else {
        None
    };

    Ok(FundOutput {
        shadow,
        transfers,
        deposit_top_up,
    })
}
