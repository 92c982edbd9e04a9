//! RFQ action CLI: list RFQs, create one, decide on quotes, and send the
//! escrow vault transactions of the settlement flow. Also manages the
//! validators and linked payout wallets an RFQ is created from.
//!
//! Usage:
//!   rfq-action list [--status <status>]...
//!   rfq-action create [--wallet <wallet_id>] <validator_index>... [--yes]
//!   rfq-action validators
//!   rfq-action wallets
//!   rfq-action wallet-add <name> <address> [--yes]
//!   rfq-action wallet-remove <wallet_id> [--yes]
//!   rfq-action account
//!   rfq-action accept <rfq_id> [quote_id] [--yes]
//!   rfq-action reject <rfq_id> [quote_id] [--yes]
//!   rfq-action deposit <rfq_id> <amount_eth> [--yes]
//!   rfq-action accept-exit <rfq_id> [--yes]
//!   rfq-action collect-rewards <rfq_id> [--yes]
//!
//! Every action asks for confirmation unless `--yes` is given.

use anyhow::{bail, Context, Result};
use alloy::primitives::utils::{format_ether, parse_ether};
use alloy::primitives::Address;
use rfq_monitor::actionable::pending_action;
use rfq_monitor::auth::ApiCredentials;
use rfq_monitor::config::Config;
use rfq_monitor::lifecycle::{LifecyclePoller, PollOutcome};
use rfq_monitor::onchain::{AlloyWallet, Wallet};
use rfq_monitor::rfq::display::{
    best_quote_summary, escrow_summary, estimated_exit_date, settlement_lines, validator_list,
    Explorer,
};
use rfq_monitor::rfq::{RfqDocument, RfqStatus, StatusFilter};
use rfq_monitor::settlement::{
    Confirmed, OnChainAction, QuoteAction, SettlementCoordinator, SettlementError,
};
use rfq_monitor::store::{AddLinkedWalletRequest, CreateRfqRequest, LinkedWallet, MarketplaceClient};
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const USAGE: &str = "\
Usage:
  rfq-action list [--status <status>]...
  rfq-action create [--wallet <wallet_id>] <validator_index>... [--yes]
  rfq-action validators
  rfq-action wallets
  rfq-action wallet-add <name> <address> [--yes]
  rfq-action wallet-remove <wallet_id> [--yes]
  rfq-action account
  rfq-action accept <rfq_id> [quote_id] [--yes]
  rfq-action reject <rfq_id> [quote_id] [--yes]
  rfq-action deposit <rfq_id> <amount_eth> [--yes]
  rfq-action accept-exit <rfq_id> [--yes]
  rfq-action collect-rewards <rfq_id> [--yes]";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let assume_yes = args.iter().any(|a| a == "--yes" || a == "-y");
    let positional: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| *a != "--yes" && *a != "-y")
        .collect();

    let Some((&command, rest)) = positional.split_first() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    let config_path = Path::new("rfq-monitor.toml");
    let config = if config_path.exists() {
        Config::load(config_path).context("loading rfq-monitor.toml")?
    } else {
        Config::from_env()?
    };

    // Quiet by default; the CLI talks on stdout.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    config.require_credentials()?;
    let creds = ApiCredentials::from_config(
        &config.marketplace.api_key,
        &config.marketplace.private_key,
    )
    .context("marketplace credentials missing")?;
    let client = Arc::new(MarketplaceClient::new(
        config.marketplace.api_url(),
        creds,
        Duration::from_secs(config.marketplace.request_timeout_secs),
    )?);
    let explorer = Explorer::new(config.marketplace.server);

    match command {
        "list" => list(&client, &explorer, rest).await,
        "create" => create(&client, rest, assume_yes).await,
        "validators" => validators(&client, &explorer).await,
        "wallets" => wallets(&client, &explorer).await,
        "wallet-add" => wallet_add(&client, rest, assume_yes).await,
        "wallet-remove" => wallet_remove(&client, rest, assume_yes).await,
        "account" => account(&client, &explorer).await,
        "accept" | "reject" | "deposit" | "accept-exit" | "collect-rewards" => {
            act(&config, client, &explorer, command, rest, assume_yes).await
        }
        other => {
            eprintln!("Unknown command '{other}'\n\n{USAGE}");
            std::process::exit(1);
        }
    }
}

fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn print_document(explorer: &Explorer, doc: &RfqDocument) {
    println!("RFQ {}  [{}]", doc.id, doc.status);
    println!("  Validators:      {}", validator_list(doc));
    println!("  Total balance:   {}", doc.total_balance);
    println!("  Best quote:      {}", best_quote_summary(doc));
    println!("  Escrow vault:    {}", escrow_summary(doc));
    println!("  Estimated exit:  {}", estimated_exit_date(doc));
    if let Some(action) = pending_action(doc) {
        println!("  Needs action:    {action:?}");
    }
    for line in settlement_lines(explorer, doc) {
        println!("    {line}");
    }
}

async fn list(client: &MarketplaceClient, explorer: &Explorer, rest: &[&str]) -> Result<()> {
    let mut statuses = Vec::new();
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--status" => {
                let value = iter.next().context("--status needs a value")?;
                statuses.push(value.parse::<RfqStatus>()?);
            }
            other => bail!("unexpected argument '{other}'"),
        }
    }

    // A single status is filtered upstream; several are filtered here.
    let upstream = match statuses.as_slice() {
        [only] => Some(*only),
        _ => None,
    };
    let filter = if statuses.is_empty() {
        StatusFilter::default()
    } else {
        StatusFilter::only(statuses)
    };

    let snapshot = client.fetch_documents_with_status(upstream).await?;
    let shown = filter.apply(&snapshot);
    if shown.is_empty() {
        println!("No RFQs found.");
        return Ok(());
    }
    for doc in shown {
        print_document(explorer, doc);
        println!();
    }
    Ok(())
}

/// `[--wallet <id>] <index>...`
fn parse_create_args(rest: &[&str]) -> Result<(Option<String>, Vec<u64>)> {
    let mut wallet = None;
    let mut validator_indices = Vec::new();
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--wallet" => {
                let value = iter.next().context("--wallet needs a wallet id")?;
                wallet = Some(value.to_string());
            }
            index => validator_indices.push(
                index
                    .parse::<u64>()
                    .with_context(|| format!("invalid validator index '{index}'"))?,
            ),
        }
    }
    if validator_indices.is_empty() {
        bail!("create needs at least one validator index");
    }
    Ok((wallet, validator_indices))
}

/// An explicit wallet must be linked; otherwise the only linked wallet is used.
fn choose_payment_wallet(explicit: Option<String>, linked: &[LinkedWallet]) -> Result<String> {
    if let Some(id) = explicit {
        if !linked.iter().any(|w| w.id == id) {
            bail!("wallet {id} is not linked to this account");
        }
        return Ok(id);
    }
    match linked {
        [] => bail!("no linked wallets; add one with `rfq-action wallet-add <name> <address>`"),
        [only] => Ok(only.id.clone()),
        several => {
            let ids: Vec<&str> = several.iter().map(|w| w.id.as_str()).collect();
            bail!("several linked wallets, pick one with --wallet: {}", ids.join(", "))
        }
    }
}

fn wallet_label(wallet: &LinkedWallet) -> String {
    match wallet.wallet_name.as_deref() {
        Some(name) if !name.is_empty() => format!("{name} ({})", wallet.wallet_address),
        _ => wallet.wallet_address.clone(),
    }
}

async fn create(client: &MarketplaceClient, rest: &[&str], assume_yes: bool) -> Result<()> {
    let (explicit_wallet, validator_indices) = parse_create_args(rest)?;
    let linked = client.list_wallets().await.context("listing linked wallets")?;
    let payment_wallet_id = choose_payment_wallet(explicit_wallet, &linked)?;
    let payee = linked
        .iter()
        .find(|w| w.id == payment_wallet_id)
        .map(wallet_label)
        .unwrap_or_else(|| payment_wallet_id.clone());

    let prompt = format!("Create an RFQ for validators {validator_indices:?} paying into {payee}?");
    if !confirm(&prompt, assume_yes)? {
        println!("Aborted.");
        return Ok(());
    }

    let doc = client
        .create_rfq(&CreateRfqRequest {
            validator_indices,
            payment_wallet_id,
        })
        .await?;
    println!("Created RFQ {} [{}]", doc.id, doc.status);
    Ok(())
}

async fn validators(client: &MarketplaceClient, explorer: &Explorer) -> Result<()> {
    let mut validators = client.list_validators().await?;
    if validators.is_empty() {
        println!("No validators found.");
        return Ok(());
    }
    // Active first, then by index.
    validators.sort_by_key(|v| (!v.is_active(), v.validator_index));
    for v in &validators {
        let index = v
            .validator_index
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string());
        let balance = v
            .balance_eth()
            .map(|b| format!("{:.5} ETH", b))
            .unwrap_or_else(|| "-".to_string());
        let exit = v
            .estimated_exit_time()
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "{index:>8}  {:<12} {balance:>16}  exit {exit}",
            v.status.as_deref().unwrap_or("unknown")
        );
        if let Some(i) = v.validator_index {
            println!("          {}", explorer.validator_url(i));
        }
    }
    Ok(())
}

async fn wallets(client: &MarketplaceClient, explorer: &Explorer) -> Result<()> {
    let wallets = client.list_wallets().await?;
    if wallets.is_empty() {
        println!("No linked wallets.");
        return Ok(());
    }
    for w in &wallets {
        println!("{}  {}", w.id, wallet_label(w));
        println!("    {}", explorer.address_url(&w.wallet_address));
    }
    Ok(())
}

async fn wallet_add(client: &MarketplaceClient, rest: &[&str], assume_yes: bool) -> Result<()> {
    let [name, address] = rest else {
        bail!("wallet-add needs <name> <address>");
    };
    let address = Address::from_str(address).with_context(|| format!("invalid address '{address}'"))?;

    let prompt = format!("Link wallet {name} ({address}) for ETH payouts?");
    if !confirm(&prompt, assume_yes)? {
        println!("Aborted.");
        return Ok(());
    }
    client
        .register_wallet(&AddLinkedWalletRequest::eth(*name, address.to_string()))
        .await?;
    println!("Wallet {address} linked.");
    Ok(())
}

async fn wallet_remove(client: &MarketplaceClient, rest: &[&str], assume_yes: bool) -> Result<()> {
    let wallet_id = rest.first().context("wallet-remove needs a wallet id")?;
    if !confirm(&format!("Remove linked wallet {wallet_id}?"), assume_yes)? {
        println!("Aborted.");
        return Ok(());
    }
    client.remove_wallet(wallet_id).await?;
    println!("Wallet {wallet_id} removed.");
    Ok(())
}

async fn account(client: &MarketplaceClient, explorer: &Explorer) -> Result<()> {
    let account = client.account().await?;
    match account.contract_address() {
        Some(address) => {
            println!("Contract: {address}");
            println!("  {}", explorer.address_url(address));
        }
        None => println!("No smart contract on this account yet."),
    }
    Ok(())
}

async fn act(
    config: &Config,
    client: Arc<MarketplaceClient>,
    explorer: &Explorer,
    command: &str,
    rest: &[&str],
    assume_yes: bool,
) -> Result<()> {
    let rfq_id = rest.first().context("missing rfq_id")?.to_string();

    // One poll gives the coordinator a snapshot to resolve vaults against.
    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let poller = LifecyclePoller::new(client.clone(), config.poller.interval(), event_tx);
    if let PollOutcome::Failed(e) = poller.poll_once().await {
        return Err(e).context("fetching RFQs");
    }
    let snapshot = poller.snapshot();
    let doc = snapshot
        .get(&rfq_id)
        .with_context(|| format!("RFQ {rfq_id} not found"))?;
    print_document(explorer, doc);
    println!();

    let wallet: Option<Arc<dyn Wallet>> = if config.chain.has_wallet() {
        let wallet = AlloyWallet::connect(
            &config.chain.rpc_url,
            &config.chain.wallet_key,
            config.chain.receipt_poll_interval(),
        )?;
        println!("Wallet: {}", wallet.address());
        Some(Arc::new(wallet))
    } else {
        None
    };

    let coordinator = SettlementCoordinator::new(
        client,
        wallet,
        poller.subscribe(),
        poller.refresh_handle(),
        config.chain.receipt_timeout(),
    );

    let result = match command {
        "accept" | "reject" => {
            let quote_id = match rest.get(1) {
                Some(q) => q.to_string(),
                None => doc
                    .quote_id()
                    .with_context(|| format!("RFQ {rfq_id} has no quote"))?
                    .to_string(),
            };
            let prompt = format!("{command} quote {quote_id} for RFQ {rfq_id}?");
            if !confirm(&prompt, assume_yes)? {
                println!("Aborted.");
                return Ok(());
            }
            let action = Confirmed::by_user(QuoteAction::new(&rfq_id, quote_id));
            let applied = if command == "accept" {
                coordinator.accept_quote(action).await
            } else {
                coordinator.reject_quote(action).await
            };
            applied.map(|()| println!("Quote decision applied."))
        }
        _ => {
            let action = match command {
                "deposit" => {
                    let raw = rest.get(1).context("deposit needs an amount in ETH")?;
                    let amount = parse_ether(raw).with_context(|| format!("invalid amount '{raw}'"))?;
                    OnChainAction::Deposit {
                        rfq_id: rfq_id.clone(),
                        amount,
                    }
                }
                "accept-exit" => OnChainAction::AcceptExit {
                    rfq_id: rfq_id.clone(),
                },
                _ => OnChainAction::CollectRewards {
                    rfq_id: rfq_id.clone(),
                },
            };
            let prompt = match &action {
                OnChainAction::Deposit { amount, .. } => {
                    format!("Send {action} with {} ETH?", format_ether(*amount))
                }
                _ => format!("Send {action}?"),
            };
            if !confirm(&prompt, assume_yes)? {
                println!("Aborted.");
                return Ok(());
            }
            coordinator
                .submit_on_chain_action(Confirmed::by_user(action))
                .await
                .map(|intent| {
                    let hash = intent.tx_hash.map(|h| h.to_string()).unwrap_or_default();
                    println!("Transaction {}: {}", intent.state, explorer.tx_url(&hash));
                })
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancellation() => {
            println!("{}", e.user_message());
            Ok(())
        }
        Err(e @ SettlementError::EstimationFailure(_)) => bail!("{}", e.user_message()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked(id: &str) -> LinkedWallet {
        LinkedWallet {
            id: id.to_string(),
            wallet_name: None,
            wallet_address: format!("0x{id}"),
        }
    }

    #[test]
    fn test_parse_create_args() {
        let (wallet, indices) = parse_create_args(&["--wallet", "w1", "7", "9"]).unwrap();
        assert_eq!(wallet.as_deref(), Some("w1"));
        assert_eq!(indices, vec![7, 9]);

        let (wallet, indices) = parse_create_args(&["3"]).unwrap();
        assert_eq!(wallet, None);
        assert_eq!(indices, vec![3]);

        assert!(parse_create_args(&["--wallet", "w1"]).is_err());
        assert!(parse_create_args(&["7", "--wallet"]).is_err());
        assert!(parse_create_args(&["seven"]).is_err());
    }

    #[test]
    fn test_choose_payment_wallet() {
        let one = [linked("w1")];
        let two = [linked("w1"), linked("w2")];

        assert_eq!(choose_payment_wallet(None, &one).unwrap(), "w1");
        assert_eq!(choose_payment_wallet(Some("w2".into()), &two).unwrap(), "w2");

        let err = choose_payment_wallet(None, &two).unwrap_err().to_string();
        assert!(err.contains("w1, w2"), "{err}");
        assert!(choose_payment_wallet(None, &[]).is_err());
        assert!(choose_payment_wallet(Some("w9".into()), &two).is_err());
    }

    #[test]
    fn test_wallet_label() {
        let mut w = linked("w1");
        assert_eq!(wallet_label(&w), "0xw1");
        w.wallet_name = Some("cold".into());
        assert_eq!(wallet_label(&w), "cold (0xw1)");
    }
}
