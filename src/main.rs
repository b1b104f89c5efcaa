use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};
use tracing::info;

use dex_coordinator::api;
use dex_coordinator::clock::SystemClock;
use dex_coordinator::config::{ChainId, Config};
use dex_coordinator::ledger::mock::MockLedgerAdapter;
use dex_coordinator::ledger::LedgerAdapter;
use dex_coordinator::network::NullPeerNetwork;
use dex_coordinator::node::Coordinator;
use dex_coordinator::signature::{MultisigWalletInfo, PublicKeyBytes};
use dex_coordinator::snapshot::SnapshotStore;

mod cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = cli::Cli::parse();
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(dispatch(cli.command))
}

async fn dispatch(command: cli::Command) -> anyhow::Result<()> {
    match command {
        cli::Command::Run { config, host, port } => run(&config, &host, port).await,
        cli::Command::Validate { config } => validate(&config),
        cli::Command::Snapshot { action } => match action {
            cli::SnapshotCommand::List { dir } => snapshot_list(&dir),
            cli::SnapshotCommand::Inspect { file } => snapshot_inspect(&file),
        },
        cli::Command::Api { config, host, port } => serve_api_only(&config, &host, port).await,
    }
}

fn validate(path: &PathBuf) -> anyhow::Result<()> {
    let config = Config::load(path)?;
    println!("config valid: base chain {}, quote chain {}", config.base_chain(), config.quote_chain());
    Ok(())
}

fn snapshot_list(dir: &PathBuf) -> anyhow::Result<()> {
    let mut entries: Vec<(u64, PathBuf)> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            let height: u64 = path.file_stem()?.to_str()?.strip_prefix("snapshot-")?.parse().ok()?;
            Some((height, path))
        })
        .collect();
    entries.sort_by_key(|(h, _)| std::cmp::Reverse(*h));
    for (height, path) in entries {
        println!("{height}\t{}", path.display());
    }
    Ok(())
}

fn snapshot_inspect(file: &PathBuf) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let snapshot: dex_coordinator::snapshot::OrderBookSnapshot = serde_json::from_str(&contents)?;
    println!("bids: {}", snapshot.order_book.bid_limit_orders.len());
    println!("asks: {}", snapshot.order_book.ask_limit_orders.len());
    for (chain, height) in &snapshot.chain_heights {
        println!("chain {chain}: height {height}");
    }
    Ok(())
}

async fn serve_api_only(config_path: &PathBuf, host: &str, port: u16) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let store = SnapshotStore::new(
        config.order_book_snapshot_file_path.clone(),
        config.order_book_snapshot_backup_dir_path.clone(),
        config.order_book_snapshot_backup_max_count,
    );
    let state = api::AppState::new(config);
    if let Some(snapshot) = store.load()? {
        let mut book = state.inner.book.write().await;
        book.set_snapshot(snapshot.order_book);
    }
    api::serve(host, port, state).await
}

/// Derives this node's signing key deterministically from its resolved
/// passphrase, turning a secret string into usable key material without
/// storing the key itself.
fn derive_signing_key(passphrase: &str) -> SigningKey {
    let digest = Sha256::digest(passphrase.as_bytes());
    SigningKey::from_bytes(&digest.into())
}

fn decode_hex(s: &str) -> anyhow::Result<PublicKeyBytes> {
    anyhow::ensure!(s.len() == 64, "public key hex must be 64 characters, got {}", s.len());
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).with_context(|| format!("invalid hex byte in {s}"))?;
    }
    Ok(out)
}

async fn run(config_path: &PathBuf, host: &str, port: u16) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    let mut adapters: HashMap<ChainId, Arc<dyn LedgerAdapter>> = HashMap::new();
    let mut wallets: HashMap<ChainId, MultisigWalletInfo> = HashMap::new();
    let mut member_addresses: HashMap<ChainId, HashMap<PublicKeyBytes, String>> = HashMap::new();

    for (chain_id, chain_config) in &config.chains {
        // No production ledger client is wired in; operators point
        // `moduleAlias` at a real adapter implementation for their chain.
        // Running against the in-memory mock keeps this binary runnable
        // standalone for demos and local testing.
        adapters.insert(chain_id.clone(), Arc::new(MockLedgerAdapter::new()));

        let mut members = std::collections::HashSet::new();
        let mut addresses = HashMap::new();
        for member in &chain_config.multisig_members {
            let public_key = decode_hex(&member.public_key_hex)?;
            members.insert(public_key);
            addresses.insert(public_key, member.address.clone());
        }
        wallets.insert(
            chain_id.clone(),
            MultisigWalletInfo {
                member_count: members.len(),
                members,
                required_signature_count: chain_config.required_signature_count,
            },
        );
        member_addresses.insert(chain_id.clone(), addresses);
    }

    let base_config = config.chain(config.base_chain());
    let own_passphrase = base_config.passphrase.resolve()?;
    let signing_key = derive_signing_key(&own_passphrase);
    let own_public_key = signing_key.verifying_key().to_bytes();
    let own_member_address = member_addresses
        .get(config.base_chain())
        .and_then(|m| m.get(&own_public_key))
        .cloned()
        .unwrap_or_else(|| {
            tracing::warn!("this node's public key is not in the base chain's member roster");
            "unknown-member".to_string()
        });

    let mut coordinator = Coordinator::new(
        config,
        adapters,
        wallets,
        member_addresses,
        signing_key,
        own_member_address,
        Arc::new(NullPeerNetwork),
        Arc::new(SystemClock),
    );
    coordinator.bootstrap().await?;

    let state = coordinator.state.clone();
    let api_host = host.to_string();
    let api_port = port;
    tokio::spawn(async move {
        if let Err(err) = api::serve(&api_host, api_port, state).await {
            tracing::error!(%err, "query API server exited");
        }
    });

    info!("coordinator starting");
    coordinator.run().await
}
