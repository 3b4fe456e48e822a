//! LockID Node - platform configuration and local funding simulation

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lockid_consensus::config::WaitMode;
use lockid_consensus::*;
use lockid_core::{Duffs, IdentityId, KeyPair, KeyType};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lockid-node")]
#[command(about = "LockID Node - asset-lock funded identities and credits")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Configuration directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Generate blocks instead of polling while waiting for confirmations
        #[arg(long)]
        regtest: bool,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Register, spend and top up an identity against an in-memory chain
    Simulate {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Duffs locked by each funding transaction
        #[arg(long, default_value = "1")]
        duffs: Duffs,

        /// Seconds between blocks mined in the background in poll mode
        #[arg(long, default_value = "30")]
        block_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Init {
            data_dir,
            regtest,
            force,
        } => init_config(data_dir, regtest, force),

        Commands::Config { config } => {
            let config = load_config(config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }

        Commands::Simulate {
            config,
            duffs,
            block_interval,
        } => {
            let config = load_config(config)?;
            if duffs == 0 {
                bail!("--duffs must lock at least one duff");
            }
            if block_interval == 0 {
                bail!("--block-interval cannot be zero");
            }

            tokio::select! {
                result = simulate(config, duffs, Duration::from_secs(block_interval)) => result,
                _ = signal::ctrl_c() => {
                    info!("Interrupted, abandoning simulation");
                    Ok(())
                }
            }
        }
    }
}

fn init_config(data_dir: Option<PathBuf>, regtest: bool, force: bool) -> Result<()> {
    let data_dir = data_dir.unwrap_or_else(PlatformConfig::default_config_dir);
    let config_path = data_dir.join("config.toml");
    if config_path.exists() && !force {
        bail!(
            "Configuration already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let mut config = PlatformConfig::default();
    if regtest {
        config.confirmation.mode = WaitMode::Generate;
    }
    config.save_to_file(&config_path)?;

    info!("Configuration written to {}", config_path.display());
    Ok(())
}

/// Read the configuration file if present, then apply environment overrides
fn load_config(path: Option<PathBuf>) -> Result<PlatformConfig> {
    let path = path.unwrap_or_else(PlatformConfig::default_config_path);
    let mut config = if path.exists() {
        PlatformConfig::load_from_file(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        info!("No configuration at {}, using defaults", path.display());
        PlatformConfig::default()
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn simulate(config: PlatformConfig, duffs: Duffs, block_interval: Duration) -> Result<()> {
    let chain = Arc::new(MemoryChain::new());
    let platform = Arc::new(Platform::new(chain.clone(), &config));
    let client = PlatformClient::new(chain.clone(), platform.clone(), &config);

    let miner = match config.confirmation.mode {
        WaitMode::Poll => {
            info!("Mining a block every {:?}", block_interval);
            Some(spawn_miner(chain.clone(), block_interval))
        }
        WaitMode::Generate => None,
    };

    let key = KeyPair::generate(KeyType::EcdsaSecp256k1)?;
    let funding = chain.fund_asset_lock(duffs, &key.public_key_hash());
    let identity = client.register_identity(&funding, &[key.clone()]).await?;

    write_note(&client, &chain, &identity.id, &key, duffs).await?;

    let identity = platform
        .get_identity(&identity.id)
        .context("Registered identity disappeared from the ledger")?;
    println!("{}", serde_json::to_string_pretty(&identity.to_json()?)?);

    if let Some(miner) = miner {
        miner.abort();
    }
    Ok(())
}

/// Write one document, topping the owner up once if the balance falls short
async fn write_note(
    client: &PlatformClient,
    chain: &MemoryChain,
    owner_id: &IdentityId,
    key: &KeyPair,
    duffs: Duffs,
) -> Result<()> {
    let note = DocumentOperation::create(
        "notes",
        "note",
        owner_id,
        &rand::random::<[u8; 32]>(),
        json!({ "message": "hello" }),
    );

    match client
        .broadcast_documents(owner_id, vec![note.clone()], key, 0)
        .await
    {
        Ok(revision) => {
            info!("Document {} written at revision {}", note.key(), revision);
            return Ok(());
        }
        Err(e)
            if matches!(
                e.transition_error(),
                Some(TransitionError::InsufficientCredits { .. })
            ) =>
        {
            if let Some(rejection) = e.transition_error() {
                warn!("{}", rejection.to_wire().message);
            }
        }
        Err(e) => return Err(e.into()),
    }

    let funding = chain.fund_asset_lock(duffs, &key.public_key_hash());
    let balance = client.top_up_identity(owner_id, &funding, key, 0).await?;
    info!("Balance after top-up: {} credits", balance);

    let revision = client
        .broadcast_documents(owner_id, vec![note.clone()], key, 0)
        .await?;
    info!("Document {} written at revision {}", note.key(), revision);
    Ok(())
}

fn spawn_miner(chain: Arc<MemoryChain>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = chain.mine(1, "lockid-node-miner") {
                warn!("Background mining failed: {}", e);
            }
        }
    })
}
