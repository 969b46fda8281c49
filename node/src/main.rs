use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use meridian_consensus::types::{Block, Name};
use meridian_node::logging::{init_logging, LogConfig};
use meridian_node::{devnet, Chain, NodeConfig};
use primitive_types::U256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.toml";
const BLOCKS_FILE: &str = "blocks.json";

#[derive(Parser)]
#[command(name = "meridian")]
#[command(about = "Meridian development node")]
struct Cli {
    /// Configuration file path (defaults to <data-dir>/config.toml, then the devnet preset)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, value_name = "DIR", default_value = ".meridian")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a devnet configuration and print the genesis block
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Produce blocks of dev-account transfers
    Devnet {
        /// Number of blocks to produce
        #[arg(long, default_value_t = 10)]
        blocks: u64,

        /// Delay between blocks in milliseconds
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,
    },

    /// Import blocks from a JSON file on top of genesis
    Replay {
        /// Blocks file (defaults to <data-dir>/blocks.json)
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a new keypair for signing
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Keygen = cli.command {
        generate_keypair();
        return Ok(());
    }

    let config = load_config(&cli)?;
    let log_config = config.logging.to_log_config().with_env_overrides();
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: Failed to initialize structured logging: {}", e);
    }

    match cli.command {
        Commands::Init { force } => init_chain(&config, &cli.data_dir, force),
        Commands::Devnet {
            blocks,
            interval_ms,
        } => run_devnet(&config, &cli.data_dir, blocks, interval_ms).await,
        Commands::Replay { file } => {
            let file = file.unwrap_or_else(|| cli.data_dir.join(BLOCKS_FILE));
            replay(&config, &file)
        }
        Commands::Keygen => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    if let Some(path) = &cli.config {
        return NodeConfig::from_file(path);
    }
    let default_path = cli.data_dir.join(CONFIG_FILE);
    if default_path.exists() {
        NodeConfig::from_file(&default_path)
    } else {
        Ok(NodeConfig::devnet())
    }
}

fn init_chain(config: &NodeConfig, data_dir: &Path, force: bool) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    config.validate()?;
    config.save(&path)?;

    let chain = Chain::new(config)?;
    let genesis = chain.head();
    let fork = chain.fork_status()?;

    println!("Chain initialized");
    println!("  Config:     {}", path.display());
    println!("  Chain:      {} (id {})", config.chain.chain_name, config.chain.chain_id);
    println!("  Producer:   {}", genesis.coinbase);
    println!("  Block hash: {}", genesis.hash().to_hex());
    println!("  State root: {}", genesis.state_root.to_hex());
    println!("  Fork id:    {} (next {})", fork.cur_fork_id, fork.next_fork_id);
    for account in &config.genesis.accounts {
        println!("  Account:    {} balance {}", account.name, account.balance);
    }
    Ok(())
}

async fn run_devnet(config: &NodeConfig, data_dir: &Path, blocks: u64, interval_ms: u64) -> Result<()> {
    let mut chain = Chain::new(config)?;
    info!(
        chain = %config.chain.chain_name,
        producer = %config.genesis.producer,
        blocks,
        "Starting devnet"
    );

    // Dev accounts that hold a signing key take turns paying each other
    let senders: Vec<(Name, SigningKey)> = config
        .genesis
        .accounts
        .iter()
        .filter(|a| a.name != config.genesis.producer)
        .filter_map(|a| devnet::dev_key(&a.name).map(|key| (a.name.clone(), key)))
        .collect();
    if senders.len() < 2 {
        warn!("Fewer than two dev accounts configured, producing empty blocks");
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut produced = Vec::new();
    let mut round = 0usize;

    while (produced.len() as u64) < blocks {
        tokio::select! {
            _ = ticker.tick() => {
                let mut txs = Vec::new();
                if senders.len() >= 2 {
                    let (from, key) = &senders[round % senders.len()];
                    let (to, _) = &senders[(round + 1) % senders.len()];
                    txs.push(devnet::transfer(&chain, from, key, to, U256::from(1_000u64))?);
                }
                round += 1;

                let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
                let block = chain.build_block(txs, timestamp)?;
                chain.import_block(block.clone())?;
                produced.push(block);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping devnet");
                break;
            }
        }
    }

    let fork = chain.fork_status()?;
    info!(
        height = chain.height(),
        fork_id = fork.cur_fork_id,
        root = %chain.head().state_root,
        "Devnet stopped"
    );

    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(BLOCKS_FILE);
    std::fs::write(&path, serde_json::to_vec_pretty(&produced)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {} blocks to {}", produced.len(), path.display());
    Ok(())
}

fn replay(config: &NodeConfig, file: &Path) -> Result<()> {
    let content =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let blocks: Vec<Block> = serde_json::from_slice(&content)?;

    let mut chain = Chain::new(config)?;
    let count = blocks.len();
    for block in blocks {
        let number = block.header.number;
        chain
            .import_block(block)
            .with_context(|| format!("block {number} rejected"))?;
    }

    let fork = chain.fork_status()?;
    println!("Replayed {count} blocks");
    println!("  Head:       {} ({})", chain.height(), chain.head().hash().to_hex());
    println!("  State root: {}", chain.head().state_root.to_hex());
    println!(
        "  Fork:       cur {} next {} votes {}/{}",
        fork.cur_fork_id, fork.next_fork_id, fork.cur_fork_id_block_num, fork.next_fork_id_block_num
    );
    Ok(())
}

fn generate_keypair() {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let verifying_key = signing_key.verifying_key();

    println!("New keypair generated:");
    println!("Private key: {}", hex::encode(signing_key.to_bytes()));
    println!("Public key:  {}", hex::encode(verifying_key.to_bytes()));
}
