use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ethers::signers::Signer;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ticket_relay::api::{self, ApiContext};
use ticket_relay::config::{ServiceConfig, WalletBackend};
use ticket_relay::contracts::client::RpcChainClient;
use ticket_relay::contracts::dispatcher::TransactionDispatcher;
use ticket_relay::contracts::reader::TicketReader;
use ticket_relay::contracts::ContractRegistry;
use ticket_relay::crypto::{generate_signing_key, save_signing_key};
use ticket_relay::identity::{IdentityProvider, SupabaseIdentity};
use ticket_relay::ticketing::TicketingService;
use ticket_relay::wallet::{MemoryWalletDirectory, PostgrestWalletDirectory, WalletDirectory};

#[derive(Parser)]
#[command(author, version, about = "Ticket marketplace relay with custodial wallets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service using the provided configuration file
    Start {
        #[arg(short, long, default_value = "config/service.toml")]
        config: PathBuf,
    },
    /// Generate a default service configuration file
    GenerateConfig {
        #[arg(short, long, default_value = "config/service.toml")]
        path: PathBuf,
    },
    /// Generate a new admin signing key
    Keygen {
        #[arg(short, long, default_value = "keys/admin.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start_service(config).await?,
        Commands::GenerateConfig { path } => generate_config(path)?,
        Commands::Keygen { path } => keygen(path)?,
    }

    Ok(())
}

async fn start_service(config_path: PathBuf) -> Result<()> {
    let mut config = if config_path.exists() {
        ServiceConfig::load(&config_path)?
    } else {
        let config = ServiceConfig::default();
        config.save(&config_path)?;
        config
    };
    config.apply_env()?;
    config.validate()?;

    let admin = config.admin_key()?;
    let chain = Arc::new(RpcChainClient::connect(&config.chain.rpc_url, config.chain.chain_id).await?);
    let contracts = Arc::new(ContractRegistry::load(&config.contracts)?);

    let http = reqwest::Client::new();
    let wallets: Arc<dyn WalletDirectory> = match config.wallets.backend {
        WalletBackend::Memory => Arc::new(MemoryWalletDirectory::new()),
        WalletBackend::Postgrest => Arc::new(PostgrestWalletDirectory::new(
            http.clone(),
            config.identity.url.clone(),
            config.identity.api_key.clone(),
            config.wallets.table.clone(),
        )),
    };
    let identity: Arc<dyn IdentityProvider> = Arc::new(SupabaseIdentity::new(
        http,
        config.identity.url.clone(),
        config.identity.api_key.clone(),
    ));

    info!(
        admin = ?admin.address(),
        chain_id = chain.chain_id(),
        signing = ?config.chain.signing,
        wallets = ?config.wallets.backend,
        "starting ticket relay"
    );
    let dispatcher = TransactionDispatcher::new(
        chain.clone(),
        contracts.clone(),
        wallets.clone(),
        admin,
        config.chain.signing,
    );
    let reader = TicketReader::new(chain, contracts.clone(), config.chain.listing_from_block);
    let tickets = Arc::new(TicketingService::new(
        dispatcher,
        reader,
        wallets.clone(),
        identity.clone(),
        contracts,
    ));

    let context = ApiContext::new(identity, wallets, tickets);
    let listen = config.listen;
    let allowed_origin = config.allowed_origin.clone();
    tokio::select! {
        res = api::serve(context, listen, allowed_origin) => res?,
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    Ok(())
}

fn generate_config(path: PathBuf) -> Result<()> {
    let config = ServiceConfig::default();
    config.ensure_directories()?;
    config.save(&path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

fn keygen(path: PathBuf) -> Result<()> {
    let key = generate_signing_key();
    save_signing_key(&path, &key)?;
    info!(?path, address = ?key.address(), "generated admin signing key");
    Ok(())
}
