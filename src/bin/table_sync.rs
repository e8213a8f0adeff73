use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use poker_table_sync::providers::{Providers, PushProvider, SystemClock};
use poker_table_sync::storage::FileStorage;
use poker_table_sync::store::TableState;
use poker_table_sync::types::{Address, ClientIdentity, TableId};
use poker_table_sync::{
    GatewayConfig, HttpGateway, SyncConfig, TableSync, WsPushConfig, WsPushProvider,
};

const LOG_TARGET: &str = "bin::table_sync";
const DEFAULT_STORAGE: &str = "table_sync_state.json";

#[derive(Debug, Parser)]
#[command(name = "table_sync")]
#[command(about = "Follow a poker table and keep a decrypted local view of it", long_about = None)]
struct Args {
    /// Base URL of the ledger gateway REST API
    #[arg(long, env = "TABLE_SYNC_GATEWAY_URL")]
    gateway_url: Url,

    /// Websocket endpoint for push events; polling is used when absent
    #[arg(long, env = "TABLE_SYNC_PUSH_URL")]
    push_url: Option<Url>,

    /// Bearer token for the gateway
    #[arg(long, env = "TABLE_SYNC_API_KEY")]
    api_key: Option<String>,

    /// Table to follow; falls back to the last table stored on disk
    #[arg(long, env = "TABLE_SYNC_TABLE_ID")]
    table_id: Option<TableId>,

    /// Account that signs requests
    #[arg(long, env = "TABLE_SYNC_SIGNER")]
    signer: String,

    /// Seat owner when signing with a delegated key
    #[arg(long, env = "TABLE_SYNC_PRINCIPAL")]
    principal: Option<String>,

    /// Poker table contract address
    #[arg(long, env = "TABLE_SYNC_CONTRACT")]
    contract: String,

    /// File used to persist the active table and last seen rounds
    #[arg(long, env = "TABLE_SYNC_STORAGE", default_value = DEFAULT_STORAGE)]
    storage: PathBuf,

    /// Poll interval in milliseconds for the fallback transport
    #[arg(long, env = "TABLE_SYNC_POLL_MS", default_value_t = 3_000)]
    poll_ms: u64,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "TABLE_SYNC_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json)?;

    let table_id = args.table_id;
    let sync = build_sync(args).context("failed to build table sync")?;
    match table_id {
        Some(table_id) => sync.set_current_table_id(Some(table_id)),
        None => match sync.restore() {
            Some(restored) => info!(target: LOG_TARGET, table_id = restored, "restored active table"),
            None => warn!(target: LOG_TARGET, "no table selected; pass --table-id"),
        },
    }

    let mut updates = sync.subscribe();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!(target: LOG_TARGET, "ctrl-c received, shutting down");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                log_state(&state);
            }
        }
    }

    sync.shutdown();
    Ok(())
}

fn load_dotenv() {
    let manifest_env_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

fn build_sync(args: Args) -> Result<TableSync> {
    let config = SyncConfig::default().with_poll_interval(Duration::from_millis(args.poll_ms));

    let mut gateway_config = GatewayConfig::new(args.gateway_url);
    if let Some(api_key) = args.api_key {
        gateway_config = gateway_config.with_api_key(api_key);
    }
    let gateway = Arc::new(HttpGateway::new(gateway_config)?);

    let push = args.push_url.map(|url| {
        let mut push_config = WsPushConfig::new(url);
        push_config.handshake_timeout = config.push_handshake_timeout;
        push_config.buffer = config.event_channel_capacity;
        Arc::new(WsPushProvider::new(push_config)) as Arc<dyn PushProvider>
    });

    let storage = FileStorage::open(&args.storage)
        .with_context(|| format!("failed to open storage at {}", args.storage.display()))?;

    let signer = Address::new(&args.signer);
    let contract = Address::new(&args.contract);
    let identity = match args.principal {
        Some(principal) => ClientIdentity::delegated(signer, Address::new(principal), contract),
        None => ClientIdentity::direct(signer, contract),
    };

    let providers = Providers {
        ledger: gateway.clone(),
        push,
        poll: gateway.clone(),
        decryption: gateway.clone(),
        authority: gateway.clone(),
        actions: gateway,
        storage: Arc::new(storage),
        clock: Arc::new(SystemClock),
    };

    Ok(TableSync::new(config, identity, providers))
}

fn log_state(state: &TableState) {
    let Some(table_id) = state.table_id else {
        return;
    };
    if let Some(message) = &state.error_message {
        warn!(target: LOG_TARGET, table_id, message = %message, "table error");
    }
    let Some(snapshot) = &state.snapshot else {
        return;
    };
    info!(
        target: LOG_TARGET,
        table_id,
        round = snapshot.round,
        game_state = ?snapshot.game_state,
        board = state.decrypted_community.revealed_count(),
        countdown = ?state.turn_countdown,
        pending = state.pending_transaction.is_some(),
        "table updated"
    );
}
