//! Subcommands `enigma run` and `enigma check`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use enigma_bot::schema::{self, ATTEMPTS, CONFIG, ENIGMA, USERS};
use enigma_bot::{ConversationEngine, Dispatcher};
use enigma_store::{MemoryRemote, RemoteStore, SheetsRemote, TableStore};
use tracing::{error, info, warn};

use crate::config::{AppConfig, Backend, SPREADSHEET_ID_ENV};
use crate::helpers::env_non_empty;
use crate::telegram::{self, TelegramApi};

/// Build the remote backend and load every table into a fresh cache.
pub async fn open_store(config: &AppConfig) -> Result<Arc<TableStore>> {
    let remote: Arc<dyn RemoteStore> = match config.remote.backend {
        Backend::Sheets => {
            let spreadsheet_id = config.spreadsheet_id().ok_or_else(|| {
                anyhow::anyhow!(
                    "no spreadsheet configured: set [remote] spreadsheet_id or {SPREADSHEET_ID_ENV}"
                )
            })?;
            let token = env_non_empty("SHEETS_ACCESS_TOKEN").ok_or_else(|| {
                anyhow::anyhow!("SHEETS_ACCESS_TOKEN is required for the sheets backend")
            })?;
            info!(spreadsheet_id = %spreadsheet_id, "using Google Sheets backend");
            // The token is used as given for the life of the process.
            warn!("SHEETS_ACCESS_TOKEN is not refreshed; restart the bot with a new token before it expires");
            Arc::new(
                SheetsRemote::new(spreadsheet_id, token)
                    .context("failed to build the Sheets HTTP client")?,
            )
        }
        Backend::Memory => {
            warn!("using in-memory backend, nothing will be persisted");
            Arc::new(empty_memory_remote())
        }
    };

    let store = Arc::new(TableStore::new(remote).with_retry_policy(config.retry_policy()));
    let count = store.load().await.context("initial table load failed")?;
    info!(tables = count, "table cache loaded");

    for table in [CONFIG, ENIGMA, USERS, ATTEMPTS] {
        if store.row_count(table).is_err() {
            anyhow::bail!("required table `{table}` is missing from the remote store");
        }
    }
    Ok(store)
}

/// The four bot tables with headers only, and a fresh uuid counter.
fn empty_memory_remote() -> MemoryRemote {
    MemoryRemote::new()
        .with_table(CONFIG, schema::config::HEADER, &[&["0"]])
        .with_table(ENIGMA, schema::enigma::HEADER, &[])
        .with_table(USERS, schema::users::HEADER, &[])
        .with_table(ATTEMPTS, schema::attempts::HEADER, &[])
}

/// Run the Telegram bot until Ctrl-C.
pub async fn cmd_run(config: AppConfig, poll_timeout: Option<u64>) -> Result<()> {
    info!("starting enigma bot");

    let bot_token = env_non_empty("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
        anyhow::anyhow!("TELEGRAM_BOT_TOKEN is required. Create a bot at https://t.me/BotFather")
    })?;
    let poll_timeout = poll_timeout.unwrap_or(config.bot.poll_timeout_secs);

    let api = Arc::new(TelegramApi::new(&bot_token, Duration::from_secs(poll_timeout))?);
    let bot_name = api.get_me().await?;
    info!(bot = %bot_name, "Telegram token verified");

    let store = open_store(&config).await?;
    let engine = Arc::new(ConversationEngine::new(
        Arc::clone(&store),
        config.messages(),
        config.engine_config(),
    ));
    let dispatcher = Dispatcher::new(engine, api.clone());

    let flusher = config
        .flush_interval()
        .map(|every| tokio::spawn(flush_periodically(Arc::clone(&store), every)));

    tokio::select! {
        () = telegram::poll(&api, &dispatcher, poll_timeout) => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown requested");
        }
    }

    if let Some(handle) = flusher {
        handle.abort();
    }
    if let Err(e) = store.flush_dirty().await {
        warn!(error = %e, dirty = ?store.dirty_tables(), "exiting with unsynced writes");
    }
    info!("enigma bot stopped");
    Ok(())
}

/// Retry dirty tables every `every`.
async fn flush_periodically(store: Arc<TableStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if store.dirty_tables().is_empty() {
            continue;
        }
        if let Err(e) = store.flush_dirty().await {
            warn!(error = %e, "periodic flush incomplete");
        }
    }
}

/// Load every table and print one line per table.
pub async fn cmd_check(config: AppConfig) -> Result<()> {
    let store = open_store(&config).await?;

    println!();
    println!("  Enigma bot v{}", env!("CARGO_PKG_VERSION"));
    println!();
    let mut names = store.table_names();
    names.sort();
    for name in &names {
        let rows = store.row_count(name)?;
        let header = store.header(name)?;
        println!("  {name:<14} {rows:>6} rows   [{}]", header.join(", "));
    }
    println!();
    Ok(())
}
