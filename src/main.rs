//! flowcache - Local cache of Webflow CMS collections
//!
//! Operator front end: refresh, read, clear and inspect the cache, or run the
//! background refresh worker.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use flowcache::cli::{Cli, Command};
use flowcache::config::AppConfig;
use flowcache::data::{FieldFilter, WebflowClient};
use flowcache::manager::CacheManager;
use flowcache::refresh::{RefreshConfig, RefreshHandle, RefreshMessage};

/// Logs go to stderr so `get` output on stdout stays machine-readable
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Builds the manager; the API client is attached only when refreshing is
/// enabled and a token is configured, so reads work offline.
fn build_manager(config: &AppConfig) -> Result<CacheManager> {
    let store = config.snapshot_store()?;
    let mut manager = CacheManager::new(store, config.cache_settings());

    if config.enabled {
        match config.webflow_config() {
            Ok(webflow) => {
                let client = WebflowClient::new(webflow).context("failed to build Webflow client")?;
                manager = manager.with_source(Arc::new(client));
            }
            Err(e) => tracing::debug!(error = %e, "running without an API client"),
        }
    }

    Ok(manager)
}

async fn cmd_refresh(
    config: &AppConfig,
    manager: &CacheManager,
    collection: Option<String>,
    force: bool,
) -> Result<ExitCode> {
    if config.enabled {
        config.require_api_token()?;
    }

    let outcomes = match collection {
        Some(name) => {
            let outcome = manager.refresh(&name, force).await;
            BTreeMap::from([(name, outcome)])
        }
        None => manager.refresh_all(force).await,
    };

    let mut failed = 0;
    for (name, outcome) in &outcomes {
        println!("{:<20} {}", name, outcome);
        if !outcome.is_ok() {
            failed += 1;
        }
    }

    if failed > 0 {
        eprintln!("{} of {} collection(s) failed to refresh", failed, outcomes.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_get(
    manager: &CacheManager,
    collection: &str,
    filter: Option<&FieldFilter>,
    count: bool,
) -> Result<()> {
    let items = manager.get(collection, filter);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if count {
        writeln!(out, "{}", items.len())?;
    } else {
        for item in &items {
            serde_json::to_writer(&mut out, item)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn cmd_status(manager: &CacheManager) {
    let info = manager.info();
    if info.is_empty() {
        println!("No collections configured or cached.");
        return;
    }

    println!("{:<20} {:<11} {:>7}  {:>8}  REFRESHED", "COLLECTION", "STATE", "ITEMS", "AGE");
    for entry in info {
        let items = entry.item_count.map_or_else(|| "-".to_string(), |n| n.to_string());
        let age = entry.age_secs.map_or_else(|| "-".to_string(), format_age);
        let refreshed = entry
            .refreshed_at
            .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M UTC").to_string());
        println!(
            "{:<20} {:<11} {:>7}  {:>8}  {}",
            entry.name,
            entry.state.to_string(),
            items,
            age,
            refreshed
        );
    }
}

/// Compact age such as "45s", "12m" or "3h 05m"
fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {:02}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {:02}h", s / 86_400, (s % 86_400) / 3600),
    }
}

async fn cmd_ping(config: &AppConfig) -> Result<()> {
    let client = WebflowClient::new(config.webflow_config()?)?;
    client.test_connection().await?;
    println!("ok");
    Ok(())
}

async fn cmd_watch(config: &AppConfig, manager: CacheManager) -> Result<()> {
    if config.enabled {
        config.require_api_token()?;
    } else {
        tracing::warn!("refresh is disabled; serving the existing cache only");
    }

    let mut handle = RefreshHandle::spawn(
        Arc::new(manager),
        RefreshConfig {
            interval: config.refresh_interval(),
            enabled: config.enabled,
        },
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(message) = handle.receiver.recv() => log_message(&message),
            _ = &mut ctrl_c => break,
        }
    }

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn log_message(message: &RefreshMessage) {
    match message {
        RefreshMessage::RefreshStarted { force } => tracing::info!(force, "refresh cycle started"),
        RefreshMessage::CollectionRefreshed { collection, items } => {
            tracing::info!(collection, items, "collection refreshed")
        }
        RefreshMessage::CollectionFailed { collection, error } => {
            tracing::warn!(collection, error, "collection refresh failed")
        }
        RefreshMessage::RefreshCompleted { refreshed, failed } => {
            tracing::info!(refreshed, failed, "refresh cycle completed")
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = Some(dir);
    }

    let manager = build_manager(&config)?;

    match cli.command {
        Command::Refresh { collection, force } => {
            return cmd_refresh(&config, &manager, collection, force).await
        }
        Command::Get {
            collection,
            filter,
            count,
        } => cmd_get(&manager, &collection, filter.as_ref(), count)?,
        Command::Clear { collection } => {
            let removed = manager.clear(collection.as_deref())?;
            println!("Removed {} snapshot(s)", removed);
        }
        Command::Status => cmd_status(&manager),
        Command::Ping => cmd_ping(&config).await?,
        Command::Watch => cmd_watch(&config, manager).await?,
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
