//! Source registration and listing commands.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::config::Config;
use crate::db;
use crate::models::Credentials;
use crate::store;

pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let sources = store::list_all_sources(&pool).await?;

    if sources.is_empty() {
        println!("No sources registered. Use `kbh add` to register one.");
        pool.close().await;
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:<10} {:<10} {:<18} PAGES",
        "ID", "NAME", "ACTIVE", "PROCESSED", "LAST SYNCED"
    );
    for source in &sources {
        let last_synced = source
            .last_synced_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<38} {:<24} {:<10} {:<10} {:<18} {}",
            source.id,
            truncate(&source.name, 24),
            source.is_active,
            source.is_processed,
            last_synced,
            source.pages_crawled
        );
    }

    pool.close().await;
    Ok(())
}

pub async fn run_add(
    config: &Config,
    name: &str,
    url: &str,
    email: Option<String>,
    password: Option<String>,
    category: Option<String>,
) -> Result<()> {
    let credentials_json = match (email, password) {
        (Some(email), Some(password)) => {
            Some(serde_json::to_string(&Credentials { email, password })?)
        }
        (None, None) => None,
        _ => anyhow::bail!("--email and --password must be given together"),
    };

    let pool = db::connect(config).await?;
    let id = store::insert_source(
        &pool,
        name,
        url,
        credentials_json.as_deref(),
        category.as_deref(),
    )
    .await?;

    println!("added source {}", id);
    pool.close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
