//! Store maintenance commands: batch scan, explicit merge, integrity check.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::dedup::Deduplicator;

async fn open(config: &Config) -> Result<(Deduplicator, sqlx::SqlitePool)> {
    let store = db::open_store(config).await?;
    let pool = store.pool().clone();
    Ok((Deduplicator::from_config(config, Arc::new(store))?, pool))
}

pub async fn run_scan(config: &Config) -> Result<()> {
    let (dedup, pool) = open(config).await?;
    let summary = dedup.scan().await?;

    println!("scan");
    println!("  documents: {}", summary.documents);
    println!("  fuzzy pairs compared: {}", summary.fuzzy_pairs_compared);
    println!("  page pairs compared: {}", summary.page_pairs_compared);
    println!(
        "  new near-duplicate groups: {}",
        summary.near_duplicate_groups_created
    );
    println!(
        "  new partial-overlap groups: {}",
        summary.partial_overlap_groups_created
    );
    println!("ok");

    pool.close().await;
    Ok(())
}

pub async fn run_merge(config: &Config, from: &str, into: &str) -> Result<()> {
    let (dedup, pool) = open(config).await?;
    let result = dedup.merge(from, into).await;
    pool.close().await;

    let summary = result?;
    println!("merged {} into {}", from, into);
    println!("  sources moved: {}", summary.sources_moved);
    Ok(())
}

pub async fn run_verify(config: &Config) -> Result<()> {
    let (dedup, pool) = open(config).await?;
    let report = dedup.verify().await;
    pool.close().await;
    let report = report?;

    if report.is_clean() {
        println!("integrity ok");
        return Ok(());
    }

    for id in &report.orphan_sources {
        println!("orphan source: #{}", id);
    }
    for id in &report.canonicals_without_sources {
        println!("canonical without sources: {}", id);
    }
    for h in &report.duplicate_content_hashes {
        println!("duplicate content hash: {}", h);
    }
    bail!("integrity check failed");
}
