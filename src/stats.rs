//! Store statistics and health overview.
//!
//! Provides a quick summary of what's been deduplicated: canonical document
//! and source counts, duplicate groups, and per-type / per-quality
//! breakdowns. Used by `dedup stats`.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::CanonicalStore;

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let store = db::open_store(config).await?;
    let stats = store.get_statistics().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        store.close().await;
        return Ok(());
    }

    let last_run = store.list_log(None, 1).await?.first().map(|e| e.timestamp);
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Document Dedup Store Stats");
    println!("==========================");
    println!();
    println!("  Database:          {}", config.db.path.display());
    println!("  Size:              {}", format_bytes(db_size));
    println!(
        "  Last activity:     {}",
        last_run.map(format_ts_relative).unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Documents:         {}", stats.total_documents);
    println!("  Sources:           {}", stats.total_sources);
    println!("  Duplicate groups:  {}", stats.duplicate_groups);
    println!("  Sources per doc:   {:.2}", stats.avg_sources_per_doc);

    if !stats.documents_by_type.is_empty() {
        println!();
        println!("  By type:");
        println!("  {:<24} {:>8}", "TYPE", "DOCS");
        println!("  {}", "-".repeat(33));
        for (t, n) in &stats.documents_by_type {
            println!("  {:<24} {:>8}", t, n);
        }
    }

    if !stats.documents_by_quality.is_empty() {
        println!();
        println!("  By OCR quality:");
        println!("  {:<24} {:>8}", "QUALITY", "DOCS");
        println!("  {}", "-".repeat(33));
        for (q, n) in &stats.documents_by_quality {
            println!("  {:<24} {:>8}", q, n);
        }
    }

    println!();

    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn recent_timestamps_are_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
