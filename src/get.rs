//! Read-only views over the store: a single canonical document, its
//! sources, the duplicate groups, free-text search and the processing log.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::{DuplicateType, LogStatus, Source};
use crate::stats::format_ts_iso;
use crate::store::CanonicalStore;

fn fmt_quality(q: Option<f64>) -> String {
    q.map(|q| format!("{:.2}", q))
        .unwrap_or_else(|| "-".to_string())
}

pub async fn run_show(config: &Config, canonical_id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let Some(doc) = store.get_canonical(canonical_id).await? else {
        store.close().await;
        bail!("canonical document not found: {}", canonical_id);
    };
    let sources = store.get_sources(canonical_id).await?;
    let groups = store.groups_for(canonical_id).await?;

    println!("--- Canonical Document ---");
    println!("id:               {}", doc.canonical_id);
    println!(
        "title:            {}",
        doc.title.as_deref().unwrap_or("(untitled)")
    );
    println!("type:             {}", doc.document_type);
    if let Some(ref d) = doc.date {
        println!("date:             {}", d);
    }
    if let Some(ref f) = doc.from_addr {
        println!("from:             {}", f);
    }
    if let Some(ref t) = doc.to_addr {
        println!("to:               {}", t);
    }
    if let Some(ref s) = doc.subject {
        println!("subject:          {}", s);
    }
    println!("content_hash:     {}", doc.content_hash);
    println!("file_hash:        {}", doc.file_hash);
    if let Some(ref f) = doc.fuzzy_hash {
        println!("fuzzy_hash:       {}", f);
    }
    println!("ocr_quality:      {}", fmt_quality(doc.ocr_quality));
    println!("pages:            {}", doc.page_count);
    println!("redactions:       {}", if doc.has_redactions { "yes" } else { "no" });
    println!("completeness:     {}", doc.completeness.as_str());
    println!("primary_source:   {}", doc.primary_source);
    println!("selection_reason: {}", doc.selection_reason.as_str());
    if let Some(ref m) = doc.merged_into {
        println!("merged_into:      {}", m);
    }
    println!("created_at:       {}", format_ts_iso(doc.created_at));
    println!("updated_at:       {}", format_ts_iso(doc.updated_at));

    println!();
    println!("--- Sources ({}) ---", sources.len());
    print_sources(&sources);

    if !groups.is_empty() {
        println!();
        println!("--- Duplicate Groups ({}) ---", groups.len());
        for g in &groups {
            let other = if g.canonical_id == canonical_id {
                &g.related_canonical_id
            } else {
                &g.canonical_id
            };
            println!(
                "  {:<16} {:<13} {:.2}  {}",
                g.duplicate_type, g.detection_method, g.similarity_score, other
            );
        }
    }

    store.close().await;
    Ok(())
}

fn print_sources(sources: &[Source]) {
    for s in sources {
        println!(
            "  #{:<5} {:<16} {:<8} q={:<5} {}",
            s.id,
            s.source_name,
            s.format,
            fmt_quality(s.quality_score),
            s.file_path
        );
    }
}

pub async fn run_sources(config: &Config, canonical_id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    if store.get_canonical(canonical_id).await?.is_none() {
        store.close().await;
        bail!("canonical document not found: {}", canonical_id);
    }
    let sources = store.get_sources(canonical_id).await?;
    println!("{} source(s) for {}", sources.len(), canonical_id);
    print_sources(&sources);
    store.close().await;
    Ok(())
}

pub async fn run_duplicates(config: &Config, duplicate_type: Option<DuplicateType>) -> Result<()> {
    let store = db::open_store(config).await?;
    let groups = store.list_duplicate_groups(duplicate_type).await?;

    if groups.is_empty() {
        println!("No duplicate groups.");
    } else {
        println!(
            "{:<6} {:<16} {:<13} {:>6} {:>7}  {:<16} {}",
            "GROUP", "TYPE", "METHOD", "SCORE", "MEMBERS", "CANONICAL", "RELATED"
        );
        for g in &groups {
            println!(
                "{:<6} {:<16} {:<13} {:>6.2} {:>7}  {:<16} {}",
                g.id,
                g.duplicate_type,
                g.detection_method,
                g.similarity_score,
                g.member_count,
                g.canonical_id,
                g.related_canonical_id
            );
        }
    }

    store.close().await;
    Ok(())
}

pub async fn run_search(config: &Config, query: &str, limit: usize) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let store = db::open_store(config).await?;
    let hits = store.search(query, limit).await?;

    if hits.is_empty() {
        println!("No results.");
    }
    for (i, doc) in hits.iter().enumerate() {
        println!(
            "{}. {}  [{}]  {}",
            i + 1,
            doc.canonical_id,
            doc.document_type,
            doc.title.as_deref().unwrap_or("(untitled)")
        );
        if let Some(ref s) = doc.subject {
            if doc.title.as_deref() != Some(s.as_str()) {
                println!("    subject: {}", s);
            }
        }
    }

    store.close().await;
    Ok(())
}

pub async fn run_log(config: &Config, errors_only: bool, limit: usize) -> Result<()> {
    let store = db::open_store(config).await?;
    let status = errors_only.then_some(LogStatus::Error);
    let entries = store.list_log(status, limit).await?;

    if entries.is_empty() {
        println!("No log entries.");
    }
    for e in &entries {
        println!(
            "{}  {:<7} {:<10} {}  {}",
            format_ts_iso(e.timestamp),
            e.status.as_str(),
            e.operation,
            e.source,
            e.message
        );
    }

    store.close().await;
    Ok(())
}
