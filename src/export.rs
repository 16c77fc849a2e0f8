//! Bulk export of the store.
//!
//! `json` produces one pretty-printed document with the three tables;
//! `jsonl` produces one `{"table": ..., "row": ...}` record per line, which
//! streams into tools that load records one at a time.

use anyhow::Result;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::error::Result as DedupResult;
use crate::models::{CanonicalDocument, DuplicateGroup, Source};
use crate::store::CanonicalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    Jsonl,
}

#[derive(Debug, Serialize)]
pub struct ExportData {
    pub canonical_documents: Vec<CanonicalDocument>,
    pub sources: Vec<Source>,
    pub duplicate_groups: Vec<DuplicateGroup>,
}

#[derive(Serialize)]
struct JsonlRecord<'a, T: Serialize> {
    table: &'static str,
    row: &'a T,
}

/// Gather every active canonical document with its sources and all groups.
pub async fn collect(store: &dyn CanonicalStore) -> DedupResult<ExportData> {
    let canonical_documents = store.list_canonical_documents(None).await?;
    let mut sources = Vec::new();
    for doc in &canonical_documents {
        sources.extend(store.get_sources(&doc.canonical_id).await?);
    }
    let duplicate_groups = store.list_duplicate_groups(None).await?;
    Ok(ExportData {
        canonical_documents,
        sources,
        duplicate_groups,
    })
}

/// Serialize `data` in the requested format.
pub fn render(data: &ExportData, format: ExportFormat) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(data),
        ExportFormat::Jsonl => {
            let mut out = String::new();
            for row in &data.canonical_documents {
                push_line(&mut out, "canonical_documents", row)?;
            }
            for row in &data.sources {
                push_line(&mut out, "sources", row)?;
            }
            for row in &data.duplicate_groups {
                push_line(&mut out, "duplicate_groups", row)?;
            }
            Ok(out)
        }
    }
}

fn push_line<T: Serialize>(out: &mut String, table: &'static str, row: &T) -> serde_json::Result<()> {
    out.push_str(&serde_json::to_string(&JsonlRecord { table, row })?);
    out.push('\n');
    Ok(())
}

/// Export the store.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, format: ExportFormat, output: Option<&Path>) -> Result<()> {
    let store = db::open_store(config).await?;
    let data = collect(&store).await?;
    let rendered = render(&data, format)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &rendered)?;
            eprintln!(
                "Exported {} documents, {} sources, {} groups to {}",
                data.canonical_documents.len(),
                data.sources.len(),
                data.duplicate_groups.len(),
                path.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if format == ExportFormat::Json {
                writeln!(stdout)?;
            }
        }
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{DedupOptions, Deduplicator};
    use crate::hasher::hash_bytes;
    use crate::models::Document;
    use crate::quality::QualityAssessor;
    use crate::store::memory::InMemoryStore;
    use std::sync::Arc;

    async fn populated() -> ExportData {
        let store = Arc::new(InMemoryStore::new());
        let d = Deduplicator::new(store.clone(), QualityAssessor::default(), DedupOptions::default());
        for (path, coll) in [("/v1/a.txt", "v1"), ("/v2/a.txt", "v2")] {
            d.ingest(
                Document::new(path, path, "Same bytes", coll).with_file_hash(hash_bytes(b"Same bytes")),
            )
            .await
            .unwrap();
        }
        collect(store.as_ref()).await.unwrap()
    }

    #[tokio::test]
    async fn json_has_three_tables() {
        let data = populated().await;
        let v: serde_json::Value = serde_json::from_str(&render(&data, ExportFormat::Json).unwrap()).unwrap();
        assert_eq!(v["canonical_documents"].as_array().unwrap().len(), 1);
        assert_eq!(v["sources"].as_array().unwrap().len(), 2);
        assert_eq!(v["duplicate_groups"].as_array().unwrap().len(), 1);
        assert_eq!(v["duplicate_groups"][0]["detection_method"], "file_hash");
    }

    #[tokio::test]
    async fn jsonl_is_one_record_per_line() {
        let data = populated().await;
        let out = render(&data, ExportFormat::Jsonl).unwrap();
        let tables: Vec<String> = out
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["table"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(
            tables,
            vec!["canonical_documents", "sources", "sources", "duplicate_groups"]
        );
    }
}
