//! Ingestion command orchestration.
//!
//! Walks a directory, hands the documents to the [`Deduplicator`] and prints
//! the end-of-run summary. A run with any per-document failure exits
//! non-zero after everything else has been processed.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::connector_fs::{self, ScanOptions};
use crate::db;
use crate::dedup::{Deduplicator, RunSummary};
use crate::progress::{ProgressMode, RunEvent};

/// Command-line overrides for one ingest run.
#[derive(Debug, Clone, Default)]
pub struct IngestArgs {
    pub dir: Option<PathBuf>,
    pub collection: Option<String>,
    pub source_name: Option<String>,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

fn scan_options(config: &Config, args: &IngestArgs) -> Result<ScanOptions> {
    let mut opts = match (&args.dir, &config.ingest) {
        (Some(dir), Some(ingest)) => {
            let mut o = ScanOptions::from(ingest);
            o.root = dir.clone();
            o
        }
        (Some(dir), None) => ScanOptions::new(dir, "default"),
        (None, Some(ingest)) => ScanOptions::from(ingest),
        (None, None) => bail!("No input directory given and no [ingest] root configured"),
    };
    if let Some(c) = &args.collection {
        opts.collection = c.clone();
        opts.source_name = c.clone();
    }
    if let Some(s) = &args.source_name {
        opts.source_name = s.clone();
    }
    Ok(opts)
}

pub async fn run_ingest(config: &Config, args: &IngestArgs, progress: ProgressMode) -> Result<()> {
    let opts = scan_options(config, args)?;
    let reporter = progress.reporter();

    let mut documents = connector_fs::scan_directory(&opts)?;
    if let Some(lim) = args.limit {
        documents.truncate(lim);
    }
    reporter.report(RunEvent::Discovered {
        collection: &opts.collection,
        documents: documents.len() as u64,
    });

    if args.dry_run {
        println!("ingest {} (dry-run)", opts.collection);
        println!("  root: {}", opts.root.display());
        println!("  documents found: {}", documents.len());
        return Ok(());
    }

    let store = db::open_store(config).await?;
    let pool = store.pool().clone();
    let dedup = Deduplicator::from_config(config, Arc::new(store))
        .context("Failed to set up deduplicator")?;

    let summary = dedup
        .run(documents, &opts.collection, reporter.as_ref())
        .await
        .context("Ingest aborted")?;

    print_summary(&opts.collection, &summary);
    pool.close().await;

    if summary.has_errors() {
        bail!(
            "{} document(s) failed; see `dedup log --errors`",
            summary.errors
        );
    }
    Ok(())
}

fn print_summary(collection: &str, s: &RunSummary) {
    println!("ingest {}", collection);
    println!("  processed: {}", s.processed);
    println!("  new canonical documents: {}", s.new_canonical);
    println!("  merged sources: {}", s.merged_sources);
    println!("  promotions: {}", s.promotions);
    println!("  near-duplicate groups: {}", s.near_duplicate_groups);
    println!("  exact groups: {}", s.exact_groups);
    if s.unchanged > 0 {
        println!("  unchanged: {}", s.unchanged);
    }
    if s.incomplete > 0 {
        println!("  incomplete: {}", s.incomplete);
    }
    println!("  errors: {}", s.errors);
    if s.errors == 0 {
        println!("ok");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_dir_overrides_config_root() {
        let mut config = Config::with_db_path("x.sqlite");
        config.ingest = Some(crate::config::IngestConfig {
            root: PathBuf::from("/configured"),
            collection: "vol1".into(),
            include_globs: vec!["**/*.txt".into()],
            exclude_globs: vec![],
            follow_symlinks: false,
        });
        let args = IngestArgs {
            dir: Some(PathBuf::from("/override")),
            source_name: Some("doj-release".into()),
            ..IngestArgs::default()
        };
        let opts = scan_options(&config, &args).unwrap();
        assert_eq!(opts.root, PathBuf::from("/override"));
        assert_eq!(opts.collection, "vol1");
        assert_eq!(opts.source_name, "doj-release");
        assert_eq!(opts.include_globs, vec!["**/*.txt".to_string()]);
    }

    #[test]
    fn requires_some_root() {
        let config = Config::with_db_path("x.sqlite");
        assert!(scan_options(&config, &IngestArgs::default()).is_err());
    }
}
