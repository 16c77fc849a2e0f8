use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{default_include_globs, IngestConfig};
use crate::hasher::hash_bytes;
use crate::models::Document;

/// What to walk and how to label the documents found.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    pub collection: String,
    pub source_name: String,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

impl ScanOptions {
    pub fn new(root: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        Self {
            root: root.into(),
            source_name: collection.clone(),
            collection,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

impl From<&IngestConfig> for ScanOptions {
    fn from(c: &IngestConfig) -> Self {
        Self {
            root: c.root.clone(),
            collection: c.collection.clone(),
            source_name: c.collection.clone(),
            include_globs: c.include_globs.clone(),
            exclude_globs: c.exclude_globs.clone(),
            follow_symlinks: c.follow_symlinks,
        }
    }
}

/// Walk `opts.root` and turn every matching file into a [`Document`],
/// sorted by relative path.
pub fn scan_directory(opts: &ScanOptions) -> Result<Vec<Document>> {
    let root = &opts.root;
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&opts.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(opts.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut found = Vec::new();

    let walker = WalkDir::new(root).follow_links(opts.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        // Apply exclude patterns
        if exclude_set.is_match(&rel_str) {
            continue;
        }

        // Apply include patterns
        if !include_set.is_match(&rel_str) {
            continue;
        }

        found.push((rel_str, file_to_document(path, opts)));
    }

    // Sort for deterministic ordering
    found.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(found.into_iter().map(|(_, doc)| doc).collect())
}

/// An unreadable file still yields a document; hashing it later fails and
/// is reported for that document alone.
fn file_to_document(path: &Path, opts: &ScanOptions) -> Document {
    let id = path.display().to_string();
    let doc = match std::fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            Document::new(id, path, text, &opts.collection).with_file_hash(hash_bytes(&bytes))
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable file");
            Document::new(id, path, String::new(), &opts.collection)
        }
    };
    doc.with_source_name(&opts.source_name)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn scans_matching_files_in_order() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("b.txt"), "second").unwrap();
        std::fs::write(tmp.path().join("a.md"), "# first").unwrap();
        std::fs::write(tmp.path().join("sub/c.txt"), "third").unwrap();
        std::fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let docs = scan_directory(&ScanOptions::new(tmp.path(), "vol1")).unwrap();
        let names: Vec<String> = docs
            .iter()
            .map(|d| d.file_path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "b.txt", "c.txt"]);
        assert!(docs.iter().all(|d| d.collection == "vol1"));
        assert!(docs.iter().all(|d| d.file_hash.is_some()));
        assert_eq!(docs[0].format, "md");
    }

    #[test]
    fn excludes_apply() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("keep.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("drafts/skip.txt"), "y").unwrap();

        let mut opts = ScanOptions::new(tmp.path(), "vol1");
        opts.exclude_globs = vec!["drafts/**".to_string()];
        let docs = scan_directory(&opts).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn missing_root_is_an_error() {
        let opts = ScanOptions::new("/no/such/root", "vol1");
        assert!(scan_directory(&opts).is_err());
    }
}
