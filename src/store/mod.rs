//! Storage abstraction for canonical documents.
//!
//! The [`CanonicalStore`] trait owns the four persisted record kinds
//! (canonical documents, sources, duplicate groups, processing log) plus
//! the per-page hashes used by the batch partial-overlap scan.
//!
//! Two implementations ship with the crate:
//! - [`sqlite::SqliteStore`]: the system of record.
//! - [`memory::InMemoryStore`]: for tests and embedding.
//!
//! # Uniqueness
//!
//! Exactly one canonical document may exist per content hash. Callers that
//! race on the same new content must go through
//! [`insert_or_get_canonical`](CanonicalStore::insert_or_get_canonical),
//! which is atomic: the loser receives [`InsertOutcome::Existing`] and takes
//! the exact-match path. [`insert_canonical_document`](CanonicalStore::insert_canonical_document)
//! is the strict variant and fails with `DuplicateContentHash`.
//!
//! A canonical document is always inserted together with its first source,
//! so no canonical row is ever observable without one.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::hasher::FuzzyHash;
use crate::models::{
    CanonicalDocument, DuplicateGroup, DuplicateType, IntegrityReport, LogStatus,
    ProcessingLogEntry, Source, Statistics,
};

/// Result of [`CanonicalStore::insert_or_get_canonical`].
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// The document and its first source were written.
    Inserted(CanonicalDocument),
    /// A canonical document for this content hash already existed; nothing
    /// was written.
    Existing(CanonicalDocument),
}

/// A stored fuzzy hash eligible for near-duplicate comparison.
#[derive(Debug, Clone)]
pub struct FuzzyCandidate {
    pub canonical_id: String,
    pub document_type: String,
    pub fuzzy_hash: FuzzyHash,
}

/// Replacement representative fields applied on quality promotion.
///
/// `margin` is the minimum improvement over the stored quality; the store
/// re-checks it at write time so a stale read can never lower the score.
#[derive(Debug, Clone)]
pub struct Promotion {
    pub file_hash: String,
    pub ocr_quality: Option<f64>,
    pub primary_source: String,
    pub margin: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub sources_moved: u64,
}

/// Abstract storage backend for the deduplication engine.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_content_hash`](CanonicalStore::find_by_content_hash) | exact-match lookup |
/// | [`insert_or_get_canonical`](CanonicalStore::insert_or_get_canonical) | atomic insert-if-absent |
/// | [`promote_representative`](CanonicalStore::promote_representative) | swap the primary copy |
/// | [`insert_source`](CanonicalStore::insert_source) | attach a copy (idempotent per path) |
/// | [`insert_duplicate_group`](CanonicalStore::insert_duplicate_group) | record a relation (idempotent) |
/// | [`append_log`](CanonicalStore::append_log) | audit trail |
/// | [`get_statistics`](CanonicalStore::get_statistics) | summary counts |
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    async fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<CanonicalDocument>>;

    async fn get_canonical(&self, canonical_id: &str) -> Result<Option<CanonicalDocument>>;

    /// Insert a new canonical document with its first source.
    ///
    /// Fails with `DuplicateContentHash` if the content hash is taken and
    /// with `CanonicalIdCollision` if the id belongs to other content.
    async fn insert_canonical_document(
        &self,
        doc: &CanonicalDocument,
        first_source: &Source,
    ) -> Result<()>;

    /// Atomic insert-if-absent keyed by content hash.
    async fn insert_or_get_canonical(
        &self,
        doc: &CanonicalDocument,
        first_source: &Source,
    ) -> Result<InsertOutcome>;

    /// Replace the representative copy of a canonical document in place if
    /// the candidate beats the stored quality by more than the margin.
    /// Returns whether the swap happened. The canonical id never changes.
    async fn promote_representative(&self, canonical_id: &str, promotion: &Promotion)
        -> Result<bool>;

    /// Attach a source copy. Returns the new source id, or `None` when the
    /// same file path is already attached to this canonical document.
    ///
    /// Fails with `IntegrityViolation` if the canonical document is unknown.
    async fn insert_source(&self, source: &Source) -> Result<Option<i64>>;

    /// Sources of a canonical document in insertion order.
    async fn get_sources(&self, canonical_id: &str) -> Result<Vec<Source>>;

    /// Every source whose raw bytes hash to `file_hash`, in insertion order.
    async fn find_by_file_hash(&self, file_hash: &str) -> Result<Vec<Source>>;

    /// Record a duplicate group. Returns `false` if a group with the same
    /// `(canonical_id, related_canonical_id, detection_method)` existed; its
    /// score and member count are refreshed instead.
    async fn insert_duplicate_group(&self, group: &DuplicateGroup) -> Result<bool>;

    async fn list_duplicate_groups(
        &self,
        duplicate_type: Option<DuplicateType>,
    ) -> Result<Vec<DuplicateGroup>>;

    /// Groups where the canonical document appears on either side.
    async fn groups_for(&self, canonical_id: &str) -> Result<Vec<DuplicateGroup>>;

    async fn append_log(&self, entry: &ProcessingLogEntry) -> Result<()>;

    /// Most recent log entries first.
    async fn list_log(
        &self,
        status: Option<LogStatus>,
        limit: usize,
    ) -> Result<Vec<ProcessingLogEntry>>;

    /// Fuzzy hashes of all active canonical documents.
    async fn fuzzy_candidates(&self) -> Result<Vec<FuzzyCandidate>>;

    async fn store_page_hashes(
        &self,
        canonical_id: &str,
        pages: &BTreeMap<u32, String>,
    ) -> Result<()>;

    async fn page_hashes(&self, canonical_id: &str) -> Result<BTreeMap<u32, String>>;

    /// Active canonical documents in insertion order, optionally filtered
    /// by document type.
    async fn list_canonical_documents(
        &self,
        document_type: Option<&str>,
    ) -> Result<Vec<CanonicalDocument>>;

    /// Case-insensitive substring search over title and subject.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CanonicalDocument>>;

    /// Re-point every source of `from` at `into` and mark `from` as merged.
    async fn merge_canonical(&self, from: &str, into: &str) -> Result<MergeSummary>;

    async fn check_integrity(&self) -> Result<IntegrityReport>;

    async fn get_statistics(&self) -> Result<Statistics>;
}

/// Quality bucket label used by `documents_by_quality`.
pub(crate) fn quality_bucket(score: Option<f64>) -> &'static str {
    match score {
        Some(s) => crate::quality::categorize(s).as_str(),
        None => "unscored",
    }
}
