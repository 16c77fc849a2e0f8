//! The deduplication engine.
//!
//! [`Deduplicator`] ties the hasher, the quality assessor and a
//! [`CanonicalStore`] together. Each incoming [`Document`] ends in exactly
//! one [`Outcome`]:
//!
//! ```text
//! content hash known?  ── yes ──▶ attach source, maybe promote, exact group
//!        │ no
//!        ▼
//! fuzzy match ≥ threshold? ─ yes ─▶ new canonical + near_duplicate group(s)
//!        │ no
//!        ▼
//! new canonical
//! ```
//!
//! CPU-bound work (fingerprints, quality scores, fuzzy comparison) runs on
//! the rayon pool inside `spawn_blocking`. Store writes happen one document
//! at a time in input order, so the first-seen copy of any content always
//! wins ties.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::canonical_id::canonical_id;
use crate::config::{Config, DedupConfig};
use crate::error::{DedupError, Result};
use crate::extract::{self, Extracted};
use crate::hasher::{self, FuzzyDigest, FuzzyUnavailable};
use crate::models::{
    CanonicalDocument, Completeness, DetectionMethod, Document, DuplicateGroup, DuplicateType,
    IntegrityReport, ProcessingLogEntry, SelectionReason, Source,
};
use crate::progress::{RunEvent, RunProgress};
use crate::quality::{Lexicon, QualityAssessor};
use crate::store::{CanonicalStore, FuzzyCandidate, InsertOutcome, MergeSummary, Promotion};

/// Upper bound on `merged_into` hops when resolving a merged record.
const MAX_MERGE_HOPS: usize = 16;

/// Tunables for one deduplicator instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupOptions {
    pub near_duplicate_threshold: f64,
    pub promotion_margin: f64,
    pub partial_overlap_threshold: f64,
    pub fuzzy_enabled: bool,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self::from(&DedupConfig::default())
    }
}

impl From<&DedupConfig> for DedupOptions {
    fn from(c: &DedupConfig) -> Self {
        Self {
            near_duplicate_threshold: c.near_duplicate_threshold,
            promotion_margin: c.promotion_margin,
            partial_overlap_threshold: c.partial_overlap_threshold,
            fuzzy_enabled: c.fuzzy_enabled,
        }
    }
}

/// Everything derived from a document before the store is consulted.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub document: Document,
    pub file_hash: String,
    pub content_hash: String,
    pub fuzzy: FuzzyDigest,
    pub page_hashes: BTreeMap<u32, String>,
    /// `None` for binary-only formats with no caller-supplied score.
    pub quality: Option<f64>,
    pub extracted: Extracted,
}

impl PreparedDocument {
    fn source_label(&self) -> String {
        self.document.file_path.display().to_string()
    }
}

/// Terminal state of one processed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// First sighting of this content.
    NewCanonical {
        canonical_id: String,
        incomplete: bool,
    },
    /// Same content as an existing canonical document; attached as a source.
    MergedSource {
        canonical_id: String,
        promoted: bool,
        /// Set when this attach created a new exact duplicate group.
        exact_group: Option<DetectionMethod>,
    },
    /// New canonical document that is a near-duplicate of existing ones.
    NearDuplicate {
        canonical_id: String,
        related: Vec<(String, f64)>,
        incomplete: bool,
    },
    /// This exact path was already attached; nothing changed.
    Unchanged { canonical_id: String },
}

impl Outcome {
    pub fn canonical_id(&self) -> &str {
        match self {
            Outcome::NewCanonical { canonical_id, .. }
            | Outcome::MergedSource { canonical_id, .. }
            | Outcome::NearDuplicate { canonical_id, .. }
            | Outcome::Unchanged { canonical_id } => canonical_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::NewCanonical { .. } => "new_canonical",
            Outcome::MergedSource { .. } => "merged_source",
            Outcome::NearDuplicate { .. } => "near_duplicate",
            Outcome::Unchanged { .. } => "unchanged",
        }
    }
}

/// End-of-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: u64,
    pub new_canonical: u64,
    pub merged_sources: u64,
    pub promotions: u64,
    pub near_duplicate_groups: u64,
    pub exact_groups: u64,
    pub unchanged: u64,
    pub incomplete: u64,
    pub errors: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::NewCanonical { incomplete, .. } => {
                self.new_canonical += 1;
                self.incomplete += *incomplete as u64;
            }
            Outcome::MergedSource {
                promoted,
                exact_group,
                ..
            } => {
                self.merged_sources += 1;
                self.promotions += *promoted as u64;
                self.exact_groups += exact_group.is_some() as u64;
            }
            Outcome::NearDuplicate {
                related,
                incomplete,
                ..
            } => {
                self.new_canonical += 1;
                self.near_duplicate_groups += related.len() as u64;
                self.incomplete += *incomplete as u64;
            }
            Outcome::Unchanged { .. } => self.unchanged += 1,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

/// Counters from a batch [`Deduplicator::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub documents: u64,
    pub fuzzy_pairs_compared: u64,
    pub page_pairs_compared: u64,
    pub near_duplicate_groups_created: u64,
    pub partial_overlap_groups_created: u64,
}

/// Whether a copy scored `candidate` should replace one scored `current`.
///
/// The candidate must beat the current score by strictly more than
/// `margin`. An unscored representative yields to any scored copy; equal
/// scores keep the first-seen copy.
pub fn should_promote(current: Option<f64>, candidate: Option<f64>, margin: f64) -> bool {
    match (current, candidate) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(cur), Some(new)) => new > cur + margin,
    }
}

/// Every candidate pair scoring at least `threshold`. Runs on the rayon pool.
fn fuzzy_pairs(candidates: &[FuzzyCandidate], threshold: f64) -> Vec<(String, String, f64)> {
    (0..candidates.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            let a = &candidates[i];
            candidates[i + 1..].iter().filter_map(move |b| {
                let score = hasher::compare_fuzzy(&a.fuzzy_hash, &b.fuzzy_hash);
                (score >= threshold).then(|| (a.canonical_id.clone(), b.canonical_id.clone(), score))
            })
        })
        .collect()
}

fn page_overlaps(
    group: &[(String, BTreeMap<u32, String>)],
    threshold: f64,
) -> Vec<(String, String, f64)> {
    (0..group.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            let (id_a, pages_a) = &group[i];
            group[i + 1..].iter().filter_map(move |(id_b, pages_b)| {
                let overlap = hasher::find_common_pages(pages_a, pages_b);
                let score = overlap.max_overlap();
                (!overlap.shared.is_empty() && score >= threshold)
                    .then(|| (id_a.clone(), id_b.clone(), score))
            })
        })
        .collect()
}

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn prepare_document(
    assessor: &QualityAssessor,
    options: &DedupOptions,
    document: Document,
) -> Result<PreparedDocument> {
    let file_hash = match &document.file_hash {
        Some(h) => h.clone(),
        None => hasher::hash_file(&document.file_path)?,
    };
    let text = &document.extracted_text;
    let content_hash = hasher::hash_content(text, true);
    let fuzzy = if options.fuzzy_enabled {
        hasher::hash_fuzzy(text)
    } else {
        FuzzyDigest::Unavailable(FuzzyUnavailable::Disabled)
    };
    let page_hashes = hasher::hash_pages(&hasher::split_pages(text));
    let quality = document.ocr_quality.or_else(|| {
        document
            .is_text_derived()
            .then(|| assessor.assess(text).overall_score)
    });
    let extracted = extract::enrich(&document);

    Ok(PreparedDocument {
        document,
        file_hash,
        content_hash,
        fuzzy,
        page_hashes,
        quality,
        extracted,
    })
}

pub struct Deduplicator {
    store: Arc<dyn CanonicalStore>,
    assessor: QualityAssessor,
    options: DedupOptions,
    disabled_noted: AtomicBool,
    short_input_noted: AtomicBool,
}

impl Deduplicator {
    pub fn new(
        store: Arc<dyn CanonicalStore>,
        assessor: QualityAssessor,
        options: DedupOptions,
    ) -> Self {
        Self {
            store,
            assessor,
            options,
            disabled_noted: AtomicBool::new(false),
            short_input_noted: AtomicBool::new(false),
        }
    }

    /// Build from configuration, loading any extra lexicon words.
    pub fn from_config(config: &Config, store: Arc<dyn CanonicalStore>) -> Result<Self> {
        let mut lexicon = Lexicon::builtin();
        if let Some(path) = &config.quality.lexicon_path {
            lexicon = lexicon.extend_from_file(path)?;
        }
        Ok(Self::new(
            store,
            QualityAssessor::new(lexicon),
            DedupOptions::from(&config.dedup),
        ))
    }

    pub fn store(&self) -> &Arc<dyn CanonicalStore> {
        &self.store
    }

    pub fn options(&self) -> &DedupOptions {
        &self.options
    }

    /// Compute every fingerprint and score for one document. Pure apart from
    /// reading the file when no file hash was supplied.
    pub fn prepare(&self, document: Document) -> Result<PreparedDocument> {
        prepare_document(&self.assessor, &self.options, document)
    }

    /// [`prepare`](Self::prepare) a batch on the rayon pool from a blocking
    /// task, keeping input order.
    pub async fn prepare_batch(
        &self,
        documents: Vec<Document>,
    ) -> Result<Vec<(String, Result<PreparedDocument>)>> {
        let assessor = self.assessor.clone();
        let options = self.options;
        let prepared = tokio::task::spawn_blocking(move || {
            documents
                .into_par_iter()
                .map(|d| {
                    let label = d.file_path.display().to_string();
                    (label, prepare_document(&assessor, &options, d))
                })
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(prepared)
    }

    /// Prepare, process and log a single document.
    pub async fn ingest(&self, document: Document) -> Result<Outcome> {
        let label = document.file_path.display().to_string();
        let result = match self.prepare(document) {
            Ok(p) => self.process(&p).await,
            Err(e) => Err(e),
        };
        self.log_result(&label, &result, None).await?;
        result
    }

    /// Run a whole batch. Per-document failures are logged and counted;
    /// integrity and database failures abort the run.
    pub async fn run(
        &self,
        documents: Vec<Document>,
        collection: &str,
        progress: &dyn RunProgress,
    ) -> Result<RunSummary> {
        let total = documents.len() as u64;
        let run_id = Uuid::new_v4().to_string();
        info!(%run_id, collection, documents = total, "dedup run started");

        let prepared = self.prepare_batch(documents).await?;
        let mut summary = RunSummary::default();

        for (n, (label, prepared)) in prepared.into_iter().enumerate() {
            let result = match prepared {
                Ok(p) => self.process(&p).await,
                Err(e) => Err(e),
            };
            self.log_result(&label, &result, Some(&run_id)).await?;

            let outcome = match result {
                Ok(outcome) => {
                    summary.record(&outcome);
                    Some(outcome)
                }
                Err(e) if e.is_fatal() => {
                    error!(%run_id, source = %label, error = %e, "aborting run");
                    return Err(e);
                }
                Err(_) => {
                    summary.errors += 1;
                    None
                }
            };

            progress.report(RunEvent::Decided {
                collection,
                n: n as u64 + 1,
                total,
                outcome: outcome.as_ref(),
                tally: &summary,
            });
        }

        info!(
            %run_id,
            collection,
            new_canonical = summary.new_canonical,
            merged_sources = summary.merged_sources,
            promotions = summary.promotions,
            near_duplicate_groups = summary.near_duplicate_groups,
            exact_groups = summary.exact_groups,
            errors = summary.errors,
            "dedup run finished"
        );
        Ok(summary)
    }

    /// Decide the fate of one prepared document and write it to the store.
    pub async fn process(&self, p: &PreparedDocument) -> Result<Outcome> {
        if let Some(existing) = self.store.find_by_content_hash(&p.content_hash).await? {
            return self.attach(existing, p).await;
        }

        let related = self.near_duplicates(p).await?;
        let (canonical, incomplete) = self.build_canonical(p);
        let first_source = self.build_source(p, &canonical.canonical_id);

        match self
            .store
            .insert_or_get_canonical(&canonical, &first_source)
            .await
        {
            Ok(InsertOutcome::Inserted(_)) => {}
            Ok(InsertOutcome::Existing(existing)) => return self.attach(existing, p).await,
            Err(DedupError::DuplicateContentHash(hash)) => {
                debug!(content_hash = %hash, "lost insert race, attaching as source");
                let existing = self.store.find_by_content_hash(&hash).await?.ok_or_else(|| {
                    DedupError::IntegrityViolation(format!(
                        "content hash {} reported as duplicate but not found",
                        hash
                    ))
                })?;
                return self.attach(existing, p).await;
            }
            Err(e) => return Err(e),
        }

        self.store
            .store_page_hashes(&canonical.canonical_id, &p.page_hashes)
            .await?;

        let canonical_id = canonical.canonical_id;
        if related.is_empty() {
            debug!(%canonical_id, "new canonical document");
            return Ok(Outcome::NewCanonical {
                canonical_id,
                incomplete,
            });
        }

        let mut recorded = Vec::with_capacity(related.len());
        for (other, score) in related {
            self.record_pair(
                &canonical_id,
                &other,
                DuplicateType::NearDuplicate,
                DetectionMethod::FuzzyHash,
                score,
            )
            .await?;
            recorded.push((other, score));
        }
        debug!(%canonical_id, related = recorded.len(), "near-duplicate canonical document");
        Ok(Outcome::NearDuplicate {
            canonical_id,
            related: recorded,
            incomplete,
        })
    }

    /// Exact-match branch: attach `p` as a source of `existing`.
    async fn attach(&self, existing: CanonicalDocument, p: &PreparedDocument) -> Result<Outcome> {
        let canonical = self.resolve_merged(existing).await?;
        let canonical_id = canonical.canonical_id.clone();

        let prior = self.store.get_sources(&canonical_id).await?;
        let source = self.build_source(p, &canonical_id);
        if self.store.insert_source(&source).await?.is_none() {
            debug!(%canonical_id, path = %source.file_path, "source already attached");
            return Ok(Outcome::Unchanged { canonical_id });
        }

        let margin = self.options.promotion_margin;
        let promoted = should_promote(canonical.ocr_quality, p.quality, margin)
            && self
                .store
                .promote_representative(
                    &canonical_id,
                    &Promotion {
                        file_hash: p.file_hash.clone(),
                        ocr_quality: p.quality,
                        primary_source: p.document.source_name.clone(),
                        margin,
                    },
                )
                .await?;
        if promoted {
            info!(
                %canonical_id,
                from = ?canonical.ocr_quality,
                to = ?p.quality,
                "promoted higher-quality representative"
            );
        }

        let same_bytes_elsewhere = prior
            .iter()
            .any(|s| s.file_hash == p.file_hash && s.collection != p.document.collection);
        let method = if same_bytes_elsewhere {
            DetectionMethod::FileHash
        } else {
            DetectionMethod::ContentHash
        };
        let created = self
            .store
            .insert_duplicate_group(&DuplicateGroup {
                id: 0,
                canonical_id: canonical_id.clone(),
                related_canonical_id: canonical_id.clone(),
                duplicate_type: DuplicateType::Exact,
                similarity_score: 1.0,
                detection_method: method,
                member_count: prior.len() as i64 + 1,
                created_at: now(),
            })
            .await?;

        Ok(Outcome::MergedSource {
            canonical_id,
            promoted,
            exact_group: created.then_some(method),
        })
    }

    /// Follow `merged_into` links to the record that absorbed this one.
    async fn resolve_merged(&self, mut doc: CanonicalDocument) -> Result<CanonicalDocument> {
        for _ in 0..MAX_MERGE_HOPS {
            let Some(target) = doc.merged_into.clone() else {
                return Ok(doc);
            };
            doc = self.store.get_canonical(&target).await?.ok_or_else(|| {
                DedupError::IntegrityViolation(format!(
                    "{} is merged into missing record {}",
                    doc.canonical_id, target
                ))
            })?;
        }
        Err(DedupError::IntegrityViolation(format!(
            "merge chain from {} exceeds {} hops",
            doc.canonical_id, MAX_MERGE_HOPS
        )))
    }

    /// Stored canonical documents whose fuzzy hash is close enough to `p`.
    async fn near_duplicates(&self, p: &PreparedDocument) -> Result<Vec<(String, f64)>> {
        let hash = match &p.fuzzy {
            FuzzyDigest::Available(h) => h,
            FuzzyDigest::Unavailable(reason) => {
                self.note_fuzzy_unavailable(*reason).await?;
                return Ok(Vec::new());
            }
        };

        let candidates = self.store.fuzzy_candidates().await?;
        let threshold = self.options.near_duplicate_threshold;
        let hash = hash.clone();
        let related = tokio::task::spawn_blocking(move || {
            candidates
                .into_par_iter()
                .filter_map(|c| {
                    let score = hasher::compare_fuzzy(&hash, &c.fuzzy_hash);
                    (score >= threshold).then_some((c.canonical_id, score))
                })
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(related)
    }

    async fn note_fuzzy_unavailable(&self, reason: FuzzyUnavailable) -> Result<()> {
        let flag = match reason {
            FuzzyUnavailable::Disabled => &self.disabled_noted,
            FuzzyUnavailable::InputTooShort => &self.short_input_noted,
        };
        if flag.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        let err = DedupError::FuzzyHashUnavailable(match reason {
            FuzzyUnavailable::Disabled => "disabled; near-duplicate detection skipped".to_string(),
            FuzzyUnavailable::InputTooShort => format!(
                "input shorter than {} bytes; such documents are only matched exactly",
                hasher::MIN_FUZZY_INPUT
            ),
        });
        // Short inputs are expected; only a disabled hasher is an error.
        let entry = match reason {
            FuzzyUnavailable::Disabled => {
                warn!("{}", err);
                ProcessingLogEntry::error("fuzzy_hash", "run", err.to_string())
            }
            FuzzyUnavailable::InputTooShort => {
                info!("{}", err);
                ProcessingLogEntry::success("fuzzy_hash", "run", err.to_string())
            }
        };
        self.store
            .append_log(&entry.with_details(serde_json::json!({ "kind": err.kind() })))
            .await
    }

    fn build_canonical(&self, p: &PreparedDocument) -> (CanonicalDocument, bool) {
        let ex = &p.extracted;
        let completeness = match ex.check_required(&p.document.id) {
            Ok(()) => Completeness::Complete,
            Err(e) => {
                warn!(document = %p.document.id, error = %e, "storing as incomplete");
                Completeness::Incomplete
            }
        };
        let ts = now();
        let doc = CanonicalDocument {
            canonical_id: canonical_id(&p.content_hash),
            content_hash: p.content_hash.clone(),
            file_hash: p.file_hash.clone(),
            fuzzy_hash: p.fuzzy.hash().map(|h| h.as_str().to_string()),
            document_type: ex.document_type.clone(),
            title: ex.title.clone(),
            date: ex.date.clone(),
            from_addr: ex.from.clone(),
            to_addr: ex.to.clone(),
            subject: ex.subject.clone(),
            ocr_quality: p.quality,
            has_redactions: ex.has_redactions,
            completeness,
            page_count: ex.page_count,
            primary_source: p.document.source_name.clone(),
            selection_reason: SelectionReason::FirstSeen,
            merged_into: None,
            created_at: ts,
            updated_at: ts,
        };
        (doc, completeness == Completeness::Incomplete)
    }

    fn build_source(&self, p: &PreparedDocument, canonical_id: &str) -> Source {
        Source {
            id: 0,
            canonical_id: canonical_id.to_string(),
            source_name: p.document.source_name.clone(),
            collection: p.document.collection.clone(),
            file_path: p.source_label(),
            file_hash: p.file_hash.clone(),
            format: p.document.format.clone(),
            quality_score: p.quality,
            downloaded_at: now(),
        }
    }

    async fn record_pair(
        &self,
        a: &str,
        b: &str,
        duplicate_type: DuplicateType,
        method: DetectionMethod,
        score: f64,
    ) -> Result<bool> {
        let (lo, hi) = ordered_pair(a, b);
        self.store
            .insert_duplicate_group(&DuplicateGroup {
                id: 0,
                canonical_id: lo.to_string(),
                related_canonical_id: hi.to_string(),
                duplicate_type,
                similarity_score: score,
                detection_method: method,
                member_count: 2,
                created_at: now(),
            })
            .await
    }

    async fn log_result(
        &self,
        label: &str,
        result: &Result<Outcome>,
        run_id: Option<&str>,
    ) -> Result<()> {
        let mut entry = match result {
            Ok(outcome) => ProcessingLogEntry::success("ingest", label, outcome.as_str())
                .with_details(serde_json::to_value(outcome)?),
            Err(e) => {
                warn!(source = %label, error = %e, "document failed");
                ProcessingLogEntry::error("ingest", label, e.to_string())
                    .with_details(serde_json::json!({ "kind": e.kind() }))
            }
        };
        if let (Some(id), Some(details)) = (run_id, entry.details.as_object_mut()) {
            details.insert("run_id".to_string(), serde_json::Value::from(id));
        }
        match self.store.append_log(&entry).await {
            Ok(()) => Ok(()),
            // The run is already aborting on the original error.
            Err(log_err) if result.as_ref().is_err_and(|e| e.is_fatal()) => {
                error!(error = %log_err, "could not record failure in processing log");
                Ok(())
            }
            Err(log_err) => Err(log_err),
        }
    }

    /// Batch pass over the whole store: fuzzy rescan for near-duplicates
    /// found after the fact, and pairwise page overlap between canonical
    /// documents of the same type. Idempotent.
    pub async fn scan(&self) -> Result<ScanSummary> {
        let documents = self.store.list_canonical_documents(None).await?;
        let mut summary = ScanSummary {
            documents: documents.len() as u64,
            ..ScanSummary::default()
        };
        info!(documents = summary.documents, "batch scan started");

        if self.options.fuzzy_enabled && hasher::fuzzy_supported() {
            let candidates = self.store.fuzzy_candidates().await?;
            let threshold = self.options.near_duplicate_threshold;
            summary.fuzzy_pairs_compared =
                (candidates.len() * candidates.len().saturating_sub(1) / 2) as u64;

            let matches = tokio::task::spawn_blocking(move || {
                fuzzy_pairs(&candidates, threshold)
            })
            .await?;

            for (a, b, score) in matches {
                if self
                    .record_pair(&a, &b, DuplicateType::NearDuplicate, DetectionMethod::FuzzyHash, score)
                    .await?
                {
                    summary.near_duplicate_groups_created += 1;
                }
            }
        } else {
            self.note_fuzzy_unavailable(FuzzyUnavailable::Disabled).await?;
        }

        let mut by_type: BTreeMap<String, Vec<(String, BTreeMap<u32, String>)>> = BTreeMap::new();
        for doc in &documents {
            let pages = self.store.page_hashes(&doc.canonical_id).await?;
            if !pages.is_empty() {
                by_type
                    .entry(doc.document_type.clone())
                    .or_default()
                    .push((doc.canonical_id.clone(), pages));
            }
        }
        summary.page_pairs_compared = by_type
            .values()
            .map(|g| (g.len() * g.len().saturating_sub(1) / 2) as u64)
            .sum();

        let threshold = self.options.partial_overlap_threshold;
        let overlaps = tokio::task::spawn_blocking(move || {
            by_type
                .values()
                .flat_map(|group| page_overlaps(group, threshold))
                .collect::<Vec<_>>()
        })
        .await?;

        for (a, b, score) in overlaps {
            if self
                .record_pair(
                    &a,
                    &b,
                    DuplicateType::PartialOverlap,
                    DetectionMethod::PageOverlap,
                    score,
                )
                .await?
            {
                summary.partial_overlap_groups_created += 1;
            }
        }

        self.store
            .append_log(
                &ProcessingLogEntry::success("scan", "store", "batch scan complete")
                    .with_details(serde_json::to_value(&summary)?),
            )
            .await?;
        info!(
            near_duplicate_groups = summary.near_duplicate_groups_created,
            partial_overlap_groups = summary.partial_overlap_groups_created,
            "batch scan finished"
        );
        Ok(summary)
    }

    /// Fold canonical document `from` into `into`.
    pub async fn merge(&self, from: &str, into: &str) -> Result<MergeSummary> {
        if from == into {
            return Err(DedupError::IntegrityViolation(format!(
                "cannot merge {} into itself",
                from
            )));
        }
        let source = self
            .store
            .get_canonical(from)
            .await?
            .ok_or_else(|| DedupError::NotFound(from.to_string()))?;
        let target = self
            .store
            .get_canonical(into)
            .await?
            .ok_or_else(|| DedupError::NotFound(into.to_string()))?;
        if let Some(other) = source.merged_into.as_deref() {
            return Err(DedupError::IntegrityViolation(format!(
                "{} is already merged into {}",
                from, other
            )));
        }
        if let Some(other) = target.merged_into.as_deref() {
            return Err(DedupError::IntegrityViolation(format!(
                "{} is merged into {}; merge into that record instead",
                into, other
            )));
        }

        let summary = self.store.merge_canonical(from, into).await?;
        self.store
            .append_log(
                &ProcessingLogEntry::success("merge", from, format!("merged into {}", into))
                    .with_details(serde_json::json!({
                        "from": from,
                        "into": into,
                        "sources_moved": summary.sources_moved,
                    })),
            )
            .await?;
        info!(from, into, sources_moved = summary.sources_moved, "merged canonical documents");
        Ok(summary)
    }

    /// Run the store's integrity check and record the result.
    pub async fn verify(&self) -> Result<IntegrityReport> {
        let report = self.store.check_integrity().await?;
        let entry = if report.is_clean() {
            ProcessingLogEntry::success("verify", "store", "integrity check passed")
        } else {
            warn!(?report, "integrity check failed");
            ProcessingLogEntry::error("verify", "store", "integrity check failed")
                .with_details(serde_json::to_value(&report)?)
        };
        self.store.append_log(&entry).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::store::memory::InMemoryStore;

    fn dedup_with(options: DedupOptions) -> Deduplicator {
        Deduplicator::new(
            Arc::new(InMemoryStore::new()),
            QualityAssessor::default(),
            options,
        )
    }

    fn dedup() -> Deduplicator {
        dedup_with(DedupOptions::default())
    }

    fn doc(path: &str, text: &str, collection: &str) -> Document {
        Document::new(path, path, text, collection)
            .with_type("memo")
            .with_file_hash(hasher::hash_bytes(text.as_bytes()))
    }

    #[test]
    fn promotion_policy() {
        assert!(should_promote(Some(0.60), Some(0.95), 0.05));
        assert!(!should_promote(Some(0.80), Some(0.84), 0.05));
        assert!(!should_promote(Some(0.80), Some(0.80), 0.05));
        assert!(!should_promote(Some(0.95), Some(0.60), 0.05));
        assert!(should_promote(None, Some(0.1), 0.05));
        assert!(!should_promote(Some(0.5), None, 0.05));
    }

    #[tokio::test]
    async fn normalization_variants_collapse_with_promotion() {
        let d = dedup();
        let first = d
            .ingest(doc("/a/memo.txt", "Meeting  Notes\nQ3 budget", "vol1").with_quality(0.60))
            .await
            .unwrap();
        let second = d
            .ingest(doc("/b/memo.txt", "meeting notes q3   BUDGET", "vol2").with_quality(0.95))
            .await
            .unwrap();

        assert!(matches!(first, Outcome::NewCanonical { .. }));
        assert!(matches!(
            second,
            Outcome::MergedSource { promoted: true, .. }
        ));
        assert_eq!(first.canonical_id(), second.canonical_id());

        let stats = d.store().get_statistics().await.unwrap();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_sources, 2);

        let canonical = d
            .store()
            .get_canonical(first.canonical_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(canonical.ocr_quality, Some(0.95));
        assert_eq!(canonical.primary_source, "vol2");
        assert_eq!(canonical.selection_reason, SelectionReason::HigherQualitySource);
    }

    #[tokio::test]
    async fn lower_quality_copy_keeps_first_seen() {
        let d = dedup();
        d.ingest(doc("/a.txt", "Same text here", "vol1").with_quality(0.90))
            .await
            .unwrap();
        let out = d
            .ingest(doc("/b.txt", "same text here", "vol2").with_quality(0.93))
            .await
            .unwrap();
        assert!(matches!(out, Outcome::MergedSource { promoted: false, .. }));
        let c = d
            .store()
            .get_canonical(out.canonical_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.primary_source, "vol1");
        assert_eq!(c.selection_reason, SelectionReason::FirstSeen);
    }

    #[tokio::test]
    async fn identical_bytes_across_collections_form_file_hash_group() {
        let d = dedup();
        d.ingest(doc("/vol1/x.txt", "Flight manifest, 2002.", "vol1"))
            .await
            .unwrap();
        let out = d
            .ingest(doc("/vol2/x.txt", "Flight manifest, 2002.", "vol2"))
            .await
            .unwrap();
        assert!(matches!(
            out,
            Outcome::MergedSource {
                exact_group: Some(DetectionMethod::FileHash),
                ..
            }
        ));
        let groups = d.store().list_duplicate_groups(None).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].duplicate_type, DuplicateType::Exact);
        assert_eq!(groups[0].detection_method, DetectionMethod::FileHash);
        assert_eq!(groups[0].member_count, 2);
    }

    #[tokio::test]
    async fn reingest_is_idempotent() {
        let d = dedup();
        let a = doc("/vol1/x.txt", "Some archival text.", "vol1");
        d.ingest(a.clone()).await.unwrap();
        let again = d.ingest(a).await.unwrap();
        assert!(matches!(again, Outcome::Unchanged { .. }));

        let stats = d.store().get_statistics().await.unwrap();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_sources, 1);
        assert_eq!(stats.duplicate_groups, 0);
    }

    #[tokio::test]
    async fn missing_file_is_a_per_document_error() {
        let d = dedup();
        let missing = Document::new("m", "/definitely/not/here.txt", "text", "vol1");
        let err = d.ingest(missing).await.unwrap_err();
        assert!(matches!(err, DedupError::Io { .. }));

        let log = d
            .store()
            .list_log(Some(crate::models::LogStatus::Error), 10)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].details["kind"], "io_error");
    }

    #[tokio::test]
    async fn run_counts_errors_without_aborting() {
        let d = dedup();
        let docs = vec![
            doc("/1.txt", "alpha document", "vol1"),
            Document::new("m", "/definitely/not/here.txt", "x", "vol1"),
            doc("/2.txt", "ALPHA   document", "vol1"),
        ];
        let summary = d.run(docs, "vol1", &NoProgress).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.new_canonical, 1);
        assert_eq!(summary.merged_sources, 1);
        assert_eq!(summary.exact_groups, 1);
        assert_eq!(summary.errors, 1);
        assert!(summary.has_errors());
    }

    #[derive(Default)]
    struct Recorded(std::sync::Mutex<Vec<(u64, &'static str, u64, u64)>>);

    impl RunProgress for Recorded {
        fn report(&self, event: RunEvent<'_>) {
            if let RunEvent::Decided {
                n, outcome, tally, ..
            } = event
            {
                let kind = outcome.map_or("error", Outcome::as_str);
                self.0
                    .lock()
                    .unwrap()
                    .push((n, kind, tally.merged_sources, tally.errors));
            }
        }
    }

    #[tokio::test]
    async fn run_reports_each_outcome_with_running_tally() {
        let d = dedup();
        let docs = vec![
            doc("/1.txt", "alpha document", "vol1"),
            Document::new("m", "/definitely/not/here.txt", "x", "vol1"),
            doc("/2.txt", "ALPHA   document", "vol1"),
        ];
        let progress = Recorded::default();
        d.run(docs, "vol1", &progress).await.unwrap();

        let events = progress.0.into_inner().unwrap();
        assert_eq!(
            events,
            vec![
                (1, "new_canonical", 0, 0),
                (2, "error", 0, 1),
                (3, "merged_source", 1, 1),
            ]
        );
    }

    #[tokio::test]
    async fn batch_preparation_leaves_the_runtime_free() {
        use std::sync::atomic::AtomicUsize;

        let d = dedup();
        let body = "Ledger line for the hangar account, item received and filed.\n".repeat(300);
        let docs: Vec<Document> = (0..200)
            .map(|i| doc(&format!("/{i}.txt"), &format!("{i}\n{body}"), "v"))
            .collect();

        // Single-threaded runtime: the ticker only runs while the batch is
        // awaited off-thread.
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                t.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        });
        let prepared = d.prepare_batch(docs).await.unwrap();
        ticker.abort();

        assert_eq!(prepared.len(), 200);
        assert!(prepared.iter().all(|(_, p)| p.is_ok()));
        assert!(ticks.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test]
    async fn blank_text_is_stored_incomplete() {
        let d = dedup();
        let blank = Document::new("b", "/b.txt", "  ", "vol1").with_file_hash("sha256:00");
        let out = d.ingest(blank).await.unwrap();
        assert!(matches!(
            out,
            Outcome::NewCanonical {
                incomplete: true,
                ..
            }
        ));
        let c = d
            .store()
            .get_canonical(out.canonical_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.completeness, Completeness::Incomplete);
    }

    #[tokio::test]
    async fn fuzzy_disabled_is_noted_once() {
        let d = dedup_with(DedupOptions {
            fuzzy_enabled: false,
            ..DedupOptions::default()
        });
        d.ingest(doc("/1.txt", "one", "v")).await.unwrap();
        d.ingest(doc("/2.txt", "two", "v")).await.unwrap();
        let errors = d
            .store()
            .list_log(Some(crate::models::LogStatus::Error), 10)
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].operation, "fuzzy_hash");
    }

    #[cfg(feature = "fuzzy")]
    #[tokio::test]
    async fn short_inputs_are_noted_without_an_error_entry() {
        let d = dedup();
        d.ingest(doc("/1.txt", "a short note", "v")).await.unwrap();
        d.ingest(doc("/2.txt", "another short note", "v")).await.unwrap();

        let errors = d
            .store()
            .list_log(Some(crate::models::LogStatus::Error), 10)
            .await
            .unwrap();
        assert!(errors.is_empty(), "{:?}", errors);

        let notes: Vec<_> = d
            .store()
            .list_log(Some(crate::models::LogStatus::Success), 10)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.operation == "fuzzy_hash")
            .collect();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].details["kind"], "fuzzy_hash_unavailable");
    }

    #[tokio::test]
    async fn merge_rejects_self_and_chains() {
        let d = dedup();
        let a = d.ingest(doc("/a.txt", "first text", "v")).await.unwrap();
        let b = d.ingest(doc("/b.txt", "second text", "v")).await.unwrap();
        let c = d.ingest(doc("/c.txt", "third text", "v")).await.unwrap();

        assert!(d.merge(a.canonical_id(), a.canonical_id()).await.is_err());
        d.merge(a.canonical_id(), b.canonical_id()).await.unwrap();
        assert!(d.merge(c.canonical_id(), a.canonical_id()).await.is_err());
        assert!(d.merge(a.canonical_id(), c.canonical_id()).await.is_err());

        // Re-ingesting merged content lands on the surviving record.
        let again = d.ingest(doc("/a2.txt", "First  text", "v2")).await.unwrap();
        assert_eq!(again.canonical_id(), b.canonical_id());
        assert!(d.verify().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn concurrent_ingest_of_same_content_yields_one_canonical() {
        let d = Arc::new(dedup());
        let mut handles = Vec::new();
        for i in 0..8 {
            let d = Arc::clone(&d);
            handles.push(tokio::spawn(async move {
                d.ingest(doc(&format!("/copy{}.txt", i), "Shared content body", "v"))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let stats = d.store().get_statistics().await.unwrap();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_sources, 8);
        assert!(d.verify().await.unwrap().is_clean());
    }
}
