//! Core data models for the canonicalization engine.
//!
//! [`Document`] is the ephemeral input handed over by the extraction
//! collaborator. [`CanonicalDocument`], [`Source`], [`DuplicateGroup`] and
//! [`ProcessingLogEntry`] are the four persisted record kinds.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::error::DedupError;

/// Metadata the extraction step may already know about a document.
///
/// Any field left empty is filled in by [`crate::extract::enrich`] from the
/// text itself where possible.
#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub page_count: Option<i64>,
    pub has_redactions: Option<bool>,
}

/// One physical copy of a document, as produced by the extraction pipeline.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub file_path: PathBuf,
    pub extracted_text: String,
    /// Raw-byte digest when the caller already has it; otherwise the file
    /// at `file_path` is hashed.
    pub file_hash: Option<String>,
    pub document_type: Option<String>,
    /// Collection label, e.g. `"house-oversight-2025"`.
    pub collection: String,
    /// Provenance name recorded as `primary_source` when this copy wins.
    pub source_name: String,
    /// File format tag (`txt`, `md`, `ocr`, `pdf`, ...).
    pub format: String,
    /// Quality score already known from the OCR engine. When absent and the
    /// text is OCR-derived, the deduplicator assesses it.
    pub ocr_quality: Option<f64>,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Build a document from a path and its text, deriving the format from
    /// the file extension.
    pub fn new(
        id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        extracted_text: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let format = file_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "txt".to_string());
        let collection = collection.into();
        Self {
            id: id.into(),
            file_path,
            extracted_text: extracted_text.into(),
            file_hash: None,
            document_type: None,
            source_name: collection.clone(),
            collection,
            format,
            ocr_quality: None,
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    pub fn with_file_hash(mut self, file_hash: impl Into<String>) -> Self {
        self.file_hash = Some(file_hash.into());
        self
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.ocr_quality = Some(score);
        self
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    /// Whether the text came from OCR or a text-ish export, and so is worth
    /// scoring for OCR quality.
    pub fn is_text_derived(&self) -> bool {
        matches!(self.format.as_str(), "txt" | "md" | "markdown" | "ocr")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    FirstSeen,
    HigherQualitySource,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateType {
    Exact,
    NearDuplicate,
    PartialOverlap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    FileHash,
    ContentHash,
    FuzzyHash,
    PageOverlap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
}

impl Completeness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completeness::Complete => "complete",
            Completeness::Incomplete => "incomplete",
        }
    }
}

impl SelectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionReason::FirstSeen => "first_seen",
            SelectionReason::HigherQualitySource => "higher_quality_source",
            SelectionReason::Merged => "merged",
        }
    }
}

impl DuplicateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateType::Exact => "exact",
            DuplicateType::NearDuplicate => "near_duplicate",
            DuplicateType::PartialOverlap => "partial_overlap",
        }
    }
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::FileHash => "file_hash",
            DetectionMethod::ContentHash => "content_hash",
            DetectionMethod::FuzzyHash => "fuzzy_hash",
            DetectionMethod::PageOverlap => "page_overlap",
        }
    }
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }
}

fn unknown(kind: &str, value: &str) -> DedupError {
    DedupError::IntegrityViolation(format!("unknown {} '{}'", kind, value))
}

impl FromStr for Completeness {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(Completeness::Complete),
            "incomplete" => Ok(Completeness::Incomplete),
            other => Err(unknown("completeness", other)),
        }
    }
}

impl FromStr for SelectionReason {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_seen" => Ok(SelectionReason::FirstSeen),
            "higher_quality_source" => Ok(SelectionReason::HigherQualitySource),
            "merged" => Ok(SelectionReason::Merged),
            other => Err(unknown("selection reason", other)),
        }
    }
}

impl FromStr for DuplicateType {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(DuplicateType::Exact),
            "near_duplicate" => Ok(DuplicateType::NearDuplicate),
            "partial_overlap" => Ok(DuplicateType::PartialOverlap),
            other => Err(unknown("duplicate type", other)),
        }
    }
}

impl FromStr for DetectionMethod {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_hash" => Ok(DetectionMethod::FileHash),
            "content_hash" => Ok(DetectionMethod::ContentHash),
            "fuzzy_hash" => Ok(DetectionMethod::FuzzyHash),
            "page_overlap" => Ok(DetectionMethod::PageOverlap),
            other => Err(unknown("detection method", other)),
        }
    }
}

impl FromStr for LogStatus {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "error" => Ok(LogStatus::Error),
            other => Err(unknown("log status", other)),
        }
    }
}

impl fmt::Display for DuplicateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// The single authoritative record for one distinct normalized content.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalDocument {
    pub canonical_id: String,
    pub content_hash: String,
    /// File hash of the copy currently treated as primary.
    pub file_hash: String,
    pub fuzzy_hash: Option<String>,
    pub document_type: String,
    pub title: Option<String>,
    pub date: Option<String>,
    pub from_addr: Option<String>,
    pub to_addr: Option<String>,
    pub subject: Option<String>,
    pub ocr_quality: Option<f64>,
    pub has_redactions: bool,
    pub completeness: Completeness,
    pub page_count: i64,
    pub primary_source: String,
    pub selection_reason: SelectionReason,
    /// Set once this record has been folded into another by an explicit merge.
    pub merged_into: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CanonicalDocument {
    pub fn is_active(&self) -> bool {
        self.merged_into.is_none()
    }
}

/// One physical copy pointing at a canonical document.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    /// Insertion sequence; assigned by the store, `0` before insert.
    pub id: i64,
    pub canonical_id: String,
    pub source_name: String,
    pub collection: String,
    pub file_path: String,
    pub file_hash: String,
    pub format: String,
    pub quality_score: Option<f64>,
    pub downloaded_at: i64,
}

/// A detected relationship between copies or canonical documents.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub id: i64,
    pub canonical_id: String,
    /// Other side of the relation. Equal to `canonical_id` for exact groups,
    /// which relate source copies of the same canonical document.
    pub related_canonical_id: String,
    pub duplicate_type: DuplicateType,
    pub similarity_score: f64,
    pub detection_method: DetectionMethod,
    pub member_count: i64,
    pub created_at: i64,
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingLogEntry {
    pub id: i64,
    pub operation: String,
    pub source: String,
    pub status: LogStatus,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: i64,
}

impl ProcessingLogEntry {
    pub fn success(operation: &str, source: &str, message: impl Into<String>) -> Self {
        Self::new(operation, source, LogStatus::Success, message)
    }

    pub fn error(operation: &str, source: &str, message: impl Into<String>) -> Self {
        Self::new(operation, source, LogStatus::Error, message)
    }

    fn new(operation: &str, source: &str, status: LogStatus, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            operation: operation.to_string(),
            source: source.to_string(),
            status,
            message: message.into(),
            details: serde_json::json!({}),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Store-wide summary returned by `get_statistics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub total_documents: i64,
    pub total_sources: i64,
    pub duplicate_groups: i64,
    pub avg_sources_per_doc: f64,
    pub documents_by_type: BTreeMap<String, i64>,
    pub documents_by_quality: BTreeMap<String, i64>,
}

/// Result of an integrity sweep over the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub orphan_sources: Vec<i64>,
    pub canonicals_without_sources: Vec<String>,
    pub duplicate_content_hashes: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_sources.is_empty()
            && self.canonicals_without_sources.is_empty()
            && self.duplicate_content_hashes.is_empty()
    }
}
