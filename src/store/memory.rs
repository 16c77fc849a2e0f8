//! In-memory [`CanonicalStore`] implementation for tests and embedding.
//!
//! All state sits behind one `std::sync::RwLock`, so every trait method is
//! a consistent snapshot and `insert_or_get_canonical` is a single
//! check-and-insert under the write lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::dedup::should_promote;
use crate::error::{DedupError, Result};
use crate::hasher::FuzzyHash;
use crate::models::{
    CanonicalDocument, DuplicateGroup, DuplicateType, IntegrityReport, LogStatus,
    ProcessingLogEntry, SelectionReason, Source, Statistics,
};

use super::{
    quality_bucket, CanonicalStore, FuzzyCandidate, InsertOutcome, MergeSummary, Promotion,
};

#[derive(Default)]
struct State {
    canonicals: Vec<CanonicalDocument>,
    by_hash: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    sources: Vec<Source>,
    groups: Vec<DuplicateGroup>,
    log: Vec<ProcessingLogEntry>,
    pages: HashMap<String, BTreeMap<u32, String>>,
    next_source_id: i64,
    next_group_id: i64,
    next_log_id: i64,
}

impl State {
    fn canonical(&self, id: &str) -> Option<&CanonicalDocument> {
        self.by_id.get(id).map(|&i| &self.canonicals[i])
    }

    fn check_collision(&self, doc: &CanonicalDocument) -> Result<()> {
        match self.canonical(&doc.canonical_id) {
            Some(existing) if existing.content_hash != doc.content_hash => {
                Err(DedupError::CanonicalIdCollision {
                    canonical_id: doc.canonical_id.clone(),
                    existing: existing.content_hash.clone(),
                    incoming: doc.content_hash.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn insert_pair(&mut self, doc: &CanonicalDocument, first_source: &Source) {
        let idx = self.canonicals.len();
        self.canonicals.push(doc.clone());
        self.by_hash.insert(doc.content_hash.clone(), idx);
        self.by_id.insert(doc.canonical_id.clone(), idx);
        self.push_source(first_source);
    }

    fn push_source(&mut self, source: &Source) -> i64 {
        self.next_source_id += 1;
        let mut s = source.clone();
        s.id = self.next_source_id;
        self.sources.push(s);
        self.next_source_id
    }
}

/// In-memory store.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CanonicalStore for InMemoryStore {
    async fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<CanonicalDocument>> {
        let state = self.state.read().unwrap();
        Ok(state
            .by_hash
            .get(content_hash)
            .map(|&i| state.canonicals[i].clone()))
    }

    async fn get_canonical(&self, canonical_id: &str) -> Result<Option<CanonicalDocument>> {
        let state = self.state.read().unwrap();
        Ok(state.canonical(canonical_id).cloned())
    }

    async fn insert_canonical_document(
        &self,
        doc: &CanonicalDocument,
        first_source: &Source,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.by_hash.contains_key(&doc.content_hash) {
            return Err(DedupError::DuplicateContentHash(doc.content_hash.clone()));
        }
        state.check_collision(doc)?;
        state.insert_pair(doc, first_source);
        Ok(())
    }

    async fn insert_or_get_canonical(
        &self,
        doc: &CanonicalDocument,
        first_source: &Source,
    ) -> Result<InsertOutcome> {
        let mut state = self.state.write().unwrap();
        if let Some(&i) = state.by_hash.get(&doc.content_hash) {
            return Ok(InsertOutcome::Existing(state.canonicals[i].clone()));
        }
        state.check_collision(doc)?;
        state.insert_pair(doc, first_source);
        Ok(InsertOutcome::Inserted(doc.clone()))
    }

    async fn promote_representative(
        &self,
        canonical_id: &str,
        promotion: &Promotion,
    ) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        let idx = *state
            .by_id
            .get(canonical_id)
            .ok_or_else(|| DedupError::NotFound(canonical_id.to_string()))?;
        let doc = &mut state.canonicals[idx];
        if !should_promote(doc.ocr_quality, promotion.ocr_quality, promotion.margin) {
            return Ok(false);
        }
        doc.file_hash = promotion.file_hash.clone();
        doc.ocr_quality = promotion.ocr_quality;
        doc.primary_source = promotion.primary_source.clone();
        doc.selection_reason = SelectionReason::HigherQualitySource;
        doc.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }

    async fn insert_source(&self, source: &Source) -> Result<Option<i64>> {
        let mut state = self.state.write().unwrap();
        if !state.by_id.contains_key(&source.canonical_id) {
            return Err(DedupError::IntegrityViolation(format!(
                "source {} references unknown canonical id {}",
                source.file_path, source.canonical_id
            )));
        }
        let exists = state
            .sources
            .iter()
            .any(|s| s.canonical_id == source.canonical_id && s.file_path == source.file_path);
        if exists {
            return Ok(None);
        }
        Ok(Some(state.push_source(source)))
    }

    async fn get_sources(&self, canonical_id: &str) -> Result<Vec<Source>> {
        let state = self.state.read().unwrap();
        Ok(state
            .sources
            .iter()
            .filter(|s| s.canonical_id == canonical_id)
            .cloned()
            .collect())
    }

    async fn find_by_file_hash(&self, file_hash: &str) -> Result<Vec<Source>> {
        let state = self.state.read().unwrap();
        Ok(state
            .sources
            .iter()
            .filter(|s| s.file_hash == file_hash)
            .cloned()
            .collect())
    }

    async fn insert_duplicate_group(&self, group: &DuplicateGroup) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        for id in [&group.canonical_id, &group.related_canonical_id] {
            if !state.by_id.contains_key(id) {
                return Err(DedupError::IntegrityViolation(format!(
                    "duplicate group references unknown canonical id {}",
                    id
                )));
            }
        }
        if let Some(existing) = state.groups.iter_mut().find(|g| {
            g.canonical_id == group.canonical_id
                && g.related_canonical_id == group.related_canonical_id
                && g.detection_method == group.detection_method
        }) {
            existing.similarity_score = group.similarity_score;
            existing.member_count = group.member_count;
            return Ok(false);
        }
        state.next_group_id += 1;
        let mut g = group.clone();
        g.id = state.next_group_id;
        state.groups.push(g);
        Ok(true)
    }

    async fn list_duplicate_groups(
        &self,
        duplicate_type: Option<DuplicateType>,
    ) -> Result<Vec<DuplicateGroup>> {
        let state = self.state.read().unwrap();
        Ok(state
            .groups
            .iter()
            .filter(|g| duplicate_type.map_or(true, |t| g.duplicate_type == t))
            .cloned()
            .collect())
    }

    async fn groups_for(&self, canonical_id: &str) -> Result<Vec<DuplicateGroup>> {
        let state = self.state.read().unwrap();
        Ok(state
            .groups
            .iter()
            .filter(|g| g.canonical_id == canonical_id || g.related_canonical_id == canonical_id)
            .cloned()
            .collect())
    }

    async fn append_log(&self, entry: &ProcessingLogEntry) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.next_log_id += 1;
        let mut e = entry.clone();
        e.id = state.next_log_id;
        state.log.push(e);
        Ok(())
    }

    async fn list_log(
        &self,
        status: Option<LogStatus>,
        limit: usize,
    ) -> Result<Vec<ProcessingLogEntry>> {
        let state = self.state.read().unwrap();
        Ok(state
            .log
            .iter()
            .rev()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fuzzy_candidates(&self) -> Result<Vec<FuzzyCandidate>> {
        let state = self.state.read().unwrap();
        Ok(state
            .canonicals
            .iter()
            .filter(|c| c.is_active())
            .filter_map(|c| {
                let hash = FuzzyHash::parse(c.fuzzy_hash.as_deref()?)?;
                Some(FuzzyCandidate {
                    canonical_id: c.canonical_id.clone(),
                    document_type: c.document_type.clone(),
                    fuzzy_hash: hash,
                })
            })
            .collect())
    }

    async fn store_page_hashes(
        &self,
        canonical_id: &str,
        pages: &BTreeMap<u32, String>,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.pages.insert(canonical_id.to_string(), pages.clone());
        Ok(())
    }

    async fn page_hashes(&self, canonical_id: &str) -> Result<BTreeMap<u32, String>> {
        let state = self.state.read().unwrap();
        Ok(state.pages.get(canonical_id).cloned().unwrap_or_default())
    }

    async fn list_canonical_documents(
        &self,
        document_type: Option<&str>,
    ) -> Result<Vec<CanonicalDocument>> {
        let state = self.state.read().unwrap();
        Ok(state
            .canonicals
            .iter()
            .filter(|c| c.is_active())
            .filter(|c| document_type.map_or(true, |t| c.document_type == t))
            .cloned()
            .collect())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CanonicalDocument>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().unwrap();
        let matches = |field: &Option<String>| {
            field
                .as_deref()
                .map_or(false, |v| v.to_lowercase().contains(&needle))
        };
        Ok(state
            .canonicals
            .iter()
            .filter(|c| c.is_active() && (matches(&c.title) || matches(&c.subject)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn merge_canonical(&self, from: &str, into: &str) -> Result<MergeSummary> {
        let mut state = self.state.write().unwrap();
        let from_idx = *state
            .by_id
            .get(from)
            .ok_or_else(|| DedupError::NotFound(from.to_string()))?;
        if !state.by_id.contains_key(into) {
            return Err(DedupError::NotFound(into.to_string()));
        }

        let existing_paths: Vec<String> = state
            .sources
            .iter()
            .filter(|s| s.canonical_id == into)
            .map(|s| s.file_path.clone())
            .collect();
        let mut moved = 0u64;
        for s in state.sources.iter_mut() {
            if s.canonical_id == from && !existing_paths.contains(&s.file_path) {
                s.canonical_id = into.to_string();
                moved += 1;
            }
        }

        let doc = &mut state.canonicals[from_idx];
        doc.merged_into = Some(into.to_string());
        doc.selection_reason = SelectionReason::Merged;
        doc.updated_at = chrono::Utc::now().timestamp();

        Ok(MergeSummary {
            sources_moved: moved,
        })
    }

    async fn check_integrity(&self) -> Result<IntegrityReport> {
        let state = self.state.read().unwrap();
        let mut report = IntegrityReport::default();

        for s in &state.sources {
            if !state.by_id.contains_key(&s.canonical_id) {
                report.orphan_sources.push(s.id);
            }
        }
        for c in state.canonicals.iter().filter(|c| c.is_active()) {
            if !state.sources.iter().any(|s| s.canonical_id == c.canonical_id) {
                report.canonicals_without_sources.push(c.canonical_id.clone());
            }
        }
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for c in &state.canonicals {
            *seen.entry(c.content_hash.as_str()).or_default() += 1;
        }
        report.duplicate_content_hashes = seen
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(h, _)| h.to_string())
            .collect();
        report.duplicate_content_hashes.sort();

        Ok(report)
    }

    async fn get_statistics(&self) -> Result<Statistics> {
        let state = self.state.read().unwrap();
        let active: Vec<&CanonicalDocument> =
            state.canonicals.iter().filter(|c| c.is_active()).collect();

        let mut stats = Statistics {
            total_documents: active.len() as i64,
            total_sources: state
                .sources
                .iter()
                .filter(|s| {
                    state
                        .by_id
                        .get(&s.canonical_id)
                        .is_some_and(|&i| state.canonicals[i].is_active())
                })
                .count() as i64,
            duplicate_groups: state.groups.len() as i64,
            ..Statistics::default()
        };
        if stats.total_documents > 0 {
            stats.avg_sources_per_doc = stats.total_sources as f64 / stats.total_documents as f64;
        }
        for c in active {
            *stats
                .documents_by_type
                .entry(c.document_type.clone())
                .or_default() += 1;
            *stats
                .documents_by_quality
                .entry(quality_bucket(c.ocr_quality).to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Completeness;

    fn canonical(id: &str, hash: &str, quality: Option<f64>) -> CanonicalDocument {
        CanonicalDocument {
            canonical_id: id.to_string(),
            content_hash: hash.to_string(),
            file_hash: format!("sha256:file-{}", id),
            fuzzy_hash: None,
            document_type: "memo".to_string(),
            title: None,
            date: None,
            from_addr: None,
            to_addr: None,
            subject: None,
            ocr_quality: quality,
            has_redactions: false,
            completeness: Completeness::Complete,
            page_count: 1,
            primary_source: "vol1".to_string(),
            selection_reason: SelectionReason::FirstSeen,
            merged_into: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn source(canonical_id: &str, path: &str) -> Source {
        Source {
            id: 0,
            canonical_id: canonical_id.to_string(),
            source_name: "vol1".to_string(),
            collection: "vol1".to_string(),
            file_path: path.to_string(),
            file_hash: "sha256:f".to_string(),
            format: "txt".to_string(),
            quality_score: None,
            downloaded_at: 0,
        }
    }

    fn promotion(q: Option<f64>) -> Promotion {
        Promotion {
            file_hash: "sha256:better".to_string(),
            ocr_quality: q,
            primary_source: "vol2".to_string(),
            margin: 0.05,
        }
    }

    #[tokio::test]
    async fn promotion_rechecks_quality_under_lock() {
        let store = InMemoryStore::new();
        let doc = canonical("doc_aaaaaaaaaaaa", "sha256:aaaa", None);
        store
            .insert_canonical_document(&doc, &source(&doc.canonical_id, "/a.txt"))
            .await
            .unwrap();

        assert!(!store
            .promote_representative(&doc.canonical_id, &promotion(None))
            .await
            .unwrap());
        assert!(store
            .promote_representative(&doc.canonical_id, &promotion(Some(0.9)))
            .await
            .unwrap());
        assert!(!store
            .promote_representative(&doc.canonical_id, &promotion(Some(0.6)))
            .await
            .unwrap());

        let stored = store.get_canonical(&doc.canonical_id).await.unwrap().unwrap();
        assert_eq!(stored.ocr_quality, Some(0.9));
        assert_eq!(stored.primary_source, "vol2");
    }

    #[tokio::test]
    async fn statistics_skip_sources_left_on_merged_documents() {
        let store = InMemoryStore::new();
        let a = canonical("doc_aaaaaaaaaaaa", "sha256:aaaa", Some(0.8));
        let b = canonical("doc_bbbbbbbbbbbb", "sha256:bbbb", Some(0.8));
        store
            .insert_canonical_document(&a, &source(&a.canonical_id, "/a.txt"))
            .await
            .unwrap();
        store
            .insert_canonical_document(&b, &source(&b.canonical_id, "/b.txt"))
            .await
            .unwrap();
        store
            .insert_source(&source(&b.canonical_id, "/a.txt"))
            .await
            .unwrap();

        // "/a.txt" is already on the target, so it stays behind on the merged record.
        let summary = store
            .merge_canonical(&b.canonical_id, &a.canonical_id)
            .await
            .unwrap();
        assert_eq!(summary.sources_moved, 1);

        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_sources, 2);
        assert!((stats.avg_sources_per_doc - 2.0).abs() < 1e-9);
    }
}
