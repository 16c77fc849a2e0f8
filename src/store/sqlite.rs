//! SQLite-backed [`CanonicalStore`] implementation.
//!
//! Uniqueness is enforced by the schema (`UNIQUE(content_hash)`,
//! `UNIQUE(canonical_id, file_path)`), and insert-if-absent is expressed as
//! `INSERT ... ON CONFLICT(content_hash) DO NOTHING` inside a transaction so
//! concurrent writers can never produce two canonical rows for one hash.
//! Every write from one process is serialized on an async mutex, and write
//! transactions open with `BEGIN IMMEDIATE` so the write lock is taken up
//! front instead of being upgraded from a read (which SQLite refuses with
//! `SQLITE_BUSY_SNAPSHOT` under WAL). Other processes wait on the
//! connection's busy timeout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use crate::error::{DedupError, Result};
use crate::hasher::FuzzyHash;
use crate::models::{
    CanonicalDocument, DuplicateGroup, DuplicateType, IntegrityReport, LogStatus,
    ProcessingLogEntry, Source, Statistics,
};

use super::{
    quality_bucket, CanonicalStore, FuzzyCandidate, InsertOutcome, MergeSummary, Promotion,
};

const CANONICAL_COLUMNS: &str = "canonical_id, content_hash, file_hash, fuzzy_hash, document_type, \
     title, date, from_addr, to_addr, subject, ocr_quality, has_redactions, completeness, \
     page_count, primary_source, selection_reason, merged_into, created_at, updated_at";

const SOURCE_COLUMNS: &str = "id, canonical_id, source_name, collection, file_path, file_hash, \
     format, quality_score, downloaded_at";

const GROUP_COLUMNS: &str = "id, canonical_id, related_canonical_id, duplicate_type, \
     similarity_score, detection_method, member_count, created_at";

/// SQLite implementation of the [`CanonicalStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }
}

fn row_to_canonical(row: &SqliteRow) -> Result<CanonicalDocument> {
    let completeness: String = row.get("completeness");
    let selection_reason: String = row.get("selection_reason");
    Ok(CanonicalDocument {
        canonical_id: row.get("canonical_id"),
        content_hash: row.get("content_hash"),
        file_hash: row.get("file_hash"),
        fuzzy_hash: row.get("fuzzy_hash"),
        document_type: row.get("document_type"),
        title: row.get("title"),
        date: row.get("date"),
        from_addr: row.get("from_addr"),
        to_addr: row.get("to_addr"),
        subject: row.get("subject"),
        ocr_quality: row.get("ocr_quality"),
        has_redactions: row.get("has_redactions"),
        completeness: completeness.parse()?,
        page_count: row.get("page_count"),
        primary_source: row.get("primary_source"),
        selection_reason: selection_reason.parse()?,
        merged_into: row.get("merged_into"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_source(row: &SqliteRow) -> Source {
    Source {
        id: row.get("id"),
        canonical_id: row.get("canonical_id"),
        source_name: row.get("source_name"),
        collection: row.get("collection"),
        file_path: row.get("file_path"),
        file_hash: row.get("file_hash"),
        format: row.get("format"),
        quality_score: row.get("quality_score"),
        downloaded_at: row.get("downloaded_at"),
    }
}

fn row_to_group(row: &SqliteRow) -> Result<DuplicateGroup> {
    let duplicate_type: String = row.get("duplicate_type");
    let detection_method: String = row.get("detection_method");
    Ok(DuplicateGroup {
        id: row.get("id"),
        canonical_id: row.get("canonical_id"),
        related_canonical_id: row.get("related_canonical_id"),
        duplicate_type: duplicate_type.parse()?,
        similarity_score: row.get("similarity_score"),
        detection_method: detection_method.parse()?,
        member_count: row.get("member_count"),
        created_at: row.get("created_at"),
    })
}

fn row_to_log(row: &SqliteRow) -> Result<ProcessingLogEntry> {
    let status: String = row.get("status");
    let details_json: String = row.get("details_json");
    Ok(ProcessingLogEntry {
        id: row.get("id"),
        operation: row.get("operation"),
        source: row.get("source"),
        status: status.parse()?,
        message: row.get("message"),
        details: serde_json::from_str(&details_json).unwrap_or(serde_json::json!({})),
        timestamp: row.get("timestamp"),
    })
}

fn is_content_hash_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.message().contains("content_hash")
        }
        _ => false,
    }
}

async fn ensure_no_collision(
    tx: &mut Transaction<'_, Sqlite>,
    doc: &CanonicalDocument,
) -> Result<()> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT content_hash FROM canonical_documents WHERE canonical_id = ?")
            .bind(&doc.canonical_id)
            .fetch_optional(&mut **tx)
            .await?;
    match existing {
        Some(hash) if hash != doc.content_hash => Err(DedupError::CanonicalIdCollision {
            canonical_id: doc.canonical_id.clone(),
            existing: hash,
            incoming: doc.content_hash.clone(),
        }),
        _ => Ok(()),
    }
}

/// Insert the canonical row; returns the number of rows written (0 when the
/// content hash already exists and `if_absent` is set).
async fn write_canonical(
    tx: &mut Transaction<'_, Sqlite>,
    doc: &CanonicalDocument,
    if_absent: bool,
) -> std::result::Result<u64, sqlx::Error> {
    let conflict = if if_absent {
        "ON CONFLICT(content_hash) DO NOTHING"
    } else {
        ""
    };
    let sql = format!(
        "INSERT INTO canonical_documents ({}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) {}",
        CANONICAL_COLUMNS, conflict
    );
    let res = sqlx::query(&sql)
        .bind(&doc.canonical_id)
        .bind(&doc.content_hash)
        .bind(&doc.file_hash)
        .bind(&doc.fuzzy_hash)
        .bind(&doc.document_type)
        .bind(&doc.title)
        .bind(&doc.date)
        .bind(&doc.from_addr)
        .bind(&doc.to_addr)
        .bind(&doc.subject)
        .bind(doc.ocr_quality)
        .bind(doc.has_redactions)
        .bind(doc.completeness.as_str())
        .bind(doc.page_count)
        .bind(&doc.primary_source)
        .bind(doc.selection_reason.as_str())
        .bind(&doc.merged_into)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut **tx)
        .await?;
    Ok(res.rows_affected())
}

async fn write_source(
    tx: &mut Transaction<'_, Sqlite>,
    source: &Source,
) -> std::result::Result<Option<i64>, sqlx::Error> {
    let res = sqlx::query(
        r#"
        INSERT INTO sources (canonical_id, source_name, collection, file_path, file_hash,
                             format, quality_score, downloaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(canonical_id, file_path) DO NOTHING
        "#,
    )
    .bind(&source.canonical_id)
    .bind(&source.source_name)
    .bind(&source.collection)
    .bind(&source.file_path)
    .bind(&source.file_hash)
    .bind(&source.format)
    .bind(source.quality_score)
    .bind(source.downloaded_at)
    .execute(&mut **tx)
    .await?;

    if res.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(res.last_insert_rowid()))
    }
}

#[async_trait]
impl CanonicalStore for SqliteStore {
    async fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<CanonicalDocument>> {
        let sql = format!(
            "SELECT {} FROM canonical_documents WHERE content_hash = ?",
            CANONICAL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_canonical).transpose()
    }

    async fn get_canonical(&self, canonical_id: &str) -> Result<Option<CanonicalDocument>> {
        let sql = format!(
            "SELECT {} FROM canonical_documents WHERE canonical_id = ?",
            CANONICAL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(canonical_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_canonical).transpose()
    }

    async fn insert_canonical_document(
        &self,
        doc: &CanonicalDocument,
        first_source: &Source,
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;
        ensure_no_collision(&mut tx, doc).await?;
        match write_canonical(&mut tx, doc, false).await {
            Ok(_) => {}
            Err(e) if is_content_hash_conflict(&e) => {
                return Err(DedupError::DuplicateContentHash(doc.content_hash.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        write_source(&mut tx, first_source).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_or_get_canonical(
        &self,
        doc: &CanonicalDocument,
        first_source: &Source,
    ) -> Result<InsertOutcome> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;
        ensure_no_collision(&mut tx, doc).await?;

        if write_canonical(&mut tx, doc, true).await? == 0 {
            let sql = format!(
                "SELECT {} FROM canonical_documents WHERE content_hash = ?",
                CANONICAL_COLUMNS
            );
            let row = sqlx::query(&sql)
                .bind(&doc.content_hash)
                .fetch_one(&mut *tx)
                .await?;
            let existing = row_to_canonical(&row)?;
            tx.commit().await?;
            return Ok(InsertOutcome::Existing(existing));
        }

        write_source(&mut tx, first_source).await?;
        tx.commit().await?;
        Ok(InsertOutcome::Inserted(doc.clone()))
    }

    async fn promote_representative(
        &self,
        canonical_id: &str,
        promotion: &Promotion,
    ) -> Result<bool> {
        let Some(quality) = promotion.ocr_quality else {
            return Ok(false);
        };
        let _writer = self.writer.lock().await;
        let res = sqlx::query(
            r#"
            UPDATE canonical_documents
            SET file_hash = ?, ocr_quality = ?, primary_source = ?,
                selection_reason = 'higher_quality_source', updated_at = ?
            WHERE canonical_id = ? AND (ocr_quality IS NULL OR ocr_quality + ? < ?)
            "#,
        )
        .bind(&promotion.file_hash)
        .bind(quality)
        .bind(&promotion.primary_source)
        .bind(chrono::Utc::now().timestamp())
        .bind(canonical_id)
        .bind(promotion.margin)
        .bind(quality)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() > 0 {
            return Ok(true);
        }
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM canonical_documents WHERE canonical_id = ?",
        )
        .bind(canonical_id)
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Err(DedupError::NotFound(canonical_id.to_string()));
        }
        Ok(false)
    }

    async fn insert_source(&self, source: &Source) -> Result<Option<i64>> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM canonical_documents WHERE canonical_id = ?",
        )
        .bind(&source.canonical_id)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            return Err(DedupError::IntegrityViolation(format!(
                "source {} references unknown canonical id {}",
                source.file_path, source.canonical_id
            )));
        }
        let id = write_source(&mut tx, source).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn get_sources(&self, canonical_id: &str) -> Result<Vec<Source>> {
        let sql = format!(
            "SELECT {} FROM sources WHERE canonical_id = ? ORDER BY id ASC",
            SOURCE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(canonical_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    async fn find_by_file_hash(&self, file_hash: &str) -> Result<Vec<Source>> {
        let sql = format!(
            "SELECT {} FROM sources WHERE file_hash = ? ORDER BY id ASC",
            SOURCE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(file_hash)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    async fn insert_duplicate_group(&self, group: &DuplicateGroup) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;

        for id in [&group.canonical_id, &group.related_canonical_id] {
            let exists: bool = sqlx::query_scalar(
                "SELECT COUNT(*) > 0 FROM canonical_documents WHERE canonical_id = ?",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            if !exists {
                return Err(DedupError::IntegrityViolation(format!(
                    "duplicate group references unknown canonical id {}",
                    id
                )));
            }
        }

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM duplicate_groups \
             WHERE canonical_id = ? AND related_canonical_id = ? AND detection_method = ?",
        )
        .bind(&group.canonical_id)
        .bind(&group.related_canonical_id)
        .bind(group.detection_method.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let created = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE duplicate_groups SET similarity_score = ?, member_count = ? WHERE id = ?",
                )
                .bind(group.similarity_score)
                .bind(group.member_count)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                false
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO duplicate_groups (canonical_id, related_canonical_id, duplicate_type,
                                                  similarity_score, detection_method, member_count,
                                                  created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&group.canonical_id)
                .bind(&group.related_canonical_id)
                .bind(group.duplicate_type.as_str())
                .bind(group.similarity_score)
                .bind(group.detection_method.as_str())
                .bind(group.member_count)
                .bind(group.created_at)
                .execute(&mut *tx)
                .await?;
                true
            }
        };

        tx.commit().await?;
        Ok(created)
    }

    async fn list_duplicate_groups(
        &self,
        duplicate_type: Option<DuplicateType>,
    ) -> Result<Vec<DuplicateGroup>> {
        let rows = match duplicate_type {
            Some(t) => {
                let sql = format!(
                    "SELECT {} FROM duplicate_groups WHERE duplicate_type = ? ORDER BY id",
                    GROUP_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(t.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {} FROM duplicate_groups ORDER BY id", GROUP_COLUMNS);
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(row_to_group).collect()
    }

    async fn groups_for(&self, canonical_id: &str) -> Result<Vec<DuplicateGroup>> {
        let sql = format!(
            "SELECT {} FROM duplicate_groups \
             WHERE canonical_id = ? OR related_canonical_id = ? ORDER BY id",
            GROUP_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(canonical_id)
            .bind(canonical_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_group).collect()
    }

    async fn append_log(&self, entry: &ProcessingLogEntry) -> Result<()> {
        let _writer = self.writer.lock().await;
        sqlx::query(
            r#"
            INSERT INTO processing_log (operation, source, status, message, details_json, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.operation)
        .bind(&entry.source)
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(serde_json::to_string(&entry.details)?)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_log(
        &self,
        status: Option<LogStatus>,
        limit: usize,
    ) -> Result<Vec<ProcessingLogEntry>> {
        let base = "SELECT id, operation, source, status, message, details_json, timestamp \
                    FROM processing_log";
        let rows = match status {
            Some(s) => {
                sqlx::query(&format!("{} WHERE status = ? ORDER BY id DESC LIMIT ?", base))
                    .bind(s.as_str())
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY id DESC LIMIT ?", base))
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_log).collect()
    }

    async fn fuzzy_candidates(&self) -> Result<Vec<FuzzyCandidate>> {
        let rows = sqlx::query(
            "SELECT canonical_id, document_type, fuzzy_hash FROM canonical_documents \
             WHERE fuzzy_hash IS NOT NULL AND merged_into IS NULL ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let hash: String = row.get("fuzzy_hash");
                Some(FuzzyCandidate {
                    canonical_id: row.get("canonical_id"),
                    document_type: row.get("document_type"),
                    fuzzy_hash: FuzzyHash::parse(&hash)?,
                })
            })
            .collect())
    }

    async fn store_page_hashes(
        &self,
        canonical_id: &str,
        pages: &BTreeMap<u32, String>,
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;
        sqlx::query("DELETE FROM page_hashes WHERE canonical_id = ?")
            .bind(canonical_id)
            .execute(&mut *tx)
            .await?;
        for (page, hash) in pages {
            sqlx::query(
                "INSERT INTO page_hashes (canonical_id, page_number, page_hash) VALUES (?, ?, ?)",
            )
            .bind(canonical_id)
            .bind(*page as i64)
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn page_hashes(&self, canonical_id: &str) -> Result<BTreeMap<u32, String>> {
        let rows = sqlx::query(
            "SELECT page_number, page_hash FROM page_hashes WHERE canonical_id = ? ORDER BY page_number",
        )
        .bind(canonical_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let page: i64 = row.get("page_number");
                (page as u32, row.get("page_hash"))
            })
            .collect())
    }

    async fn list_canonical_documents(
        &self,
        document_type: Option<&str>,
    ) -> Result<Vec<CanonicalDocument>> {
        let rows = match document_type {
            Some(t) => {
                let sql = format!(
                    "SELECT {} FROM canonical_documents \
                     WHERE merged_into IS NULL AND document_type = ? ORDER BY rowid",
                    CANONICAL_COLUMNS
                );
                sqlx::query(&sql).bind(t).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM canonical_documents WHERE merged_into IS NULL ORDER BY rowid",
                    CANONICAL_COLUMNS
                );
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(row_to_canonical).collect()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CanonicalDocument>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "%{}%",
            needle
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let sql = format!(
            "SELECT {} FROM canonical_documents \
             WHERE merged_into IS NULL \
               AND (LOWER(title) LIKE ? ESCAPE '\\' OR LOWER(subject) LIKE ? ESCAPE '\\') \
             ORDER BY rowid LIMIT ?",
            CANONICAL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_canonical).collect()
    }

    async fn merge_canonical(&self, from: &str, into: &str) -> Result<MergeSummary> {
        let _writer = self.writer.lock().await;
        let mut tx = self.begin_write().await?;

        for id in [from, into] {
            let exists: bool = sqlx::query_scalar(
                "SELECT COUNT(*) > 0 FROM canonical_documents WHERE canonical_id = ?",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            if !exists {
                return Err(DedupError::NotFound(id.to_string()));
            }
        }

        // Paths already attached to the target stay with the merged record.
        let moved = sqlx::query(
            r#"
            UPDATE sources SET canonical_id = ?
            WHERE canonical_id = ?
              AND file_path NOT IN (SELECT file_path FROM sources WHERE canonical_id = ?)
            "#,
        )
        .bind(into)
        .bind(from)
        .bind(into)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "UPDATE canonical_documents SET merged_into = ?, selection_reason = 'merged', \
             updated_at = ? WHERE canonical_id = ?",
        )
        .bind(into)
        .bind(chrono::Utc::now().timestamp())
        .bind(from)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MergeSummary {
            sources_moved: moved,
        })
    }

    async fn check_integrity(&self) -> Result<IntegrityReport> {
        let orphan_sources: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT s.id FROM sources s
            LEFT JOIN canonical_documents c ON c.canonical_id = s.canonical_id
            WHERE c.canonical_id IS NULL
            ORDER BY s.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let canonicals_without_sources: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.canonical_id FROM canonical_documents c
            WHERE c.merged_into IS NULL
              AND NOT EXISTS (SELECT 1 FROM sources s WHERE s.canonical_id = c.canonical_id)
            ORDER BY c.canonical_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let duplicate_content_hashes: Vec<String> = sqlx::query_scalar(
            "SELECT content_hash FROM canonical_documents GROUP BY content_hash \
             HAVING COUNT(*) > 1 ORDER BY content_hash",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(IntegrityReport {
            orphan_sources,
            canonicals_without_sources,
            duplicate_content_hashes,
        })
    }

    async fn get_statistics(&self) -> Result<Statistics> {
        let total_documents: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM canonical_documents WHERE merged_into IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let total_sources: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sources s \
             JOIN canonical_documents c ON c.canonical_id = s.canonical_id \
             WHERE c.merged_into IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let duplicate_groups: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM duplicate_groups")
            .fetch_one(&self.pool)
            .await?;

        let mut stats = Statistics {
            total_documents,
            total_sources,
            duplicate_groups,
            ..Statistics::default()
        };
        if total_documents > 0 {
            stats.avg_sources_per_doc = total_sources as f64 / total_documents as f64;
        }

        let type_rows = sqlx::query(
            "SELECT document_type, COUNT(*) AS n FROM canonical_documents \
             WHERE merged_into IS NULL GROUP BY document_type",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &type_rows {
            stats
                .documents_by_type
                .insert(row.get("document_type"), row.get("n"));
        }

        let qualities: Vec<Option<f64>> = sqlx::query_scalar(
            "SELECT ocr_quality FROM canonical_documents WHERE merged_into IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        for q in qualities {
            *stats
                .documents_by_quality
                .entry(quality_bucket(q).to_string())
                .or_default() += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use crate::models::{Completeness, SelectionReason};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn canonical(id: &str, hash: &str) -> CanonicalDocument {
        CanonicalDocument {
            canonical_id: id.to_string(),
            content_hash: hash.to_string(),
            file_hash: format!("sha256:file-{}", id),
            fuzzy_hash: None,
            document_type: "email".to_string(),
            title: Some(format!("Title {}", id)),
            date: None,
            from_addr: None,
            to_addr: None,
            subject: Some("Flight logs".to_string()),
            ocr_quality: Some(0.8),
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
            quality_score: Some(0.8),
            downloaded_at: 0,
        }
    }

    #[tokio::test]
    async fn strict_insert_rejects_duplicate_hash() {
        let store = store().await;
        let doc = canonical("doc_aaaaaaaaaaaa", "sha256:aaaa");
        store
            .insert_canonical_document(&doc, &source(&doc.canonical_id, "/a.txt"))
            .await
            .unwrap();

        let mut again = canonical("doc_bbbbbbbbbbbb", "sha256:aaaa");
        again.title = None;
        let err = store
            .insert_canonical_document(&again, &source(&again.canonical_id, "/b.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::DuplicateContentHash(_)));
    }

    #[tokio::test]
    async fn insert_or_get_returns_existing() {
        let store = store().await;
        let doc = canonical("doc_aaaaaaaaaaaa", "sha256:aaaa");
        let first = store
            .insert_or_get_canonical(&doc, &source(&doc.canonical_id, "/a.txt"))
            .await
            .unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = store
            .insert_or_get_canonical(&doc, &source(&doc.canonical_id, "/b.txt"))
            .await
            .unwrap();
        assert!(matches!(second, InsertOutcome::Existing(_)));
        assert_eq!(store.get_sources(&doc.canonical_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn id_collision_detected() {
        let store = store().await;
        let doc = canonical("doc_aaaaaaaaaaaa", "sha256:aaaa");
        store
            .insert_or_get_canonical(&doc, &source(&doc.canonical_id, "/a.txt"))
            .await
            .unwrap();
        let clash = canonical("doc_aaaaaaaaaaaa", "sha256:ffff");
        let err = store
            .insert_canonical_document(&clash, &source(&clash.canonical_id, "/c.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::CanonicalIdCollision { .. }));
    }

    #[tokio::test]
    async fn source_requires_canonical() {
        let store = store().await;
        let err = store
            .insert_source(&source("doc_000000000000", "/x.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::IntegrityViolation(_)));
    }

    #[tokio::test]
    async fn search_escapes_wildcards() {
        let store = store().await;
        let doc = canonical("doc_aaaaaaaaaaaa", "sha256:aaaa");
        store
            .insert_canonical_document(&doc, &source(&doc.canonical_id, "/a.txt"))
            .await
            .unwrap();
        assert_eq!(store.search("flight", 10).await.unwrap().len(), 1);
        assert_eq!(store.search("TITLE doc_", 10).await.unwrap().len(), 1);
        assert!(store.search("100%", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn promotion_never_lowers_stored_quality() {
        let store = store().await;
        let doc = canonical("doc_aaaaaaaaaaaa", "sha256:aaaa");
        store
            .insert_canonical_document(&doc, &source(&doc.canonical_id, "/a.txt"))
            .await
            .unwrap();

        let promotion = |q: f64| Promotion {
            file_hash: format!("sha256:file-{}", q),
            ocr_quality: Some(q),
            primary_source: "vol2".to_string(),
            margin: 0.05,
        };
        assert!(store
            .promote_representative(&doc.canonical_id, &promotion(0.95))
            .await
            .unwrap());
        assert!(!store
            .promote_representative(&doc.canonical_id, &promotion(0.6))
            .await
            .unwrap());
        assert!(!store
            .promote_representative(&doc.canonical_id, &promotion(0.98))
            .await
            .unwrap());

        let stored = store.get_canonical(&doc.canonical_id).await.unwrap().unwrap();
        assert_eq!(stored.ocr_quality, Some(0.95));
        assert_eq!(stored.selection_reason, SelectionReason::HigherQualitySource);

        let err = store
            .promote_representative("doc_000000000000", &promotion(0.99))
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::NotFound(_)));
    }
}
