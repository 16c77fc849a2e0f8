use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS canonical_documents (
            canonical_id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL UNIQUE,
            file_hash TEXT NOT NULL,
            fuzzy_hash TEXT,
            document_type TEXT NOT NULL,
            title TEXT,
            date TEXT,
            from_addr TEXT,
            to_addr TEXT,
            subject TEXT,
            ocr_quality REAL,
            has_redactions INTEGER NOT NULL DEFAULT 0,
            completeness TEXT NOT NULL DEFAULT 'complete',
            page_count INTEGER NOT NULL DEFAULT 1,
            primary_source TEXT NOT NULL,
            selection_reason TEXT NOT NULL,
            merged_into TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            collection TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            format TEXT NOT NULL,
            quality_score REAL,
            downloaded_at INTEGER NOT NULL,
            UNIQUE(canonical_id, file_path),
            FOREIGN KEY (canonical_id) REFERENCES canonical_documents(canonical_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_id TEXT NOT NULL,
            related_canonical_id TEXT NOT NULL,
            duplicate_type TEXT NOT NULL,
            similarity_score REAL NOT NULL,
            detection_method TEXT NOT NULL,
            member_count INTEGER NOT NULL DEFAULT 2,
            created_at INTEGER NOT NULL,
            UNIQUE(canonical_id, related_canonical_id, detection_method),
            FOREIGN KEY (canonical_id) REFERENCES canonical_documents(canonical_id),
            FOREIGN KEY (related_canonical_id) REFERENCES canonical_documents(canonical_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL,
            source TEXT,
            status TEXT NOT NULL,
            message TEXT,
            details_json TEXT NOT NULL DEFAULT '{}',
            timestamp INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS page_hashes (
            canonical_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            page_hash TEXT NOT NULL,
            PRIMARY KEY (canonical_id, page_number),
            FOREIGN KEY (canonical_id) REFERENCES canonical_documents(canonical_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_canonical_document_type ON canonical_documents(document_type)",
        "CREATE INDEX IF NOT EXISTS idx_canonical_merged_into ON canonical_documents(merged_into)",
        "CREATE INDEX IF NOT EXISTS idx_sources_canonical_id ON sources(canonical_id)",
        "CREATE INDEX IF NOT EXISTS idx_sources_file_hash ON sources(file_hash)",
        "CREATE INDEX IF NOT EXISTS idx_groups_related ON duplicate_groups(related_canonical_id)",
        "CREATE INDEX IF NOT EXISTS idx_groups_type ON duplicate_groups(duplicate_type)",
        "CREATE INDEX IF NOT EXISTS idx_log_status ON processing_log(status)",
        "CREATE INDEX IF NOT EXISTS idx_page_hashes_hash ON page_hashes(page_hash)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
