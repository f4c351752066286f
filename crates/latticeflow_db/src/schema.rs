//! Schema bootstrap and forward-only migrations.
//!
//! The teacher embeds its schema as inline `CREATE TABLE IF NOT EXISTS`
//! strings applied once at startup. The original Python system this spec
//! was distilled from tracks its schema with Alembic migrations, so we
//! add a `schema_version` table and a small ordered-migration runner on
//! top of the teacher's pattern rather than a single idempotent blast.

use crate::error::Result;
use sqlx::SqlitePool;
use tracing::info;

/// One forward-only migration. `id` must be monotonically increasing and
/// is recorded in `schema_version` so a migration never reapplies.
struct Migration {
    id: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration { id: 1, name: "init_core", sql: SCHEMA_CORE },
    Migration { id: 2, name: "init_ingest", sql: SCHEMA_INGEST },
    Migration { id: 3, name: "init_imports", sql: SCHEMA_IMPORTS },
    Migration { id: 4, name: "init_misc", sql: SCHEMA_MISC },
];

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> =
            sqlx::query_scalar("SELECT id FROM schema_version WHERE id = ?")
                .bind(migration.id)
                .fetch_optional(pool)
                .await?;
        if already_applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in migration.sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_version (id, name) VALUES (?, ?)")
            .bind(migration.id)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(migration = migration.name, "applied schema migration");
    }

    Ok(())
}

const SCHEMA_CORE: &str = r#"
CREATE TABLE IF NOT EXISTS designs (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    designer TEXT,
    metadata_authority TEXT NOT NULL,
    status TEXT NOT NULL,
    total_bytes INTEGER NOT NULL DEFAULT 0,
    primary_file_types TEXT NOT NULL DEFAULT '[]',
    multicolor TEXT NOT NULL DEFAULT 'UNKNOWN',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_designs_status ON designs(status);

CREATE TABLE IF NOT EXISTS design_sources (
    id TEXT PRIMARY KEY,
    design_id TEXT NOT NULL REFERENCES designs(id) ON DELETE CASCADE,
    message_id TEXT,
    import_record_id TEXT,
    rank INTEGER NOT NULL DEFAULT 0,
    is_preferred INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_design_sources_design ON design_sources(design_id);

CREATE TABLE IF NOT EXISTS design_files (
    id TEXT PRIMARY KEY,
    design_id TEXT NOT NULL REFERENCES designs(id) ON DELETE CASCADE,
    relative_path TEXT NOT NULL,
    filename TEXT NOT NULL,
    extension TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    file_kind TEXT NOT NULL,
    model_kind TEXT NOT NULL DEFAULT 'UNKNOWN',
    is_from_archive INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_design_files_design ON design_files(design_id);
CREATE INDEX IF NOT EXISTS idx_design_files_sha256 ON design_files(sha256);

CREATE TABLE IF NOT EXISTS preview_assets (
    id TEXT PRIMARY KEY,
    design_id TEXT NOT NULL REFERENCES designs(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    kind TEXT NOT NULL,
    path TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    width INTEGER,
    height INTEGER,
    upstream_file_id TEXT,
    is_primary INTEGER NOT NULL DEFAULT 0,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_preview_assets_design ON preview_assets(design_id);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'QUEUED',
    priority INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    started_at TEXT,
    finished_at TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 5,
    last_error TEXT,
    progress_current INTEGER NOT NULL DEFAULT 0,
    progress_total INTEGER,
    design_id TEXT,
    channel_id TEXT,
    payload_json TEXT,
    result_json TEXT,
    display_name TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON jobs(status, priority);
CREATE INDEX IF NOT EXISTS idx_jobs_design ON jobs(design_id);
"#;

const SCHEMA_INGEST: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    id TEXT PRIMARY KEY,
    peer_id TEXT NOT NULL UNIQUE,
    username TEXT,
    title TEXT NOT NULL,
    last_ingested_message_id INTEGER,
    last_sync_at TEXT,
    download_mode TEXT NOT NULL DEFAULT 'MANUAL',
    download_mode_enabled_at TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    template_override TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    upstream_message_id INTEGER NOT NULL,
    caption_raw TEXT,
    caption_normalized TEXT,
    posted_at TEXT NOT NULL,
    author_label TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(channel_id, upstream_message_id)
);
CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel_id);

CREATE TABLE IF NOT EXISTS attachments (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    upstream_file_id TEXT NOT NULL,
    attachment_type TEXT NOT NULL,
    filename TEXT,
    extension TEXT,
    size_bytes INTEGER,
    mime_type TEXT,
    is_candidate_design_file INTEGER NOT NULL DEFAULT 0,
    download_status TEXT NOT NULL DEFAULT 'NONE',
    content_hash TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);
"#;

const SCHEMA_IMPORTS: &str = r#"
CREATE TABLE IF NOT EXISTS import_sources (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    display_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ACTIVE',
    config_json TEXT NOT NULL DEFAULT '{}',
    credential_id TEXT,
    last_sync_at TEXT,
    last_sync_cursor TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS import_records (
    id TEXT PRIMARY KEY,
    import_source_id TEXT NOT NULL REFERENCES import_sources(id) ON DELETE CASCADE,
    upstream_ref TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'DISCOVERED',
    content_fingerprint TEXT,
    design_id TEXT,
    discovered_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(import_source_id, upstream_ref)
);
CREATE INDEX IF NOT EXISTS idx_import_records_source ON import_records(import_source_id);
CREATE INDEX IF NOT EXISTS idx_import_records_fingerprint ON import_records(content_fingerprint);

CREATE TABLE IF NOT EXISTS import_profiles (
    id TEXT PRIMARY KEY,
    import_source_id TEXT NOT NULL REFERENCES import_sources(id) ON DELETE CASCADE,
    shape TEXT NOT NULL,
    sample_size INTEGER NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0,
    detected_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const SCHEMA_MISC: &str = r#"
CREATE TABLE IF NOT EXISTS duplicate_candidates (
    id TEXT PRIMARY KEY,
    design_id TEXT NOT NULL REFERENCES designs(id) ON DELETE CASCADE,
    other_design_id TEXT NOT NULL REFERENCES designs(id) ON DELETE CASCADE,
    similarity REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    resolved_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_duplicate_candidates_design ON duplicate_candidates(design_id);

CREATE TABLE IF NOT EXISTS discovered_channels (
    id TEXT PRIMARY KEY,
    peer_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    member_count INTEGER,
    sample_message_count INTEGER NOT NULL DEFAULT 0,
    design_like_message_count INTEGER NOT NULL DEFAULT 0,
    reference_count INTEGER NOT NULL DEFAULT 1,
    source_types_json TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'NEW',
    discovered_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_seen_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS external_metadata_sources (
    id TEXT PRIMARY KEY,
    design_id TEXT NOT NULL REFERENCES designs(id) ON DELETE CASCADE,
    platform TEXT NOT NULL,
    external_id TEXT NOT NULL,
    url TEXT NOT NULL,
    confidence REAL NOT NULL,
    match_method TEXT NOT NULL,
    fetched_title TEXT,
    fetched_designer TEXT,
    fetched_tags_json TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(design_id, platform, external_id)
);
CREATE INDEX IF NOT EXISTS idx_external_metadata_design ON external_metadata_sources(design_id);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    design_id TEXT NOT NULL REFERENCES designs(id) ON DELETE CASCADE,
    value TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(design_id, value)
);
CREATE INDEX IF NOT EXISTS idx_tags_design ON tags(design_id);
CREATE INDEX IF NOT EXISTS idx_tags_value ON tags(value);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value_json TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    sealed_secret TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    rotated_at TEXT
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let pool = create_pool(DbConfig::memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT count(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn creates_expected_tables() {
        let pool = create_pool(DbConfig::memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for expected in [
            "designs",
            "design_files",
            "jobs",
            "channels",
            "import_sources",
            "settings",
            "credentials",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing table {expected}");
        }
    }
}
