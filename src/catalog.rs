//! Read-mostly movie catalog backing the streaming endpoints.
//!
//! The HTTP surface only ever resolves ids to records; writes happen in the
//! external upload pipeline (and in tests) through [`CatalogStore`]. Records
//! mirror what is persisted in the SQLite table: presentation metadata for
//! the browsing UI plus the three fields the streaming core actually
//! consumes: stored file name, size at publish time, and an optional MIME
//! override.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};

/// One published movie. `file_name` is relative to the media root and is
/// stripped from API responses before records leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieRecord {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<i64>,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    // `execute_batch` rejects statements that return rows, and
    // `PRAGMA journal_mode=WAL` reports the resulting mode as a row.
    conn.query("PRAGMA journal_mode=WAL", params![]).await?;
    conn.query("PRAGMA synchronous=NORMAL", params![]).await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS movies (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT DEFAULT '',
            category TEXT,
            language TEXT,
            poster_url TEXT,
            duration_text TEXT,
            views INTEGER,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            file_name TEXT,
            content_type TEXT,
            added_at TEXT
        );
        "#,
    )
    .await?;
    Ok(())
}

/// Write-side handle used by the upload pipeline and by tests.
pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    /// Opens (and if necessary creates) the catalog DB and ensures the
    /// expected schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening catalog DB {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    pub async fn upsert_movie(&self, record: &MovieRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO movies (
                    id, title, description, category, language, poster_url,
                    duration_text, views, size_bytes, file_name, content_type,
                    added_at
                ) VALUES (
                    :id, :title, :description, :category, :language, :poster_url,
                    :duration_text, :views, :size_bytes, :file_name, :content_type,
                    :added_at
                )
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    category = excluded.category,
                    language = excluded.language,
                    poster_url = excluded.poster_url,
                    duration_text = excluded.duration_text,
                    views = excluded.views,
                    size_bytes = excluded.size_bytes,
                    file_name = excluded.file_name,
                    content_type = excluded.content_type,
                    added_at = excluded.added_at
                "#,
                params![
                    record.id.as_str(),
                    record.title.as_str(),
                    record.description.as_str(),
                    record.category.as_deref(),
                    record.language.as_deref(),
                    record.poster_url.as_deref(),
                    record.duration_text.as_deref(),
                    record.views,
                    record.size_bytes,
                    record.file_name.as_deref(),
                    record.content_type.as_deref(),
                    record.added_at.map(|ts| ts.to_rfc3339()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_movie(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM movies WHERE id = ?1", params![id])
            .await?;
        Ok(())
    }
}

/// Read-side handle injected into the HTTP state. Queries are short-lived
/// and never hold the connection across awaits inside a request.
#[derive(Clone)]
pub struct CatalogReader {
    conn: Connection,
}

impl CatalogReader {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Builder::new_local(path.as_ref())
            .build()
            .await
            .with_context(|| format!("opening catalog DB {}", path.as_ref().display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Newest first, matching the ordering the browsing UI expects.
    pub async fn list_movies(&self) -> Result<Vec<MovieRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, title, description, category, language, poster_url,
                       duration_text, views, size_bytes, file_name, content_type,
                       added_at
                FROM movies
                ORDER BY added_at DESC, rowid DESC
                "#,
            )
            .await?;

        let mut rows = stmt.query(params![]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_movie(&row)?);
        }
        Ok(records)
    }

    /// The `resolve(id)` collaborator interface consumed by the streaming
    /// core: `None` means the id is unknown and the caller answers 404.
    pub async fn get_movie(&self, id: &str) -> Result<Option<MovieRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, title, description, category, language, poster_url,
                       duration_text, views, size_bytes, file_name, content_type,
                       added_at
                FROM movies
                WHERE id = ?1
                "#,
            )
            .await?;

        let mut rows = stmt.query([id]).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(row_to_movie(&row)?))
    }

    /// SQLite's change counter, used to invalidate the in-process cache
    /// whenever the upload pipeline commits new records.
    pub async fn data_version(&self) -> Result<i64> {
        let mut rows = self.conn.query("PRAGMA data_version", params![]).await?;
        let row = rows.next().await?.context("missing data_version row")?;
        Ok(row.get(0)?)
    }
}

fn row_to_movie(row: &Row) -> Result<MovieRecord> {
    let added_at_raw: Option<String> = row.get(11)?;
    let added_at = added_at_raw
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc));

    Ok(MovieRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get::<Option<String>>(2)?.unwrap_or_default(),
        category: row.get(3)?,
        language: row.get(4)?,
        poster_url: row.get(5)?,
        duration_text: row.get(6)?,
        views: row.get(7)?,
        size_bytes: row.get(8)?,
        file_name: row.get(9)?,
        content_type: row.get(10)?,
        added_at,
    })
}
