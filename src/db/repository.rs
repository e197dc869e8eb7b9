use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{Chart, ChartId, Post, SongDetail, SCHEMA_VERSION};

use super::schema::SCHEMA;
use super::{DocumentKind, PostQuery, RecordStore, SongQuery};

#[derive(Debug, Clone, PartialEq)]
pub struct QuarantinedDocument {
    pub kind: String,
    pub record_id: String,
    pub body: String,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).await?;
        Self::with_connection(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    pub async fn quarantined(&self) -> Result<Vec<QuarantinedDocument>> {
        let docs = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT kind, record_id, body, reason, quarantined_at FROM quarantine ORDER BY id",
                )?;
                let docs = stmt
                    .query_map([], quarantined_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(docs)
            })
            .await?;
        Ok(docs)
    }

    async fn get_doc(&self, sql: &'static str, key: rusqlite::types::Value) -> Result<Option<String>> {
        let doc = self
            .conn
            .call(move |conn| {
                let doc = conn
                    .query_row(sql, params![key], |row| row.get::<_, String>(0))
                    .optional()?;
                Ok(doc)
            })
            .await?;
        Ok(doc)
    }

    async fn search(&self, table: &'static str, clause: String, params: Vec<rusqlite::types::Value>) -> Result<Vec<(u32, String)>> {
        let rows = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT id, doc FROM {} WHERE {} ORDER BY id", table, clause);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params), |row| {
                        Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl RecordStore for Repository {
    async fn upsert_song(&self, id: u32, song: &SongDetail) -> Result<()> {
        let doc = serde_json::to_string(song)?;
        let main_bpm = song.summary.main_bpm();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM songs WHERE id = ?1", params![id])?;
                tx.execute(
                    "INSERT INTO songs (id, doc, schema_version, main_bpm) VALUES (?1, ?2, ?3, ?4)",
                    params![id, doc, SCHEMA_VERSION, main_bpm],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_song_by_id(&self, id: u32) -> Result<Option<SongDetail>> {
        let doc = self
            .get_doc("SELECT doc FROM songs WHERE id = ?1", id.into())
            .await?;
        doc.map(|doc| decode(&doc, "stored song")).transpose()
    }

    async fn delete_song(&self, id: u32) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM charts WHERE song_id = ?1", params![id])?;
                conn.execute("DELETE FROM songs WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn upsert_chart(&self, id: ChartId, chart: &Chart) -> Result<()> {
        let doc = serde_json::to_string(chart)?;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM charts WHERE id = ?1", params![id.to_string()])?;
                tx.execute(
                    "INSERT INTO charts (id, song_id, difficulty, doc, schema_version) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id.to_string(),
                        id.song_id,
                        id.difficulty.as_str(),
                        doc,
                        SCHEMA_VERSION
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_chart_by_id(&self, id: ChartId) -> Result<Option<Chart>> {
        let doc = self
            .get_doc("SELECT doc FROM charts WHERE id = ?1", id.to_string().into())
            .await?;
        doc.map(|doc| decode(&doc, "stored chart")).transpose()
    }

    async fn upsert_post(&self, id: u32, post: &Post) -> Result<()> {
        let doc = serde_json::to_string(post)?;
        let stats = post.chart_stats();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
                tx.execute(
                    r#"INSERT INTO posts (id, doc, schema_version, chart_time, chart_notes, chart_main_bpm)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        id,
                        doc,
                        SCHEMA_VERSION,
                        stats.map(|s| s.time),
                        stats.map(|s| s.notes),
                        stats.map(|s| s.main_bpm),
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_post_by_id(&self, id: u32) -> Result<Option<Post>> {
        let doc = self
            .get_doc("SELECT doc FROM posts WHERE id = ?1", id.into())
            .await?;
        doc.map(|doc| decode(&doc, "stored post")).transpose()
    }

    async fn delete_post(&self, id: u32) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn highest_post_id(&self) -> Result<Option<u32>> {
        let id = self
            .conn
            .call(|conn| {
                let id: Option<u32> =
                    conn.query_row("SELECT MAX(id) FROM posts", [], |row| row.get(0))?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    async fn search_songs(&self, query: &SongQuery) -> Result<Vec<(u32, SongDetail)>> {
        let (clause, params) = query.to_sql();
        self.search("songs", clause, params)
            .await?
            .into_iter()
            .map(|(id, doc)| decode(&doc, "stored song").map(|doc| (id, doc)))
            .collect()
    }

    async fn search_posts(&self, query: &PostQuery) -> Result<Vec<(u32, Post)>> {
        let (clause, params) = query.to_sql();
        self.search("posts", clause, params)
            .await?
            .into_iter()
            .map(|(id, doc)| decode(&doc, "stored post").map(|doc| (id, doc)))
            .collect()
    }

    async fn quarantine(&self, kind: DocumentKind, record_id: &str, body: &str, reason: &str) -> Result<()> {
        let (record_id, body, reason) = (record_id.to_string(), body.to_string(), reason.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO quarantine (kind, record_id, body, reason)
                       VALUES (?1, ?2, ?3, ?4)
                       ON CONFLICT(kind, record_id) DO UPDATE SET
                           body = excluded.body,
                           reason = excluded.reason,
                           quarantined_at = datetime('now')"#,
                    params![kind.as_str(), record_id, body, reason],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(doc: &str, what: &str) -> Result<T> {
    serde_json::from_str(doc).map_err(|source| AppError::MalformedDocument {
        what: what.to_string(),
        source,
        body: doc.to_string(),
    })
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn quarantined_from_row(row: &Row) -> rusqlite::Result<QuarantinedDocument> {
    Ok(QuarantinedDocument {
        kind: row.get(0)?,
        record_id: row.get(1)?,
        body: row.get(2)?,
        reason: row.get(3)?,
        quarantined_at: row
            .get::<_, String>(4)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}
