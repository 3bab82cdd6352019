//! SQLite-backed embedding store.
//!
//! Two table layouts are supported:
//! - `Normalized`: `persona(id, name)` plus `embedding(id, encoding, persona_id)`,
//!   many embeddings per persona.
//! - `SingleTable`: `persona(name, encoding)`, one embedding per persona keyed by
//!   display name.
//!
//! Embeddings are stored as JSON arrays of numbers.

use crate::types::{Embedding, Persona, PersonaSummary, StoredEmbedding};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const NORMALIZED_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persona (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS embedding (
    id INTEGER PRIMARY KEY NOT NULL,
    encoding TEXT NOT NULL,
    persona_id TEXT NOT NULL REFERENCES persona(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    UNIQUE (persona_id, encoding)
);
CREATE INDEX IF NOT EXISTS idx_embedding_persona ON embedding(persona_id);
";

const SINGLE_TABLE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persona (
    name TEXT PRIMARY KEY NOT NULL,
    encoding TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding serialization failed: {0}")]
    Serialization(String),
    #[error("embedding deserialization failed: {0}")]
    Deserialization(String),
    #[error("invalid persona: {0}")]
    InvalidPersona(String),
    #[error("database uses the {found} layout, configured for {expected}")]
    LayoutMismatch {
        expected: StoreLayout,
        found: StoreLayout,
    },
}

/// Table layout of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLayout {
    #[default]
    Normalized,
    SingleTable,
}

impl std::fmt::Display for StoreLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreLayout::Normalized => f.write_str("normalized"),
            StoreLayout::SingleTable => f.write_str("single_table"),
        }
    }
}

impl FromStr for StoreLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normalized" => Ok(StoreLayout::Normalized),
            "single_table" | "single-table" | "single" => Ok(StoreLayout::SingleTable),
            other => Err(format!("unknown store layout: {other}")),
        }
    }
}

/// Persistent identity → embeddings mapping.
pub trait EmbeddingStore {
    /// Upsert the persona and attach `embedding` to it.
    fn insert(&mut self, persona: &Persona, embedding: &Embedding) -> Result<(), StoreError>;
    /// Every stored embedding in retrieval order. Rows that fail to decode are skipped.
    fn all(&self) -> Result<Vec<StoredEmbedding>, StoreError>;
    fn get(&self, id: &str) -> Result<Option<Persona>, StoreError>;
    fn personas(&self) -> Result<Vec<PersonaSummary>, StoreError>;
    /// Delete a persona and its embeddings. Returns whether it existed.
    fn remove(&mut self, id: &str) -> Result<bool, StoreError>;

    /// Whether personas are identified by their display name.
    fn keyed_by_name(&self) -> bool {
        false
    }
}

/// Serialize an embedding as a JSON array. Non-finite values are rejected
/// since JSON cannot carry them.
pub fn encode_embedding(embedding: &Embedding) -> Result<String, StoreError> {
    if let Some(index) = embedding.values.iter().position(|v| !v.is_finite()) {
        return Err(StoreError::Serialization(format!(
            "non-finite value at index {index}"
        )));
    }
    serde_json::to_string(&embedding.values).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub fn decode_embedding(encoding: &str) -> Result<Embedding, StoreError> {
    let values: Vec<f32> =
        serde_json::from_str(encoding).map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(Embedding::new(values))
}

pub struct SqliteStore {
    conn: Connection,
    layout: StoreLayout,
}

impl SqliteStore {
    /// Open (or create) the database file.
    pub fn open(path: &Path, layout: StoreLayout) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), %layout, "opened embedding store");
        Self::init(conn, layout)
    }

    pub fn open_in_memory(layout: StoreLayout) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, layout)
    }

    fn init(conn: Connection, layout: StoreLayout) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        if let Some(found) = detect_layout(&conn)? {
            if found != layout {
                return Err(StoreError::LayoutMismatch {
                    expected: layout,
                    found,
                });
            }
        }

        conn.execute_batch(match layout {
            StoreLayout::Normalized => NORMALIZED_SCHEMA,
            StoreLayout::SingleTable => SINGLE_TABLE_SCHEMA,
        })?;

        Ok(Self { conn, layout })
    }

    fn insert_normalized(&mut self, persona: &Persona, encoding: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        // IMMEDIATE takes the write lock up front so MAX(id) below cannot race
        // another writer.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO persona (id, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![persona.id, persona.name, now],
        )?;

        let duplicate: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM embedding WHERE persona_id = ?1 AND encoding = ?2)",
            params![persona.id, encoding],
            |row| row.get(0),
        )?;

        if duplicate {
            tracing::debug!(persona = %persona.id, "embedding already stored");
        } else {
            let next_id: i64 = tx.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM embedding",
                [],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO embedding (id, encoding, persona_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![next_id, encoding, persona.id, now],
            )?;
            tracing::debug!(persona = %persona.id, embedding_id = next_id, "embedding stored");
        }

        tx.commit()?;
        Ok(())
    }

    fn insert_single(&mut self, persona: &Persona, encoding: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO persona (name, encoding, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET encoding = excluded.encoding",
            params![persona.name, encoding, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl EmbeddingStore for SqliteStore {
    fn insert(&mut self, persona: &Persona, embedding: &Embedding) -> Result<(), StoreError> {
        if persona.name.trim().is_empty() {
            return Err(StoreError::InvalidPersona("name is empty".into()));
        }
        if self.layout == StoreLayout::Normalized && persona.id.trim().is_empty() {
            return Err(StoreError::InvalidPersona("identifier is empty".into()));
        }

        let encoding = encode_embedding(embedding)?;
        match self.layout {
            StoreLayout::Normalized => self.insert_normalized(persona, &encoding),
            StoreLayout::SingleTable => self.insert_single(persona, &encoding),
        }
    }

    fn keyed_by_name(&self) -> bool {
        self.layout == StoreLayout::SingleTable
    }

    fn all(&self) -> Result<Vec<StoredEmbedding>, StoreError> {
        let sql = match self.layout {
            StoreLayout::Normalized => "SELECT persona_id, encoding FROM embedding ORDER BY id",
            StoreLayout::SingleTable => "SELECT name, encoding FROM persona ORDER BY rowid",
        };

        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut gallery = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            let (persona_id, encoding) = row?;
            match decode_embedding(&encoding) {
                Ok(embedding) => gallery.push(StoredEmbedding {
                    persona_id,
                    embedding,
                }),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        persona = %persona_id,
                        error = %e,
                        "skipping corrupt stored embedding"
                    );
                }
            }
        }

        tracing::debug!(loaded = gallery.len(), skipped, "gallery loaded");
        Ok(gallery)
    }

    fn get(&self, id: &str) -> Result<Option<Persona>, StoreError> {
        let sql = match self.layout {
            StoreLayout::Normalized => "SELECT id, name FROM persona WHERE id = ?1",
            StoreLayout::SingleTable => "SELECT name, name FROM persona WHERE name = ?1",
        };
        let persona = self
            .conn
            .query_row(sql, params![id], |row| {
                Ok(Persona {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()?;
        Ok(persona)
    }

    fn personas(&self) -> Result<Vec<PersonaSummary>, StoreError> {
        let sql = match self.layout {
            StoreLayout::Normalized => {
                "SELECT p.id, p.name, p.created_at, COUNT(e.id)
                 FROM persona p LEFT JOIN embedding e ON e.persona_id = p.id
                 GROUP BY p.id ORDER BY p.created_at, p.id"
            }
            StoreLayout::SingleTable => {
                "SELECT name, name, created_at, 1 FROM persona ORDER BY created_at, name"
            }
        };

        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(PersonaSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                enrolled_at: parse_timestamp(&row.get::<_, String>(2)?),
                embeddings: row.get::<_, i64>(3)? as usize,
            })
        })?;

        let personas = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(personas)
    }

    fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let sql = match self.layout {
            StoreLayout::Normalized => "DELETE FROM persona WHERE id = ?1",
            StoreLayout::SingleTable => "DELETE FROM persona WHERE name = ?1",
        };
        let deleted = self.conn.execute(sql, params![id])?;
        if deleted > 0 {
            tracing::info!(persona = id, "persona removed");
        }
        Ok(deleted > 0)
    }
}

/// Identify the layout of an existing `persona` table, if any.
fn detect_layout(conn: &Connection) -> Result<Option<StoreLayout>, StoreError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('persona')")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        Ok(None)
    } else if columns.iter().any(|c| c == "encoding") {
        Ok(Some(StoreLayout::SingleTable))
    } else {
        Ok(Some(StoreLayout::Normalized))
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}
