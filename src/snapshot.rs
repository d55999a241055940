//! Persisted index snapshots in SQLite.
//!
//! A snapshot stores everything needed to reinstall an index without
//! re-embedding: document metadata, chunk text and ordinals, and each
//! vector as a little-endian `f32` BLOB. Snapshots are keyed by the
//! repository key (see [`repository_key`](crate::sources::repository_key)).
//!
//! A snapshot taken with a different embedding model or dimensionality is
//! deleted on load rather than used.

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::SnapshotError;
use crate::index::IndexStore;
use crate::models::{Chunk, DocumentKind, DocumentMetadata, EmbeddedChunk};

/// A snapshot read back from disk.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub locator: String,
    pub documents: usize,
    pub items: Vec<EmbeddedChunk>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    /// Open (creating if needed) the snapshot database at `path`.
    pub async fn open(path: &Path) -> Result<Self, SnapshotError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), SnapshotError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                repo_key TEXT PRIMARY KEY,
                locator TEXT NOT NULL,
                model TEXT NOT NULL,
                dims INTEGER NOT NULL,
                document_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_documents (
                repo_key TEXT NOT NULL,
                doc_index INTEGER NOT NULL,
                path TEXT NOT NULL,
                file_type TEXT NOT NULL,
                kind TEXT NOT NULL,
                is_implementation INTEGER NOT NULL,
                PRIMARY KEY (repo_key, doc_index),
                FOREIGN KEY (repo_key) REFERENCES snapshots(repo_key) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_chunks (
                repo_key TEXT NOT NULL,
                position INTEGER NOT NULL,
                doc_index INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                text TEXT NOT NULL,
                vector BLOB NOT NULL,
                PRIMARY KEY (repo_key, position),
                FOREIGN KEY (repo_key) REFERENCES snapshots(repo_key) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the snapshot for `repo_key` with the contents of `store`.
    pub async fn save(
        &self,
        repo_key: &str,
        locator: &str,
        model: &str,
        documents: usize,
        store: &IndexStore,
    ) -> Result<(), SnapshotError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM snapshots WHERE repo_key = ?")
            .bind(repo_key)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO snapshots (repo_key, locator, model, dims, document_count, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(repo_key)
        .bind(locator)
        .bind(model)
        .bind(store.dims() as i64)
        .bind(documents as i64)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        let mut doc_indices: HashMap<&str, i64> = HashMap::new();
        for (position, (chunk, vector)) in store.entries().enumerate() {
            let meta = &chunk.document;
            let doc_index = match doc_indices.get(meta.path.as_str()) {
                Some(&i) => i,
                None => {
                    let i = doc_indices.len() as i64;
                    sqlx::query(
                        "INSERT INTO snapshot_documents \
                         (repo_key, doc_index, path, file_type, kind, is_implementation) \
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(repo_key)
                    .bind(i)
                    .bind(&meta.path)
                    .bind(&meta.file_type)
                    .bind(meta.kind.as_str())
                    .bind(meta.is_implementation)
                    .execute(&mut *tx)
                    .await?;
                    doc_indices.insert(meta.path.as_str(), i);
                    i
                }
            };

            sqlx::query(
                "INSERT INTO snapshot_chunks (repo_key, position, doc_index, ordinal, text, vector) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(repo_key)
            .bind(position as i64)
            .bind(doc_index)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.text)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(repo_key, chunks = store.len(), "saved index snapshot");
        Ok(())
    }

    /// Load the snapshot for `repo_key` if it matches `model` and `dims`.
    pub async fn load(
        &self,
        repo_key: &str,
        model: &str,
        dims: usize,
    ) -> Result<Option<LoadedSnapshot>, SnapshotError> {
        let header = sqlx::query(
            "SELECT locator, model, dims, document_count FROM snapshots WHERE repo_key = ?",
        )
        .bind(repo_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(header) = header else {
            tracing::debug!(repo_key, "no index snapshot");
            return Ok(None);
        };

        let stored_model: String = header.get("model");
        let stored_dims: i64 = header.get("dims");
        if stored_model != model || stored_dims != dims as i64 {
            tracing::info!(
                repo_key,
                stored_model = %stored_model,
                stored_dims,
                model,
                dims,
                "discarding snapshot built with a different embedding model"
            );
            self.delete(repo_key).await?;
            return Ok(None);
        }

        let doc_rows = sqlx::query(
            "SELECT doc_index, path, file_type, kind, is_implementation \
             FROM snapshot_documents WHERE repo_key = ?",
        )
        .bind(repo_key)
        .fetch_all(&self.pool)
        .await?;

        let mut documents: HashMap<i64, Arc<DocumentMetadata>> = HashMap::new();
        for row in doc_rows {
            let kind: String = row.get("kind");
            let Some(kind) = DocumentKind::parse(&kind) else {
                tracing::info!(repo_key, kind = %kind, "discarding snapshot with unknown document kind");
                self.delete(repo_key).await?;
                return Ok(None);
            };
            documents.insert(
                row.get("doc_index"),
                Arc::new(DocumentMetadata {
                    path: row.get("path"),
                    file_type: row.get("file_type"),
                    kind,
                    is_implementation: row.get("is_implementation"),
                }),
            );
        }

        let chunk_rows = sqlx::query(
            "SELECT doc_index, ordinal, text, vector FROM snapshot_chunks \
             WHERE repo_key = ? ORDER BY position",
        )
        .bind(repo_key)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(chunk_rows.len());
        for row in chunk_rows {
            let blob: Vec<u8> = row.get("vector");
            let vector = blob_to_vec(&blob);
            let doc_index: i64 = row.get("doc_index");
            let document = documents.get(&doc_index).cloned();
            let (Some(document), true) = (document, vector.len() == dims) else {
                tracing::info!(repo_key, "discarding corrupt index snapshot");
                self.delete(repo_key).await?;
                return Ok(None);
            };
            let ordinal: i64 = row.get("ordinal");
            items.push(EmbeddedChunk {
                chunk: Chunk {
                    text: row.get("text"),
                    document,
                    ordinal: ordinal as usize,
                },
                vector,
            });
        }

        let document_count: i64 = header.get("document_count");
        tracing::info!(repo_key, chunks = items.len(), "loaded index snapshot");
        Ok(Some(LoadedSnapshot {
            locator: header.get("locator"),
            documents: document_count as usize,
            items,
        }))
    }

    pub async fn delete(&self, repo_key: &str) -> Result<(), SnapshotError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM snapshot_chunks WHERE repo_key = ?")
            .bind(repo_key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshot_documents WHERE repo_key = ?")
            .bind(repo_key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshots WHERE repo_key = ?")
            .bind(repo_key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
