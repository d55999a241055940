//! The retrieval-augmented generation session.
//!
//! A [`RagSession`] owns one conversation's state: the vector index of the
//! current repository and the conversation memory. It is an explicit value
//! passed by reference; nothing here is process-global.
//!
//! ```text
//! index:  fetch ─▶ chunk ─▶ embed (batched, concurrent) ─▶ build store ─▶ swap in
//! ask:    embed query ─▶ top-k ─▶ prompt + history ─▶ complete ─▶ parse ─▶ append turn
//! ```
//!
//! Both operations only commit their effect at the very end (the index
//! swap, the memory append), so a failed or cancelled call leaves the
//! session exactly as it was.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use crate::chunk::split_all;
use crate::config::{ChunkingConfig, Config, SourceConfig};
use crate::embed_pipeline::EmbeddingPipeline;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::RagError;
use crate::generate::Generator;
use crate::index::{IndexStore, VectorIndex};
use crate::llm::{create_completion_provider, CompletionProvider};
use crate::memory::{ConversationMemory, TranscriptMessage};
use crate::models::{DialogTurn, ScoredChunk, SourceRef, StructuredAnswer};
use crate::snapshot::SnapshotStore;
use crate::sources::{self, normalize_locator, repository_key};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Indexed { repository: String, chunks: usize },
}

/// Outcome of [`RagSession::index`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub repository: String,
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub failed: usize,
    pub from_snapshot: bool,
}

/// Outcome of [`RagSession::ask`].
#[derive(Debug, Clone)]
pub struct AskResponse {
    pub answer: StructuredAnswer,
    pub retrieved: Vec<ScoredChunk>,
}

impl AskResponse {
    /// Distinct source files of the retrieved chunks, in retrieval order.
    pub fn sources(&self) -> Vec<SourceRef> {
        let mut seen = HashSet::new();
        self.retrieved
            .iter()
            .filter(|hit| seen.insert(hit.chunk.document.path.as_str()))
            .map(|hit| SourceRef {
                path: hit.chunk.document.path.clone(),
                file_type: hit.chunk.document.file_type.clone(),
                is_code: hit.chunk.document.is_code(),
            })
            .collect()
    }
}

pub struct RagSession {
    chunking: ChunkingConfig,
    top_k: usize,
    source: SourceConfig,
    pipeline: EmbeddingPipeline,
    generator: Generator,
    index: VectorIndex,
    memory: ConversationMemory,
    snapshots: Option<SnapshotStore>,
    locator: Option<String>,
}

impl RagSession {
    /// Session over explicit providers. Snapshots are off until
    /// [`with_snapshots`](Self::with_snapshots) is called.
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        let retry = config.retry.policy();
        Self {
            chunking: config.chunking,
            top_k: config.retrieval.top_k,
            source: config.source.clone(),
            pipeline: EmbeddingPipeline::from_config(embedder, retry, &config.embedding),
            generator: Generator::new(completer, retry),
            index: VectorIndex::new(),
            memory: ConversationMemory::new(),
            snapshots: None,
            locator: None,
        }
    }

    /// Session with providers and snapshot store built from `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let completer = create_completion_provider(&config.generation)?;
        let mut session = Self::new(config, embedder, completer);
        if let Some(path) = &config.snapshot.path {
            let store = SnapshotStore::open(path)
                .await
                .with_context(|| format!("Failed to open snapshot database {}", path.display()))?;
            session = session.with_snapshots(store);
        }
        Ok(session)
    }

    #[must_use]
    pub fn with_snapshots(mut self, store: SnapshotStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn state(&self) -> SessionState {
        match (self.index.snapshot(), &self.locator) {
            (Some(store), Some(locator)) => SessionState::Indexed {
                repository: locator.clone(),
                chunks: store.len(),
            },
            _ => SessionState::Uninitialized,
        }
    }

    /// Locator of the currently indexed repository.
    pub fn current_locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    /// Whether `locator` names the repository that is currently indexed.
    pub fn is_indexed(&self, locator: &str) -> bool {
        self.locator.as_deref() == Some(normalize_locator(locator).as_str())
    }

    /// Index `locator`, reusing a matching snapshot when one exists.
    pub async fn index(&mut self, locator: &str) -> Result<IndexReport, RagError> {
        self.index_inner(locator, true).await
    }

    /// Index `locator` from source, ignoring any snapshot.
    pub async fn rebuild(&mut self, locator: &str) -> Result<IndexReport, RagError> {
        self.index_inner(locator, false).await
    }

    async fn index_inner(
        &mut self,
        locator: &str,
        use_snapshot: bool,
    ) -> Result<IndexReport, RagError> {
        let locator = normalize_locator(locator);
        let key = repository_key(&locator);

        if use_snapshot {
            if let Some(report) = self.install_snapshot(&locator, &key).await {
                return Ok(report);
            }
        }

        let documents = {
            let locator = locator.clone();
            let settings = self.source.clone();
            tokio::task::spawn_blocking(move || sources::fetch(&locator, &settings))
                .await
                .map_err(|e| RagError::SourceUnavailable(format!("fetch task failed: {}", e)))
                .and_then(|r| r)
                .map_err(|e| RagError::IndexingFailed(Box::new(e)))?
        };

        let chunks = split_all(&documents, self.chunking.chunk_size, self.chunking.overlap);
        let chunk_count = chunks.len();
        let embedded = self.pipeline.embed_chunks(chunks).await;

        if chunk_count > 0 && embedded.embedded.is_empty() {
            return Err(RagError::IndexingFailed(Box::new(RagError::NoEmbeddings {
                failed: embedded.failed,
            })));
        }

        let report = IndexReport {
            repository: locator.clone(),
            documents: documents.len(),
            chunks: chunk_count,
            embedded: embedded.embedded.len(),
            failed: embedded.failed,
            from_snapshot: false,
        };

        let store = IndexStore::new(locator.clone(), self.pipeline.dims(), embedded.embedded)
            .map_err(|e| RagError::IndexingFailed(Box::new(e.into())))?;

        if let Some(snapshots) = &self.snapshots {
            if let Err(e) = snapshots
                .save(&key, &locator, self.pipeline.model_name(), report.documents, &store)
                .await
            {
                tracing::warn!(error = %e, repository = %locator, "failed to save index snapshot");
            }
        }

        self.index.install(Arc::new(store));
        self.locator = Some(locator);

        tracing::info!(
            repository = %report.repository,
            documents = report.documents,
            chunks = report.chunks,
            failed = report.failed,
            embedder = self.pipeline.provider_name(),
            "repository indexed"
        );
        Ok(report)
    }

    /// Try to install a stored snapshot. Any snapshot problem falls back to
    /// a full build.
    async fn install_snapshot(&mut self, locator: &str, key: &str) -> Option<IndexReport> {
        let snapshots = self.snapshots.as_ref()?;
        let dims = self.pipeline.dims();
        let loaded = match snapshots.load(key, self.pipeline.model_name(), dims).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, repository = %locator, "failed to read index snapshot");
                return None;
            }
        };

        let documents = loaded.documents;
        let store = match IndexStore::new(locator, dims, loaded.items) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(error = %e, repository = %locator, "unusable index snapshot");
                return None;
            }
        };
        let chunks = store.len();
        self.index.install(Arc::new(store));
        self.locator = Some(locator.to_string());

        tracing::info!(repository = %locator, chunks, "repository restored from snapshot");
        Some(IndexReport {
            repository: locator.to_string(),
            documents,
            chunks,
            embedded: chunks,
            failed: 0,
            from_snapshot: true,
        })
    }

    /// Answer `query` from the indexed repository and record the turn.
    pub async fn ask(&mut self, query: &str) -> Result<AskResponse, RagError> {
        if self.locator.is_none() {
            return Err(RagError::NotIndexed);
        }
        let store = self.index.snapshot().ok_or(RagError::NotIndexed)?;

        let query_vector = self
            .pipeline
            .embed_query(query)
            .await
            .map_err(RagError::QueryEmbedding)?;
        let retrieved = store.query(&query_vector, self.top_k)?;
        let context: Vec<_> = retrieved.iter().map(|hit| hit.chunk.clone()).collect();

        tracing::debug!(
            hits = retrieved.len(),
            generator = self.generator.provider_name(),
            "generating answer"
        );
        let answer = self
            .generator
            .generate(query, &context, self.memory.turns())
            .await?;

        self.memory.append(query, answer.answer.clone());
        Ok(AskResponse { answer, retrieved })
    }

    /// Replace the conversation from an external transcript.
    pub fn restore_context(&mut self, messages: &[TranscriptMessage]) -> usize {
        let kept = self.memory.restore(messages);
        tracing::info!(turns = kept, "conversation context restored");
        kept
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    pub fn turns(&self) -> &[DialogTurn] {
        self.memory.turns()
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }
}
