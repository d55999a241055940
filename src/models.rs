//! Core data models used throughout repo-chat.
//!
//! These types represent the documents, chunks, embedded chunks and dialog
//! turns that flow through the indexing and question-answering pipeline.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Whether a file is source code or documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Code,
    Doc,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Code => "code",
            DocumentKind::Doc => "doc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(DocumentKind::Code),
            "doc" => Some(DocumentKind::Doc),
            _ => None,
        }
    }
}

/// Per-file metadata, shared by reference between a document and its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// File extension without the dot (`"py"`, `"md"`).
    pub file_type: String,
    pub kind: DocumentKind,
    pub is_implementation: bool,
}

impl DocumentMetadata {
    pub fn is_code(&self) -> bool {
        self.kind == DocumentKind::Code
    }

    /// Display title; files are titled by their relative path.
    pub fn title(&self) -> &str {
        &self.path
    }
}

/// One readable file of a repository. Immutable once read.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub metadata: Arc<DocumentMetadata>,
}

/// A contiguous word window of a document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub document: Arc<DocumentMetadata>,
    /// 0-based window index within the source document.
    pub ordinal: usize,
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A retrieval hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    /// Insertion position in the index, used as the tie-breaker.
    pub position: usize,
}

/// One query/response exchange of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogTurn {
    pub id: Uuid,
    pub query: String,
    pub response: String,
    pub ordinal: usize,
}

/// Which stage of the answer parser produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    /// Fields came from the provider's structured-output channel.
    Native,
    /// A JSON object was recovered from the raw text.
    RecoveredJson,
    /// The raw text was used verbatim as the answer.
    RawText,
}

impl ParseTier {
    pub fn is_fallback(&self) -> bool {
        *self != ParseTier::Native
    }
}

/// Model response decoded into named fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredAnswer {
    pub rationale: String,
    pub answer: String,
    pub tier: ParseTier,
}

/// A source file cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub is_code: bool,
}
