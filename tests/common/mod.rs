//! In-process stub providers and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use repo_chat::config::Config;
use repo_chat::embedding::EmbeddingProvider;
use repo_chat::engine::RagSession;
use repo_chat::error::ProviderError;
use repo_chat::llm::{Completion, CompletionProvider, Message};

pub const KEYWORDS: [&str; 4] = ["parser", "server", "database", "config"];

/// Embeds a text as its keyword counts plus a small constant floor.
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
    pub poison: Option<&'static str>,
    pub delay: Option<Duration>,
}

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            poison: None,
            delay: None,
        })
    }

    pub fn poisoned(marker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            poison: Some(marker),
            delay: None,
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            poison: None,
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .map(|k| lower.matches(k).count() as f32 + 0.01)
        .collect()
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }
    fn model_name(&self) -> &str {
        "keyword-v1"
    }
    fn dims(&self) -> usize {
        KEYWORDS.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(marker) = self.poison {
            if texts.iter().any(|t| t.contains(marker)) {
                return Err(ProviderError::Status {
                    provider: "keyword".into(),
                    status: 403,
                    body: "rejected".into(),
                });
            }
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Returns a fixed completion and records the prompt it was sent.
pub struct ScriptedCompleter {
    pub response: Mutex<Result<Completion, u16>>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub last_messages: Mutex<Vec<Message>>,
}

impl ScriptedCompleter {
    pub fn answering(rationale: &str, answer: &str) -> Arc<Self> {
        Self::with(Ok(Completion::Structured {
            rationale: rationale.to_string(),
            answer: answer.to_string(),
            raw: String::new(),
        }))
    }

    pub fn raw(text: &str) -> Arc<Self> {
        Self::with(Ok(Completion::Raw(text.to_string())))
    }

    /// Fails every call with the given HTTP status.
    pub fn failing(status: u16) -> Arc<Self> {
        Self::with(Err(status))
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(Completion::Raw("late".to_string()))),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        })
    }

    fn with(response: Result<Completion, u16>) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(response),
            delay: None,
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        })
    }

    pub fn set_response(&self, completion: Completion) {
        *self.response.lock().unwrap() = Ok(completion);
    }

    pub fn last_user_message(&self) -> String {
        self.last_messages
            .lock()
            .unwrap()
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompleter {
    fn name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, messages: &[Message]) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.response.lock().unwrap().clone();
        response.map_err(|status| ProviderError::Status {
            provider: "scripted".into(),
            status,
            body: "scripted failure".into(),
        })
    }
}

/// Small chunks, one embedding per call, fast retries.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.chunking.chunk_size = 20;
    config.chunking.overlap = 5;
    config.retrieval.top_k = 3;
    config.embedding.provider = "disabled".to_string();
    config.embedding.model = "keyword-v1".to_string();
    config.embedding.dims = KEYWORDS.len();
    config.embedding.batch_size = 1;
    config.embedding.concurrency = 4;
    config.retry.max_elapsed_secs = 1;
    config.retry.backoff_base_ms = 10;
    config.retry.max_backoff_ms = 40;
    config
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A small repository with one short file per keyword.
pub fn fixture_repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "x.py", "def x(tokens): the parser walks tokens and the parser builds a tree");
    write(root, "src/server.rs", "fn serve() { the server accepts connections; server loop }");
    write(root, "docs/database.md", "# Storage\n\nThe database keeps rows. database schema lives here.");
    write(root, "README.md", "# Demo\n\nSee config for settings. config keys are documented.");
    write(root, "node_modules/dep/index.js", "parser parser parser");
    tmp
}

pub fn session(
    embedder: Arc<KeywordEmbedder>,
    completer: Arc<ScriptedCompleter>,
) -> RagSession {
    RagSession::new(&test_config(), embedder, completer)
}

pub fn locator(dir: &TempDir) -> String {
    dir.path().to_string_lossy().to_string()
}
