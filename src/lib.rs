//! # repo-chat
//!
//! Retrieval-augmented question answering over a single code repository.
//!
//! A repository (remote Git URL or local directory) is read into documents,
//! split into overlapping word windows, embedded in concurrent batches and
//! held in an in-memory vector index. Questions are embedded the same way,
//! the nearest chunks are placed in a fixed prompt together with the
//! conversation so far, and the model's reply is parsed into a
//! `rationale` / `answer` pair.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────┐   ┌────────────────┐   ┌──────────────┐
//! │   Sources   │──▶│  Chunk  │──▶│ Embed pipeline │──▶│ Vector index │
//! │  Git / FS   │   │         │   │ batch + retry  │   │  atomic swap │
//! └─────────────┘   └─────────┘   └────────────────┘   └──────┬───────┘
//!                                                             │ top-k
//!                     ┌────────────┐   ┌────────────┐   ┌─────▼──────┐
//!                     │   Memory   │──▶│   Prompt   │──▶│  Generate  │
//!                     └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! [`engine::RagSession`] ties the pieces together; [`server`] and the
//! `repo-chat` binary are thin adapters over it.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed errors per layer |
//! | [`models`] | Core data types |
//! | [`connector_git`] | Cloning through the `git` CLI |
//! | [`connector_fs`] | Repository file scanner |
//! | [`sources`] | Locator resolution: clone or read locally |
//! | [`chunk`] | Word-window chunking |
//! | [`retry`] | Exponential backoff under a wall-clock budget |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`embed_pipeline`] | Batched, concurrent, order-preserving embedding |
//! | [`index`] | In-memory cosine index |
//! | [`llm`] | Completion provider adapter |
//! | [`prompt`] | Prompt assembly and answer parsing |
//! | [`generate`] | Answer generation |
//! | [`memory`] | Conversation memory |
//! | [`snapshot`] | SQLite index snapshots |
//! | [`engine`] | The RAG session |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod connector_git;
pub mod embed_pipeline;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generate;
pub mod index;
pub mod llm;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod retry;
pub mod server;
pub mod snapshot;
pub mod sources;
