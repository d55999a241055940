//! # repo-chat CLI
//!
//! Ask questions about a code repository from the terminal, or serve the
//! HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! repo-chat --config ./config/repo-chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repo-chat ask --repo <locator> "<query>"` | Index a repository and answer one question |
//! | `repo-chat chat --repo <locator>` | Interactive session over stdin (`/clear`, `/exit`) |
//! | `repo-chat index --repo <locator>` | Index a repository and print the report |
//! | `repo-chat serve` | Start the HTTP server |
//!
//! Credentials are read from the environment (`GEMINI_API_KEY`,
//! `GROQ_API_KEY`, `OPENAI_API_KEY`); a `.env` file in the working directory
//! is loaded first when present.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use repo_chat::config::{load_config_or_default, Config};
use repo_chat::engine::{AskResponse, IndexReport, RagSession};
use repo_chat::server;

/// Chat with a code repository.
#[derive(Parser)]
#[command(name = "repo-chat", version, about = "Retrieval-augmented Q&A over a code repository")]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is absent.
    #[arg(long, global = true, default_value = "./config/repo-chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a repository and answer a single question.
    Ask {
        /// Repository URL or local path.
        #[arg(long)]
        repo: String,
        /// The question.
        query: String,
        /// Print the rationale as well as the answer.
        #[arg(long)]
        rationale: bool,
    },

    /// Index a repository, then answer questions read from stdin.
    Chat {
        #[arg(long)]
        repo: String,
    },

    /// Index a repository and print the indexing report.
    Index {
        #[arg(long)]
        repo: String,
        /// Ignore any stored snapshot and rebuild from source.
        #[arg(long)]
        refresh: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("repo_chat=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Ask {
            repo,
            query,
            rationale,
        } => {
            let mut session = open_session(&config, &repo, false).await?;
            let response = session.ask(&query).await?;
            print_answer(&response, rationale);
        }
        Commands::Chat { repo } => {
            let mut session = open_session(&config, &repo, false).await?;
            println!("Ask about the repository. Commands: /clear, /exit");
            run_chat(&mut session, BufReader::new(tokio::io::stdin())).await?;
        }
        Commands::Index { repo, refresh } => {
            open_session(&config, &repo, refresh).await?;
        }
        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}

async fn open_session(config: &Config, repo: &str, refresh: bool) -> Result<RagSession> {
    let mut session = RagSession::from_config(config).await?;
    let report = if refresh {
        session.rebuild(repo).await?
    } else {
        session.index(repo).await?
    };
    print_report(&report);
    Ok(session)
}

fn print_report(report: &IndexReport) {
    println!("indexed {}", report.repository);
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    if report.failed > 0 {
        println!("  failed: {}", report.failed);
    }
    if report.from_snapshot {
        println!("  (restored from snapshot)");
    }
}

fn print_answer(response: &AskResponse, with_rationale: bool) {
    if with_rationale && !response.answer.rationale.is_empty() {
        println!("## Rationale\n\n{}\n", response.answer.rationale);
    }
    println!("{}", response.answer.answer);

    let sources = response.sources();
    if !sources.is_empty() {
        println!("\nSources:");
        for source in sources {
            println!("  - {} ({})", source.path, source.file_type);
        }
    }
}

async fn run_chat<R>(session: &mut RagSession, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();

        match query {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                session.clear_memory();
                println!("conversation cleared");
            }
            _ => match session.ask(query).await {
                Ok(response) => print_answer(&response, false),
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }

    Ok(())
}
