//! # Handbook Assistant CLI (`handbook`)
//!
//! ## Usage
//!
//! ```bash
//! handbook --config ./config/handbook.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `handbook chat` | Interactive question loop with conversation history |
//! | `handbook ask "<question>"` | Answer one question and exit |
//! | `handbook serve` | Start the HTTP API |
//! | `handbook keywords "<text>"` | Show extracted keywords and the metadata filter |
//! | `handbook init` | Create the SQLite passage store |
//!
//! Logs go to stderr; set `RUST_LOG` or pass `--verbose` for more detail.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use handbook_assistant::chain::RetrievalChain;
use handbook_assistant::config::{self, Config};
use handbook_assistant::filter::WhereFilter;
use handbook_assistant::keywords::KeywordExtractor;
use handbook_assistant::store::sqlite::SqliteVectorStore;
use handbook_assistant::store::VectorStore;
use handbook_assistant::{repl, server};

/// Handbook Assistant: retrieval-augmented answers from a student handbook.
#[derive(Parser)]
#[command(name = "handbook", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is an error; an empty file uses all defaults.
    #[arg(long, global = true, default_value = "./config/handbook.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively. Type `quit` to exit.
    Chat,

    /// Answer a single question without history.
    Ask {
        question: String,

        /// Passages to request from the store per query phrasing.
        #[arg(long, short = 'n')]
        n_results: Option<usize>,

        /// Print the ranked context (to stderr) before the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print the keywords and metadata filter extracted from `text`.
    Keywords { text: String },

    /// Create the SQLite passage store and its schema.
    Init,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "handbook_assistant=debug,handbook=debug"
    } else {
        "handbook_assistant=info,handbook=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Chat => {
            let chain = RetrievalChain::from_config(&cfg).await?;
            println!("{} ({}). Type 'quit' to exit.", cfg.assistant.title, cfg.assistant.name);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let history = repl::run_chat(&chain, stdin, tokio::io::stdout()).await?;
            tracing::debug!(turns = history.len() / 2, "chat session ended");
        }
        Commands::Ask {
            question,
            n_results,
            show_context,
        } => {
            let chain = RetrievalChain::from_config(&cfg).await?;
            ask(&chain, &question, n_results, show_context).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Keywords { text } => {
            print_keywords(&cfg, &text)?;
        }
        Commands::Init => {
            if cfg.store.backend != "sqlite" {
                bail!(
                    "init only applies to the sqlite store backend (configured: {})",
                    cfg.store.backend
                );
            }
            let store = SqliteVectorStore::open(&cfg.store.path)
                .await
                .with_context(|| format!("failed to open {}", cfg.store.path.display()))?;
            let count = store.count().await?;
            store.close().await;
            println!(
                "Store initialized at {} ({} passages).",
                cfg.store.path.display(),
                count
            );
        }
    }

    Ok(())
}

async fn ask(
    chain: &RetrievalChain,
    question: &str,
    n_results: Option<usize>,
    show_context: bool,
) -> anyhow::Result<()> {
    if !show_context {
        let mut input = handbook_assistant::models::ChainInput::new(question);
        input.n_results = n_results;
        let output = chain.invoke(input).await?;
        println!("{}", output.answer);
        return Ok(());
    }

    let retrieval = chain.retrieve(question, None, n_results).await?;
    eprintln!("Alternative queries:");
    for q in &retrieval.alternative_queries {
        eprintln!("  {}", q);
    }
    eprintln!("Ranked context:");
    for (i, doc) in retrieval.documents.iter().enumerate() {
        eprintln!("  {}. [{:.4}] {}", i + 1, doc.score, doc.content.replace('\n', " "));
    }
    let answer = chain.answer(question, None, &retrieval).await?;
    println!("{}", answer);
    Ok(())
}

fn print_keywords(cfg: &Config, text: &str) -> anyhow::Result<()> {
    let extractor = KeywordExtractor::from_config(&cfg.keywords);
    let keywords = extractor.extract(text, cfg.keywords.use_fallback, cfg.keywords.include_verb);
    println!(
        "keywords: {}",
        keywords.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    match WhereFilter::from_keywords(&keywords)? {
        Some(filter) => println!("filter: {}", serde_json::to_string_pretty(&filter.to_json())?),
        None => println!("filter: none"),
    }
    Ok(())
}
