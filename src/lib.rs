//! # Handbook Assistant
//!
//! A retrieval-augmented question-answering assistant over a single
//! document, such as a university student handbook.
//!
//! ## Architecture
//!
//! ```text
//!   question + history
//!          │
//!          ▼
//! ┌──────────────────┐   ┌────────────┐
//! │ alternative      │──▶│ Generation │
//! │ queries          │   └────────────┘
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐   ┌────────────┐
//! │ embed + keywords │──▶│ Embedding  │
//! └────────┬─────────┘   └────────────┘
//!          ▼
//! ┌──────────────────┐   ┌────────────┐
//! │ multi-query      │──▶│ VectorStore│
//! │ search + rerank  │   └────────────┘
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ grounded answer  │──▶ { answer }
//! └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! handbook init                          # create the SQLite store
//! handbook ask "What is the tardy policy?"
//! handbook chat                          # interactive session
//! handbook serve                         # HTTP API on [server].bind
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chain`] | The retrieval chain |
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Chat-completion provider abstraction |
//! | [`keywords`] | Keyword extraction for metadata filtering |
//! | [`filter`] | Metadata `where` filters |
//! | [`store`] | Vector store backends |
//! | [`prompt`] | Prompt templates |
//! | [`models`] | Core data types |
//! | [`server`] | HTTP API |
//! | [`repl`] | Interactive chat loop |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Error type |

pub mod chain;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod generation;
mod http;
pub mod keywords;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod repl;
pub mod server;
pub mod store;
