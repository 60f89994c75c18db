//! # docqa
//!
//! Grounded, citation-backed question answering over large documents.
//!
//! The answering pipeline itself lives in [`docqa_core`] and knows nothing
//! about storage or HTTP. This crate supplies the concrete collaborators
//! (SQLite + FTS5 store, embedding and completion clients) plus the CLI and
//! HTTP surfaces.
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────────────────────┐
//! │  import  │──▶│   SQLite     │◀──│ docqa-core Pipeline          │
//! │  (JSONL) │   │ FTS5 + vecs  │   │ analyze → search → rerank →  │
//! └──────────┘   └──────────────┘   │ draft → critique → revise    │
//!                                   └──────────────┬───────────────┘
//!                                   ┌──────────────┴──────┐
//!                                   ▼                     ▼
//!                              ┌──────────┐         ┌──────────┐
//!                              │   CLI    │         │   HTTP   │
//!                              └──────────┘         └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Vector and lexical backends over SQLite |
//! | [`import`] | JSONL chunk import |
//! | [`embedding`] | Embedding clients |
//! | [`llm`] | Completion clients |
//! | [`retry`] | Backoff and HTTP error classification |
//! | [`app`] | Config → pipeline wiring |
//! | [`server`] | HTTP API |

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod import;
pub mod llm;
pub mod migrate;
pub mod retry;
pub mod server;
pub mod sqlite_store;
