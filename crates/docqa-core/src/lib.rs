//! # docqa core
//!
//! Query-time retrieval and reasoning for grounded document question
//! answering: query strategy analysis, hybrid vector + lexical search with
//! weighted Reciprocal Rank Fusion, re-ranking with a diversity bonus, and
//! multi-pass generation (draft, self-critique, conditional revision).
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Every
//! external collaborator is a trait, bundled into an injected
//! [`services::Services`] context.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Chunks, scored candidates, strategies, answers |
//! | [`error`] | [`error::PipelineError`] stage taxonomy |
//! | [`embedding`] / [`llm`] / [`store`] | Service traits |
//! | [`analyzer`] | Query classification and strategy |
//! | [`fusion`] / [`search`] | RRF fusion, dedup, hybrid search |
//! | [`rerank`] | Judgment and heuristic re-rankers |
//! | [`generate`] / [`critique`] / [`multipass`] | Answer passes |
//! | [`pipeline`] | `answer()` and `search()` entry points |

pub mod analyzer;
pub mod cost;
pub mod critique;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod generate;
pub mod llm;
pub mod models;
pub mod multipass;
pub mod pipeline;
pub mod prompts;
pub mod rerank;
pub mod search;
pub mod services;
pub mod store;
pub mod structured;

pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineConfig};
pub use services::Services;
