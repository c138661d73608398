//! # code-flow
//!
//! Repository understanding core: AST-aware chunking of source files,
//! embedding into per-repository vector spaces, retrieval-augmented
//! question answering that blends code with earlier conversations, and
//! structured analysis of commit diffs.
//!
//! ## Architecture
//!
//! Every call to the external generation/embedding provider goes through
//! one rate-limited gateway:
//!
//! ```text
//!   ┌──────────────┐     ┌────────────┐     ┌──────────────────────┐
//!   │ clone + walk │ ──▶ │  chunking  │ ──▶ │ indexer (batches of  │
//!   │   (git2)     │     │ AST | lines│     │ 10, 1s pause)        │
//!   └──────┬───────┘     └─────┬──────┘     └──────────┬───────────┘
//!          │                   │ first 10              │ code space
//!          │                   ▼                       ▼
//!          │            ┌────────────┐          ┌─────────────┐
//!          │            │    docs    │          │    store    │
//!          │            │ overview + │ ───────▶ │ (JSON files)│
//!          │            │  mermaid   │          └──────┬──────┘
//!          │            └────────────┘                 │
//!          ▼                                           ▼
//!   ┌──────────────┐                          ┌────────────────┐
//!   │   commits    │                          │      chat      │
//!   │ log → show → │                          │ embed question │
//!   │ diff → LLM   │                          │ code top 3     │
//!   │ quota guard  │                          │ history top 2  │
//!   └──────┬───────┘                          │ compose prompt │
//!          │                                  └───────┬────────┘
//!          └───────────────┬──────────────────────────┘
//!                          ▼
//!                ┌──────────────────────┐
//!                │   gateway (FIFO,     │
//!                │ concurrency cap, min │
//!                │ delay, 429 backoff)  │
//!                └──────────┬───────────┘
//!                           ▼
//!                  Ollama / OpenAI API
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for data dirs, provider and pacing
//! - [`models`] - Chunks, embedding records, repositories, conversations, commits and diffs
//! - [`error`] - Typed provider-call and question-validation errors
//! - [`chunking`] - tree-sitter chunking for JS/TS/Rust with a line-based fallback
//! - [`llm`] - HTTP generation/embedding clients, the call gateway and an injectable clock
//! - [`search`] - Cosine similarity, top-k / threshold retrieval and the batch indexer
//! - [`chat`] - Question answering over code and conversation spaces
//! - [`diff`] - Unified diff parser
//! - [`commits`] - Commit history analysis with quota fallback
//! - [`docs`] - Project overview, architecture diagram and per-component documentation
//! - [`git`] - Clone, log and per-commit patches via libgit2, file walking
//! - [`store`] - Persistence trait and the local JSON-backed store
//! - [`ingest`] - End-to-end repository ingestion

pub mod chat;
pub mod chunking;
pub mod commits;
pub mod config;
pub mod diff;
pub mod docs;
pub mod error;
pub mod git;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod search;
pub mod store;
