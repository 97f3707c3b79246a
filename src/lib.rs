//! # code-rag
//!
//! Retrieval over a source tree: split files into semantic chunks, persist
//! them, embed them, index the vectors with HNSW, and answer similarity
//! queries with the original chunk content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────────┐
//! │  Walker  │──▶│ Extractor │──▶│ Chunk store │  (write path)
//! └──────────┘   └───────────┘   └──────┬──────┘
//!                                       │ ascending vector ids
//!                                       ▼
//!                 ┌──────────┐   ┌─────────────┐
//!                 │ Embedder │──▶│ HNSW index  │──▶ snapshot file
//!                 └──────────┘   └─────────────┘
//!                                       │
//!                      ┌────────────────┤
//!                      ▼                ▼
//!                 ┌──────────┐    ┌──────────┐
//!                 │   CLI    │    │   HTTP   │
//!                 │  (crag)  │    │  (axum)  │
//!                 └──────────┘    └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunk and search hit types |
//! | [`error`] | Typed errors per stage |
//! | [`languages`] | tree-sitter grammars and chunk node kinds |
//! | [`extract`] | File bytes → chunks |
//! | [`store`] | Chunk persistence (SQLite, in-memory) |
//! | [`walker`] | Directory traversal and vector id assignment |
//! | [`embedding`] | Embedding providers |
//! | [`index`] | HNSW vector index and snapshots |
//! | [`retriever`] | Index build and query |
//! | [`jobs`] | Background job registry |
//! | [`service`] | The `CodeRag` facade |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | tracing subscriber setup |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod jobs;
pub mod languages;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod server;
pub mod service;
pub mod store;
pub mod walker;
