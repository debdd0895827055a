//! # knowbase
//!
//! **A personal knowledge base: file/message ingestion, a per-user vector
//! index, and grounded retrieval-augmented question answering.**
//!
//! A user organizes content into named **spaces**. Each space holds
//! **items** — plain-text messages or uploaded files — which are extracted
//! to canonical text, embedded, and indexed for scoped semantic search.
//! Questions asked against a space are answered by retrieving the most
//! relevant items and grounding an LLM call in their text, with every
//! answer traceable back to the items it cited.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌─────────────┐   ┌────────────┐
//! │ Extractor │──▶│ Embedder  │──▶│ VectorIndex │──▶│ QueryEngine │
//! │ (§4.1)    │   │ (§4.2)    │   │ (§4.3)      │   │ (§4.4)      │
//! └───────────┘   └───────────┘   └─────────────┘   └────────────┘
//!                                        │                 │
//!                                        ▼                 ▼
//!                                 ┌───────────────────────────┐
//!                                 │      MetadataStore (§4.5)  │
//!                                 │   spaces / items / queries │
//!                                 └───────────────────────────┘
//! ```
//!
//! ## Data Flow — ingestion
//!
//! Save-item request → [`metadata_store`] inserts an Item (status
//! *pending*) → [`extract`] produces text (files only) → [`embedding`]
//! produces a unit vector → [`vector_index`] adds `(item_id, vector,
//! space_id)` → [`metadata_store`] sets status *ready*. Any failure between
//! insert and ready triggers compensating cleanup (see [`app`]).
//!
//! ## Data Flow — query
//!
//! Ask-question request → [`embedding`] embeds the question →
//! [`vector_index`] searches scoped to the space → [`metadata_store`]
//! hydrates the hits into Items → [`query_engine`] assembles a
//! character-budgeted grounded context → [`llm`] produces an answer →
//! [`metadata_store`] persists the resulting Query.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | `AppContext`: owns every shared service, exposes the Space/Item/Query/admin operations |
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Space`, `Item`, `Query`, and their enums |
//! | [`errors`] | The closed `CoreError` kind set shared by every component |
//! | [`extract`] | Text extraction dispatch on the closed MIME-family set |
//! | [`ocr`] | Pluggable OCR backend for the `image` extraction family |
//! | [`embedding`] | Embedding provider trait, OpenAI/Ollama/local implementations |
//! | [`vector_index`] | Per-user HNSW-backed approximate-nearest-neighbor index |
//! | [`llm`] | Grounded-answer LLM client |
//! | [`query_engine`] | Embed → retrieve → assemble context → answer → persist |
//! | [`metadata_store`] | Durable ordered Space/Item/Query record store (SQLite) |
//! | [`db`] | SQLite connection pool with WAL mode, one database per user |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! knowbase is configured via a TOML file (default: `config/kb.toml`). See
//! [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod extract;
pub mod llm;
pub mod metadata_store;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod query_engine;
pub mod vector_index;
