//! # Snaphunt
//!
//! A CV search and analysis engine: ingest resume PDFs from local paths,
//! archives, or URLs, index them as embeddings, and query them with
//! semantic retrieval plus quota-aware LLM analysis.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Resolve    │──▶│  Pipeline     │──▶│  Qdrant   │
//! │ dir/zip/url │   │ Chunk+Embed  │   │  vectors  │
//! └────────────┘   └──────┬───────┘   └────┬─────┘
//!                         │                │
//!                    ┌────▼────┐     ┌─────▼─────┐
//!                    │ SQLite  │     │ Retrieval │
//!                    │ registry│     │ + Analyze │
//!                    └─────────┘     └───────────┘
//! ```
//!
//! Every outbound AI call (embedding or completion) passes through one
//! [`rate::RateGate`], which enforces burst spacing, per-window request
//! and token budgets, and a fail-fast cooldown after confirmed quota
//! exhaustion.
//!
//! ## Quick Start
//!
//! ```bash
//! snaphunt init                          # create database
//! snaphunt ingest ./cvs                  # index a directory of PDFs
//! snaphunt query "rust engineer"         # ranked source list
//! snaphunt analyze "rust engineer"       # LLM suitability analysis
//! snaphunt models                        # list available models
//! snaphunt reset                         # drop vectors, keep registry
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`resolve`] | Location resolution (file, dir, ZIP, URL, bucket) |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Sentence-aware text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Completion provider abstraction |
//! | [`provider`] | Provider detection and error classification |
//! | [`rate`] | Burst spacing, quota windows, cooldowns |
//! | [`registry`] | SQLite registry (sources, documents, analysis cache) |
//! | [`vector`] | Vector store abstraction (Qdrant, in-memory) |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Retrieval and source ranking |
//! | [`analyze`] | LLM analysis orchestration |
//! | [`system`] | Full reset |

pub mod analyze;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod provider;
pub mod rate;
pub mod registry;
pub mod resolve;
pub mod search;
pub mod system;
pub mod vector;
