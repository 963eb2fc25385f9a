//! # kb-harvest
//!
//! Knowledge-base ingestion pipeline for authentication-gated sources.
//!
//! kb-harvest crawls a fixed list of registered sources — logging in where
//! credentials are stored — extracts their articles, summarizes the
//! collected corpus through a text-completion service, splits it into
//! retrieval-sized chunks, and embeds those chunks for semantic search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────────────┐   ┌───────────┐
//! │   Browser    │──▶│        Coordinator          │──▶│  SQLite   │
//! │ auth/discover│   │ extract → summarize →       │   │ sources   │
//! │  /extract    │   │ chunk → embed               │   │ chunks    │
//! └──────────────┘   └──────┬──────────────┬───────┘   │ vectors   │
//!                           ▼              ▼           └─────┬─────┘
//!                    ┌────────────┐ ┌────────────┐           ▼
//!                    │ Completion │ │ Embedding  │     ┌───────────┐
//!                    │  service   │ │  service   │     │  Search   │
//!                    └────────────┘ └────────────┘     └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbh init                            # create database
//! kbh add "Rechtspraak" https://...   # register a source
//! kbh harvest all                     # crawl, summarize, chunk, embed
//! kbh search "bestuurdersaansprakelijkheid"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`browser`] | Headless-browser session and page driver |
//! | [`auth`] | Per-site login strategies |
//! | [`discover`] | Article link discovery |
//! | [`extract`] | Main-content extraction |
//! | [`chunk`] | Heading-aware text chunking |
//! | [`summarize`] | Windowed LLM summarization |
//! | [`indexer`] | Batched embedding indexing |
//! | [`pipeline`] | The harvest coordinator |
//! | [`completion`] | Completion service client |
//! | [`embedding`] | Embedding service client |
//! | [`search`] | Semantic search over stored vectors |
//! | [`progress`] | Progress events and cancellation |
//! | [`store`] | Persistence operations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod browser;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod discover;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod search;
pub mod sources_cmd;
pub mod store;
pub mod summarize;
