//! # List Digest
//!
//! Mailing-list archive ingestion, thread reconstruction, and LLM-generated
//! summaries and digests, backed by a local SQLite corpus.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐   ┌──────────────┐
//! │   Archives   │──▶│  Normalize   │──▶│  Thread  │──▶│    SQLite    │
//! │ mbox/atom/eml│   │ Email stream │   │ resolver │   │ emails+threads│
//! └──────────────┘   └──────────────┘   └──────────┘   └──────┬───────┘
//!                                                             │
//!                        ┌────────────────────────────────────┘
//!                        ▼
//!                 ┌──────────────┐   ┌─────────┐
//!                 │ Orchestrator │──▶│   LLM   │
//!                 │ cache+limits │   │ provider│
//!                 └──────────────┘   └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ldg init                         # create database
//! ldg ingest ./2024-10-18.mbox.gz  # ingest a local archive
//! ldg fetch 2024-10-18             # download and ingest one day
//! ldg summarize pending            # summarize new threads
//! ldg digest daily 2024-10-18      # build a daily digest
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`normalize`] | mbox, Atom, and EML parsing into [`models::Email`] |
//! | [`thread`] | Root resolution and thread metadata |
//! | [`ingest`] | Idempotent persistence of emails and threads |
//! | [`archive`] | Archive download and decompression |
//! | [`summarize`] | Summarization orchestrator |
//! | [`llm`] | LLM provider abstraction |
//! | [`cache`] | Summary cache and storage backends |
//! | [`rate_limit`] | Per-model sliding-window limiter |
//! | [`retry`] | Exponential backoff for transient failures |
//! | [`truncate`] | Token-budget content selection |
//! | [`store`] | Read queries over the corpus |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod archive;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod prompt;
pub mod rate_limit;
pub mod retry;
pub mod stats;
pub mod store;
pub mod summarize;
pub mod thread;
pub mod truncate;
