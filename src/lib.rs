//! # docdedup
//!
//! Document canonicalization and deduplication for archival ingestion
//! pipelines. Documents arrive from many overlapping sources (re-scanned
//! PDFs, re-OCR'd copies, re-published emails); the engine decides which
//! ones are the same document and which single copy becomes the system of
//! record.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌────────────────┐
//! │ connector_fs│──▶│ Deduplicator          │──▶│ CanonicalStore │
//! │ (walkdir)   │   │ hasher + quality      │   │ SQLite/memory  │
//! └─────────────┘   └──────────────────────┘   └───────┬────────┘
//!                                                      │
//!                                                      ▼
//!                                                ┌──────────┐
//!                                                │   CLI    │
//!                                                │ (dedup)  │
//!                                                └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dedup init                          # create database
//! dedup ingest ./vol1 --collection vol1
//! dedup ingest ./vol2 --collection vol2
//! dedup scan                          # batch near-duplicate + page overlap
//! dedup stats
//! dedup duplicates --type near-duplicate
//! dedup export --format jsonl --output out/dedup.jsonl
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`hasher`] | File, content, fuzzy and per-page hashing |
//! | [`quality`] | OCR quality scoring |
//! | [`canonical_id`] | Content hash → stable canonical id |
//! | [`store`] | `CanonicalStore` trait, SQLite and in-memory backends |
//! | [`dedup`] | The deduplication engine |
//! | [`extract`] | Header/metadata parsing from text |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod canonical_id;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod dedup;
pub mod error;
pub mod export;
pub mod extract;
pub mod get;
pub mod hasher;
pub mod ingest;
pub mod logging;
pub mod maintain;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod quality;
pub mod stats;
pub mod store;

pub use dedup::{Deduplicator, DedupOptions, Outcome, RunSummary};
pub use error::{DedupError, Result};
