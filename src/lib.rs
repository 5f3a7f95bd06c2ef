//! # Anchorage
//!
//! A temporally-aware document grounding engine for retrieval-augmented
//! chat over business documents.
//!
//! Anchorage ingests spreadsheets, PDFs, Word documents, slide decks, and
//! delimited text into addressable chunks, detects and analyzes the date
//! columns that drive supply-chain questions (lead times, trends,
//! seasonality), and serves hybrid keyword + semantic retrieval with
//! cell-level citations. Indexed content expires on a fixed TTL; the
//! uploaded document, not the index, is the system of record.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌───────────┐
//! │ Uploads  │──▶│     Pipeline      │──▶│  SQLite    │
//! │ xlsx/pdf │   │ Parse → Temporal  │   │ FTS5+Vec   │
//! │ docx/csv │   │ → Embed → Index   │   │ (24h TTL)  │
//! └──────────┘   └───────────────────┘   └─────┬─────┘
//!                                              │
//!                          ┌───────────────────┤
//!                          ▼                   ▼
//!                    ┌──────────┐       ┌──────────────┐
//!                    │  Search  │──────▶│   Context    │
//!                    │ (hybrid) │       │ + Citations  │
//!                    └──────────┘       └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunks, locators, temporal annotations |
//! | [`parser`] | Per-format document parsers |
//! | [`temporal`] | Date-column detection and temporal statistics |
//! | [`embedding`] | Embedding providers and the content-hash cache |
//! | [`index`] | Batched index writes, supersede, TTL expiry |
//! | [`search`] | Hybrid keyword + semantic retrieval |
//! | [`context`] | Grounding-context assembly and citations |
//! | [`catalog`] | Source-document registry |
//! | [`pipeline`] | End-to-end ingestion |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod search;
pub mod temporal;
