//! # Bookshelf
//!
//! Loads directories of book-catalog spreadsheets into SQLite and answers
//! field-filtered, paginated searches over the result.
//!
//! Ingestion is incremental: every fully ingested file is recorded in a
//! ledger keyed by both path and content hash, so re-running a load over
//! an unchanged directory writes nothing and a copy of an already-loaded
//! file under a new name is skipped.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Coordinator │──▶│  Ingestors   │──▶│    SQLite    │
//! │ walk + pool │   │ read+batch   │   │ books+ledger │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                 ┌──────────┐          ┌──────────┐
//!                 │   CLI    │          │   HTTP   │
//!                 └──────────┘          └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Connection pool and per-worker connections |
//! | [`migrate`] | Schema creation |
//! | [`models`] | Core data types |
//! | [`field`] | Searchable fields and header aliases |
//! | [`hasher`] | Streaming SHA-256 content fingerprints |
//! | [`ledger`] | Processed-file ledger |
//! | [`reader`] | Tabular decoding strategies (xlsx, xls, delimited text) |
//! | [`normalize`] | Cell cleanup and catalog-entry construction |
//! | [`ingest`] | Per-file batch ingestion |
//! | [`load`] | Directory discovery and the worker pool |
//! | [`progress`] | Load progress reporting |
//! | [`query`] | Filter → SQL predicate |
//! | [`search`] | Paginated search execution |
//! | [`stats`] | Catalog statistics |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod field;
pub mod hasher;
pub mod ingest;
pub mod ledger;
pub mod load;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod query;
pub mod reader;
pub mod search;
pub mod server;
pub mod stats;
