//! # Ferretero
//!
//! Hardware catalog ingestion, fuzzy search, and the operator tools that
//! keep the catalog populated.
//!
//! The catalog service pulls product fichas from the Daterium XML API into
//! SQLite (brands, families, products, images, synonyms) and serves a
//! trigram search over them. Operators drive it remotely through a
//! token-guarded admin API: a resumable seeding loop, a read-only monitor,
//! and an EAN backfill trigger.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────────┐
//! │  Daterium  │──▶│  ingest  │──▶│    SQLite    │
//! │  XML API   │   │ upsert   │   │ FTS5 trigram │
//! └────────────┘   └──────────┘   └──────┬───────┘
//!                                        │
//!                  ┌─────────────────────┤
//!                  ▼                     ▼
//!            ┌──────────┐          ┌──────────┐
//!            │   CLI    │          │   HTTP   │◀── seed / monitor /
//!            │          │          │  /admin  │    backfill-ean
//!            └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ferretero init
//! ferretero ingest --xml ./dump.xml
//! ferretero search "broca 6mm"
//! ferretero serve
//! ferretero seed --strategy brands --batch-size 5
//! ferretero monitor --once
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`provider`] | Catalog provider trait and Daterium client |
//! | [`ingest`] | Record upserts, audit log, ingest cursors |
//! | [`text`] | Provider text cleanup |
//! | [`search`] | Trigram product search |
//! | [`server`] | Public and admin HTTP API |
//! | [`admin_client`] | Admin API client used by the operator tools |
//! | [`seeder`] | Resumable batch seeding |
//! | [`monitor`] | Polling monitor |
//! | [`backfill`] | EAN backfill, server and operator side |

pub mod admin_client;
pub mod backfill;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod db;
pub mod ean;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod progress;
pub mod provider;
pub mod search;
pub mod seeder;
pub mod server;
pub mod stats;
pub mod terms;
pub mod text;
