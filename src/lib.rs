//! # chart-sync
//!
//! Incrementally mirrors Helm chart catalogs from chart repositories and OCI
//! registries into SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────┐
//! │   Sources    │──▶│    Reconciler     │──▶│  SQLite  │
//! │ index / OCI  │   │ diff+batch+latest │   │          │
//! └──────────────┘   └───────────────────┘   └──────────┘
//! ```
//!
//! The engine, models and store traits live in `chart-sync-core`; this
//! crate supplies configuration, the SQLite stores, the two network
//! sources and the `chart-sync` binary.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, environment overrides, selectors |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite application and version stores |
//! | [`chart`] | Chart archive reading and digest checks |
//! | [`fetch`] | HTTP client and retry |
//! | [`source_http`] | Helm chart repository source |
//! | [`source_oci`] | OCI registry source |
//! | [`sync`] | Sync pass orchestration |
//! | [`sources`] | Source listing |

pub mod chart;
pub mod config;
pub mod db;
pub mod fetch;
pub mod migrate;
pub mod source_http;
pub mod source_oci;
pub mod sources;
pub mod sqlite_store;
pub mod sync;
