//! # chart-sync core
//!
//! Storage-agnostic logic for chart-sync: data models, the application and
//! version store traits, the artifact source trait, and the version
//! reconciliation engine (catalog diff, bounded batching, latest-pointer
//! swap, bounded-parallel fetch, retirement of vanished applications).
//!
//! This crate does no network or database I/O of its own. Concrete sources
//! and the SQLite stores live in the `chart-sync` crate; [`store::memory`]
//! provides an in-memory store for tests.

pub mod batch;
pub mod diff;
pub mod engine;
pub mod latest;
pub mod models;
pub mod source;
pub mod store;
pub mod version;
