//! tl-db: durable job queue and segment bookkeeping.
//!
//! This crate provides SQLite-backed storage with connection pooling,
//! embedded migrations, typed models, and query modules for queue jobs,
//! per-session segment records and session lifecycle state.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
