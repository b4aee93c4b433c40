//! NBA betting insights: odds-derived picks and props served over HTTP, and
//! a historical player game-log ingestion pipeline backed by PostgreSQL.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod mapper;
pub mod models;
pub mod odds;
pub mod retry;
pub mod retry_queue;
pub mod stats;
