//! Newsdeck - a feed aggregation service
//!
//! This crate polls a fixed set of syndication feeds, deduplicates entries
//! into a canonical article store, and serves a paginated, filterable,
//! searchable JSON API scoped to a bounded window of the most recent articles.

pub mod config;
pub mod db;
pub mod fetcher;
pub mod query;
pub mod routes;
