//! In-memory query cache for data fetched from the backend.
//!
//! Entries are keyed by a `QueryKey` and invalidated by key prefix. A purge
//! (on any session transition) also discards results of fetches that were
//! still in flight when it happened.

pub mod manager;

pub use manager::{CachedData, FetchTicket, QueryCache, QueryKey};
