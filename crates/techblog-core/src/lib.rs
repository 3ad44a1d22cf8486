//! Core library for the techblog client.
//!
//! - `auth`: credential store, session authority, broadcast channel, redirect coordination
//! - `api`: REST client with the request/response interceptor pair
//! - `cache`: in-memory query cache with invalidation by key prefix
//! - `models`: posts, comments and page types returned by the backend
//! - `config`: persisted client configuration

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{
    CredentialStore, LogoutRedirect, Navigator, Role, Session, SessionEvent, SessionManager,
    SessionStatus, SignOutReason, UserIdentity,
};
pub use cache::QueryCache;
pub use config::Config;
