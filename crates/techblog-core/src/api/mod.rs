//! REST API client module for the techblog backend.
//!
//! This module provides the `ApiClient` for posts, comments, uploads and
//! authentication, and the `AuthInterceptor` pair every request goes through.
//!
//! The API uses bearer token authentication obtained from the login and
//! registration endpoints.

pub mod client;
pub mod error;
pub mod interceptor;

pub use client::ApiClient;
pub use error::ApiError;
pub use interceptor::{AuthInterceptor, RequestKind, RequestTicket};
