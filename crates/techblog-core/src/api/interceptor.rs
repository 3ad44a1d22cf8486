//! Request/response interceptor pair.
//!
//! Every request passes through `on_request` right before dispatch and every
//! response through `on_response`. A 401 on a request made under the current
//! session ends that session exactly once, however many requests fail with it.

use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::SessionManager;
use crate::cache::QueryCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Ordinary API call; a 401 means the session is no longer valid
    Standard,
    /// Login or registration; a 401 means the credentials were rejected
    CredentialExchange,
}

/// What the response side needs to know about how a request was sent.
#[derive(Debug, Clone, Copy)]
pub struct RequestTicket {
    kind: RequestKind,
    /// Session generation the bearer token came from, if one was attached
    generation: Option<u64>,
}

impl RequestTicket {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn is_authorized(&self) -> bool {
        self.generation.is_some()
    }
}

#[derive(Clone)]
pub struct AuthInterceptor {
    session: Arc<SessionManager>,
    cache: Arc<QueryCache>,
}

impl AuthInterceptor {
    pub fn new(session: Arc<SessionManager>, cache: Arc<QueryCache>) -> Self {
        Self { session, cache }
    }

    /// Attach the current bearer token, if any.
    pub fn on_request(&self, request: &mut Request, kind: RequestKind) -> RequestTicket {
        let Some((token, generation)) = self.session.authorization() else {
            return RequestTicket {
                kind,
                generation: None,
            };
        };

        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => {
                // Still tagged with the generation so the server's 401 clears the bad token
                warn!("Stored token is not a valid header value, sending without it");
            }
        }

        RequestTicket {
            kind,
            generation: Some(generation),
        }
    }

    /// Pass successful responses through; turn failures into `ApiError`,
    /// ending the session first if the server rejected its credentials.
    pub async fn on_response(
        &self,
        ticket: RequestTicket,
        response: Response,
    ) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = ApiError::from_status(
            status,
            &body,
            ticket.kind == RequestKind::CredentialExchange,
        );

        if error.is_unauthorized() {
            self.handle_unauthorized(ticket);
        }
        Err(error)
    }

    fn handle_unauthorized(&self, ticket: RequestTicket) {
        match ticket.generation {
            Some(generation) => {
                if self.session.invalidate(generation) {
                    // Also advances the epoch, dropping fetches that began under the old token
                    self.cache.purge();
                    warn!(generation, "Server rejected session, signed out");
                } else {
                    debug!(generation, "Session already ended");
                }
            }
            None => debug!("Unauthenticated request was rejected"),
        }
    }
}
