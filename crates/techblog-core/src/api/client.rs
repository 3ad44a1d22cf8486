//! API client for communicating with the techblog REST backend.
//!
//! Every request goes through the `AuthInterceptor` pair. Reads of posts and
//! comments are served from the `QueryCache` when fresh; writes invalidate the
//! keys they affect.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{multipart, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::interceptor::{AuthInterceptor, RequestKind};
use super::ApiError;
use crate::auth::{Role, SessionEvent, SessionManager, UserIdentity};
use crate::cache::{QueryCache, QueryKey};
use crate::config::Config;
use crate::models::{
    Comment, CommentRequest, FieldErrors, Page, Post, PostRequest, UploadResponse,
};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Registration constraints enforced by the backend
const MIN_PASSWORD_CHARS: usize = 8;
const MIN_USERNAME_CHARS: usize = 3;
const MAX_USERNAME_CHARS: usize = 50;

/// Maximum comment length accepted by the backend
const MAX_COMMENT_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    username: String,
    email: String,
    role: Role,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

/// API client for the techblog backend.
/// Clone is cheap - reqwest::Client and the shared state are reference counted.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    interceptor: AuthInterceptor,
    session: Arc<SessionManager>,
    cache: Arc<QueryCache>,
    /// First rate-limit backoff; doubles on each retry
    retry_backoff: Duration,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        session: Arc<SessionManager>,
        cache: Arc<QueryCache>,
    ) -> Result<Self> {
        Self::with_timeout(base_url, session, cache, REQUEST_TIMEOUT_SECS)
    }

    pub fn from_config(
        config: &Config,
        session: Arc<SessionManager>,
        cache: Arc<QueryCache>,
    ) -> Result<Self> {
        Self::with_timeout(&config.api_base_url, session, cache, config.request_timeout_secs)
    }

    fn with_timeout(
        base_url: &str,
        session: Arc<SessionManager>,
        cache: Arc<QueryCache>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            interceptor: AuthInterceptor::new(Arc::clone(&session), Arc::clone(&cache)),
            session,
            cache,
            retry_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ===== Request plumbing =====

    /// Send one logical request, re-running the request interceptor on every
    /// attempt. Only 429 is retried.
    async fn execute<F>(&self, kind: RequestKind, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff = self.retry_backoff;

        loop {
            let mut request = build(&self.client).build()?;
            let ticket = self.interceptor.on_request(&mut request, kind);
            let url = request.url().to_string();
            debug!(method = %request.method(), url = %url, authorized = ticket.is_authorized(), "Sending request");

            let response = self.client.execute(request).await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RATE_LIMIT_RETRIES {
                retries += 1;
                warn!(url = %url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2; // Exponential backoff
                continue;
            }

            return self.interceptor.on_response(ticket, response).await;
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().to_string();
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self
            .execute(RequestKind::Standard, |client| client.get(&url))
            .await?;
        Self::parse_json(response).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        kind: RequestKind,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self
            .execute(kind, |client| client.request(method.clone(), &url).json(body))
            .await?;
        Self::parse_json(response).await
    }

    async fn send_without_body(&self, method: Method, path: &str) -> Result<(), ApiError> {
        let url = self.url(path);
        self.execute(RequestKind::Standard, |client| client.request(method.clone(), &url))
            .await?;
        Ok(())
    }

    /// Serve `key` from the cache, or fetch and cache it.
    async fn cached<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if let Some(hit) = self.cache.get(&key) {
            debug!(%key, "Cache hit");
            return Ok(hit);
        }
        let ticket = self.cache.begin(key);
        let value = fetch().await?;
        self.cache.complete(ticket, &value);
        Ok(value)
    }

    fn invalidate(&self, parts: &[&str]) {
        self.cache.invalidate(&QueryKey::new(parts.iter().copied()));
    }

    // ===== Session =====

    /// Log in; on success the session is persisted and the identity returned.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, ApiError> {
        let auth: AuthResponse = self
            .send_json(
                Method::POST,
                "/api/auth/login",
                &LoginRequest { email, password },
                RequestKind::CredentialExchange,
            )
            .await?;
        self.start_session(auth)
    }

    /// Create an account, which also logs it in.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserIdentity, ApiError> {
        validate_registration(username, password)?;

        let auth: AuthResponse = self
            .send_json(
                Method::POST,
                "/api/auth/register",
                &RegisterRequest {
                    username,
                    email,
                    password,
                },
                RequestKind::CredentialExchange,
            )
            .await?;
        self.start_session(auth)
    }

    fn start_session(&self, auth: AuthResponse) -> Result<UserIdentity, ApiError> {
        let user = UserIdentity {
            username: auth.username,
            email: auth.email,
            role: auth.role,
        };
        let user = self
            .session
            .begin(auth.token, user)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;
        self.cache.purge();
        Ok(user)
    }

    /// Local logout; never touches the network. Returns false if nobody was logged in.
    pub fn logout(&self) -> bool {
        let ended = self.session.logout();
        self.cache.purge();
        if ended {
            info!("Logged out");
        }
        ended
    }

    // ===== Posts =====

    pub async fn list_posts(&self, page: u32, size: u32) -> Result<Page<Post>, ApiError> {
        let key = QueryKey::new(["posts".to_string(), page.to_string(), size.to_string()]);
        let path = format!("/api/posts?page={}&size={}", page, size);
        self.cached(key, || async move { self.get(&path).await }).await
    }

    pub async fn get_post(&self, slug: &str) -> Result<Post, ApiError> {
        let key = QueryKey::new(["post", slug]);
        let path = format!("/api/posts/{}", slug);
        self.cached(key, || async move { self.get(&path).await }).await
    }

    /// Fetch a post by id, including drafts the caller may edit.
    ///
    /// Requires the backend to expose `GET /api/posts/id/{id}`; the published
    /// listing cannot be used to find drafts.
    pub async fn get_post_by_id(&self, post_id: i64) -> Result<Post, ApiError> {
        self.get(&format!("/api/posts/id/{}", post_id)).await
    }

    pub async fn create_post(&self, request: &PostRequest) -> Result<Post, ApiError> {
        request.validate().map_err(validation_error)?;
        let post: Post = self
            .send_json(Method::POST, "/api/posts", request, RequestKind::Standard)
            .await?;
        self.invalidate(&["posts"]);
        info!(slug = %post.slug, "Post created");
        Ok(post)
    }

    pub async fn update_post(&self, post_id: i64, request: &PostRequest) -> Result<Post, ApiError> {
        request.validate().map_err(validation_error)?;
        let post: Post = self
            .send_json(
                Method::PUT,
                &format!("/api/posts/{}", post_id),
                request,
                RequestKind::Standard,
            )
            .await?;
        self.invalidate(&["posts"]);
        self.invalidate(&["post", post.slug.as_str()]);
        info!(slug = %post.slug, "Post updated");
        Ok(post)
    }

    pub async fn delete_post(&self, post_id: i64) -> Result<(), ApiError> {
        self.send_without_body(Method::DELETE, &format!("/api/posts/{}", post_id))
            .await?;
        self.invalidate(&["posts"]);
        self.invalidate(&["post"]);
        Ok(())
    }

    /// Like or unlike; returns whether the post is now liked.
    pub async fn toggle_like(&self, post_id: i64) -> Result<bool, ApiError> {
        let liked: bool = self
            .send_json(
                Method::POST,
                &format!("/api/posts/{}/like", post_id),
                &serde_json::Value::Null,
                RequestKind::Standard,
            )
            .await?;
        self.invalidate(&["post"]);
        self.invalidate(&["posts"]);
        Ok(liked)
    }

    // ===== Comments =====

    pub async fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>, ApiError> {
        let key = QueryKey::new(["comments".to_string(), post_id.to_string()]);
        let path = format!("/api/posts/{}/comments", post_id);
        self.cached(key, || async move { self.get(&path).await }).await
    }

    pub async fn add_comment(&self, post_id: i64, content: &str) -> Result<Comment, ApiError> {
        let content = content.trim();
        if content.is_empty() || content.chars().count() > MAX_COMMENT_CHARS {
            let mut errors = FieldErrors::new();
            errors.insert(
                "content".into(),
                format!("must be between 1 and {} characters", MAX_COMMENT_CHARS),
            );
            return Err(validation_error(errors));
        }

        let comment: Comment = self
            .send_json(
                Method::POST,
                &format!("/api/posts/{}/comments", post_id),
                &CommentRequest {
                    content: content.to_string(),
                },
                RequestKind::Standard,
            )
            .await?;
        self.invalidate(&["comments", post_id.to_string().as_str()]);
        Ok(comment)
    }

    pub async fn delete_comment(&self, post_id: i64, comment_id: &str) -> Result<(), ApiError> {
        self.send_without_body(Method::DELETE, &format!("/api/comments/{}", comment_id))
            .await?;
        self.invalidate(&["comments", post_id.to_string().as_str()]);
        Ok(())
    }

    // ===== Moderation =====

    pub async fn admin_delete_post(&self, post_id: i64) -> Result<(), ApiError> {
        self.send_without_body(Method::DELETE, &format!("/api/admin/posts/{}", post_id))
            .await?;
        self.invalidate(&["posts"]);
        self.invalidate(&["post"]);
        Ok(())
    }

    pub async fn admin_delete_comment(&self, post_id: i64, comment_id: &str) -> Result<(), ApiError> {
        self.send_without_body(Method::DELETE, &format!("/api/admin/comments/{}", comment_id))
            .await?;
        self.invalidate(&["comments", post_id.to_string().as_str()]);
        Ok(())
    }

    // ===== Uploads =====

    /// Upload a cover image; returns its public URL.
    pub async fn upload_image(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ApiError> {
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("File is empty".to_string()));
        }
        if !content_type.starts_with("image/") {
            return Err(ApiError::BadRequest(format!(
                "Only images can be uploaded, got {}",
                content_type
            )));
        }

        let url = self.url("/api/upload/image");
        let response = self
            .execute(RequestKind::Standard, |client| {
                let part = multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.to_string())
                    .mime_str(content_type)
                    .unwrap_or_else(|_| multipart::Part::bytes(bytes.clone()).file_name(file_name.to_string()));
                client
                    .post(&url)
                    .multipart(multipart::Form::new().part("file", part))
            })
            .await?;
        let uploaded: UploadResponse = Self::parse_json(response).await?;
        Ok(uploaded.url)
    }
}

fn validation_error(errors: FieldErrors) -> ApiError {
    ApiError::Validation {
        detail: "Validation failed".to_string(),
        errors,
    }
}

fn validate_registration(username: &str, password: &str) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();
    let username_len = username.trim().chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&username_len) {
        errors.insert(
            "username".into(),
            format!(
                "Username must be between {} and {} characters",
                MIN_USERNAME_CHARS, MAX_USERNAME_CHARS
            ),
        );
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        errors.insert(
            "password".into(),
            format!("Password must be at least {} characters", MIN_PASSWORD_CHARS),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(validation_error(errors))
    }
}
