//! Typed HTTP client for the Ben OS API.
//!
//! - `BenClient`: reqwest transport with read/write retry budgets
//! - `cache`: query cache with optimistic mutations and rollback
//! - `board`: optimistic card moves on top of `BoardStore`
//! - `autosave`: debounced PRD saving
//! - `prefs`: local UI preferences

pub mod autosave;
pub mod board;
pub mod cache;
pub mod prefs;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::api::ACTOR_HEADER;
use crate::config::ClientSection;
use crate::errors::BoardError;
use crate::store::models::Actor;

pub use autosave::PrdAutosave;
pub use board::BoardSession;
pub use cache::{DataClient, QueryCache, QueryKey, Resource};

/// Failures seen by client code.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Board(#[from] BoardError),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    retry_after
        .map(|secs| format!(", retry after {}s", secs))
        .unwrap_or_default()
}

impl ClientError {
    /// Transport failures and server errors may succeed on a second try.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Decode a JSON value returned by a [`Remote`].
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}

/// The seam between client-side state and the server. `BenClient` talks
/// HTTP; tests substitute in-memory fakes.
#[async_trait]
pub trait Remote: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Value, ClientError>;
}

/// How many extra attempts each kind of request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub read_retries: u32,
    pub write_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            read_retries: 2,
            write_retries: 1,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn retries_for(&self, method: &Method) -> u32 {
        if *method == Method::GET || *method == Method::HEAD {
            self.read_retries
        } else {
            self.write_retries
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// reqwest-backed [`Remote`].
#[derive(Clone)]
pub struct BenClient {
    http: reqwest::Client,
    base_url: String,
    actor: Option<Actor>,
    policy: RetryPolicy,
}

impl BenClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("benos/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            actor: None,
            policy: RetryPolicy::default(),
        })
    }

    pub fn from_config(config: &ClientSection) -> Result<Self> {
        let client = Self::with_timeout(&config.base_url, Duration::from_secs(config.timeout_secs))?;
        Ok(client.with_retry_policy(RetryPolicy {
            read_retries: config.read_retries,
            write_retries: config.write_retries,
            ..RetryPolicy::default()
        }))
    }

    /// Attribute every request to `actor` via `X-Benos-Actor`.
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let mut req = self.http.request(method.clone(), url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(actor) = &self.actor {
            req = req.header(ACTOR_HEADER, actor.to_string());
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(ClientError::RateLimited { retry_after });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
                .unwrap_or(text);
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
    }

    // Typed conveniences over `request`.

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        decode(self.request(Method::GET, path, &[], None).await?)
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ClientError> {
        decode(self.request(Method::POST, path, &[], Some(body)).await?)
    }

    pub async fn patch<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ClientError> {
        decode(self.request(Method::PATCH, path, &[], Some(body)).await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.request(Method::DELETE, path, &[], None).await.map(|_| ())
    }
}

#[async_trait]
impl Remote for BenClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let retries = self.policy.retries_for(&method);
        let mut attempt = 0;
        loop {
            match self.attempt(&method, &url, query, body.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < retries => {
                    let delay = self.policy.delay(attempt);
                    tracing::debug!(%method, path, attempt, error = %e, ?delay, "Retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
