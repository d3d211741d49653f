//! HTTP implementation of [`RemoteSync`].
//!
//! Every request carries `Authorization: Bearer <token>`. `X-Lore-Client` is
//! attached only when a non-blank client name is configured. Non-success
//! statuses become [`Error::Remote`] with a short, token-free body excerpt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    cancellable, ChangeBatch, Cursor, DeltaPage, Health, PushResponse, RemoteSync, Snapshot,
    SnapshotBody, StoreDetails, StoreSummary,
};
use crate::error::{Error, Result};
use crate::store_id::StoreId;

pub const CLIENT_HEADER: &str = "X-Lore-Client";
pub const CURSOR_HEADER: &str = "X-Lore-Cursor";

/// Longest response-body excerpt carried in an error.
const MAX_ERROR_EXCERPT: usize = 200;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpRemote {
    base: Url,
    token: String,
    client_name: Option<String>,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct CreateStoreRequest<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Deserialize)]
struct StoreList {
    #[serde(default)]
    stores: Vec<StoreSummary>,
}

impl HttpRemote {
    /// Build a client for `base_url` (scheme optional, defaults to https).
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        client_name: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.trim();
        let normalized = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("https://{base_url}")
        };
        let base = Url::parse(&normalized)
            .map_err(|e| Error::Invalid(format!("remote url `{base_url}`: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::Invalid(format!("remote url `{base_url}` cannot be a base")));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base,
            token: token.into(),
            client_name: client_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `<base>/api/v1/<segments...>`, each segment percent-encoded, so a
    /// store id like `team/api` travels as `team%2Fapi`.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Invalid(format!("remote url `{}` cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url).bearer_auth(&self.token);
        match &self.client_name {
            Some(name) => builder.header(CLIENT_HEADER, name),
            None => builder,
        }
    }

    /// Send, racing `cancel`, and turn any non-success status into an error.
    async fn send(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let response = cancellable(operation, cancel, async {
            builder
                .send()
                .await
                .map_err(|e| self.transport_error(operation, e))
        })
        .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = cancellable(operation, cancel, async {
            Ok(response.text().await.unwrap_or_default())
        })
        .await?;
        Err(self.status_error(operation, status, &body))
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        response: Response,
        cancel: &CancellationToken,
    ) -> Result<T> {
        cancellable(operation, cancel, async {
            response
                .json::<T>()
                .await
                .map_err(|e| self.transport_error(operation, e))
        })
        .await
    }

    fn transport_error(&self, operation: &'static str, err: reqwest::Error) -> Error {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else {
            err.to_string()
        };
        Error::Remote {
            operation,
            status: err.status().map(|s| s.as_u16()),
            message: self.excerpt(&message),
        }
    }

    fn status_error(&self, operation: &'static str, status: StatusCode, body: &str) -> Error {
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            self.excerpt(body.trim())
        };
        tracing::debug!(operation, status = status.as_u16(), "remote returned error status");
        Error::Remote {
            operation,
            status: Some(status.as_u16()),
            message,
        }
    }

    /// Scrub the credential and cap the length.
    fn excerpt(&self, text: &str) -> String {
        let scrubbed = if self.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.token, "[redacted]")
        };
        truncate(&scrubbed, MAX_ERROR_EXCERPT)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

struct HttpSnapshotBody {
    response: Response,
}

#[async_trait]
impl SnapshotBody for HttpSnapshotBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        self.response
            .chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(|e| Error::Remote {
                operation: "snapshot",
                status: None,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl RemoteSync for HttpRemote {
    async fn health(&self, cancel: &CancellationToken) -> Result<Health> {
        let url = self.endpoint(&["health"])?;
        let response = self
            .send("health check", self.request(Method::GET, url), cancel)
            .await?;
        self.json("health check", response, cancel).await
    }

    async fn snapshot(&self, store: &StoreId, cancel: &CancellationToken) -> Result<Snapshot> {
        let url = self.endpoint(&["stores", store.as_str(), "snapshot"])?;
        let response = self
            .send("snapshot", self.request(Method::GET, url), cancel)
            .await?;

        let cursor = response
            .headers()
            .get(CURSOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Cursor::new);

        Ok(Snapshot {
            cursor,
            body: Box::new(HttpSnapshotBody { response }),
        })
    }

    async fn push(
        &self,
        store: &StoreId,
        batch: &ChangeBatch,
        cancel: &CancellationToken,
    ) -> Result<PushResponse> {
        let url = self.endpoint(&["stores", store.as_str(), "push"])?;
        let response = self
            .send("push", self.request(Method::POST, url).json(batch), cancel)
            .await?;
        self.json("push", response, cancel).await
    }

    async fn delta(
        &self,
        store: &StoreId,
        after: Option<&Cursor>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<DeltaPage> {
        let mut url = self.endpoint(&["stores", store.as_str(), "delta"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(after) = after {
                query.append_pair("after", after.as_str());
            }
            query.append_pair("limit", &limit.to_string());
        }
        let response = self
            .send("delta", self.request(Method::GET, url), cancel)
            .await?;
        self.json("delta", response, cancel).await
    }

    async fn list_stores(
        &self,
        prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoreSummary>> {
        let mut url = self.endpoint(&["stores"])?;
        if let Some(prefix) = prefix.map(str::trim).filter(|p| !p.is_empty()) {
            url.query_pairs_mut().append_pair("prefix", prefix);
        }
        let response = self
            .send("list stores", self.request(Method::GET, url), cancel)
            .await?;
        let list: StoreList = self.json("list stores", response, cancel).await?;
        Ok(list.stores)
    }

    async fn create_store(
        &self,
        store: &StoreId,
        description: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<StoreSummary> {
        let url = self.endpoint(&["stores"])?;
        let body = CreateStoreRequest {
            id: store.as_str(),
            description,
        };
        let response = self
            .send("create store", self.request(Method::POST, url).json(&body), cancel)
            .await?;
        self.json("create store", response, cancel).await
    }

    async fn delete_store(&self, store: &StoreId, cancel: &CancellationToken) -> Result<()> {
        let url = self.endpoint(&["stores", store.as_str()])?;
        self.send("delete store", self.request(Method::DELETE, url), cancel)
            .await?;
        Ok(())
    }

    async fn store_info(&self, store: &StoreId, cancel: &CancellationToken) -> Result<StoreDetails> {
        let url = self.endpoint(&["stores", store.as_str()])?;
        let response = match self
            .send("store info", self.request(Method::GET, url), cancel)
            .await
        {
            Err(Error::Remote {
                status: Some(404), ..
            }) => return Err(Error::NotFound(format!("remote store {store}"))),
            other => other?,
        };
        self.json("store info", response, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(url: &str) -> HttpRemote {
        HttpRemote::new(url, "secret-token", Some("  ".into()), DEFAULT_TIMEOUT).unwrap()
    }

    #[test]
    fn url_normalization() {
        assert_eq!(remote("lore.example.com").base_url().as_str(), "https://lore.example.com/");
        assert_eq!(
            remote("http://localhost:8080").base_url().as_str(),
            "http://localhost:8080/"
        );
    }

    #[test]
    fn endpoints_percent_encode_store_ids() {
        let remote = remote("http://localhost:8080/prefix/");
        let url = remote
            .endpoint(&["stores", "team/api", "push"])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/prefix/api/v1/stores/team%2Fapi/push");
    }

    #[test]
    fn blank_client_name_is_dropped() {
        assert!(remote("http://localhost").client_name.is_none());
    }

    #[test]
    fn error_excerpts_are_scrubbed_and_truncated() {
        let remote = remote("http://localhost");
        let body = format!("bad token secret-token {}", "x".repeat(500));
        let err = remote.status_error("push", StatusCode::UNPROCESSABLE_ENTITY, &body);
        match err {
            Error::Remote {
                operation,
                status,
                message,
            } => {
                assert_eq!(operation, "push");
                assert_eq!(status, Some(422));
                assert!(!message.contains("secret-token"));
                assert!(message.contains("[redacted]"));
                assert!(message.chars().count() <= MAX_ERROR_EXCERPT + 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_error_body_uses_reason() {
        let err = remote("http://localhost").status_error("delete store", StatusCode::FORBIDDEN, "");
        assert!(err.to_string().contains("Forbidden"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
