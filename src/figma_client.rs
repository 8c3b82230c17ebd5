//! Figma REST API client.
//!
//! [`FigmaApi`] is the seam the rest of the crate talks to; [`FigmaApiClient`]
//! is the reqwest-backed implementation. `memory::InMemoryFigmaApi` serves a
//! fixed tree for tests and is not part of the supported API.

#[doc(hidden)]
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiSettings;
use crate::error::{Result, SyncError};
use crate::types::FigmaDocumentNode;

pub const FIGMA_TOKEN_ENV: &str = "FIGMA_API_TOKEN";
pub const FIGMA_FILE_KEY_ENV: &str = "FIGMA_FILE_KEY";

#[derive(Debug, Clone)]
pub struct FigmaAuth {
    token: String,
}

impl FigmaAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var(FIGMA_TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(Self::new)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigmaImageFormat {
    #[default]
    Svg,
    Png,
}

impl FigmaImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FigmaImageFormat::Svg => "svg",
            FigmaImageFormat::Png => "png",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageExportOptions {
    pub format: FigmaImageFormat,
    pub scale: f32,
    pub svg_include_id: bool,
    pub svg_simplify_stroke: bool,
    pub svg_outline_text: bool,
}

impl Default for ImageExportOptions {
    fn default() -> Self {
        Self {
            format: FigmaImageFormat::Svg,
            scale: 1.0,
            svg_include_id: true,
            svg_simplify_stroke: true,
            svg_outline_text: false,
        }
    }
}

impl ImageExportOptions {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("format", self.format.as_str().to_string()),
            ("scale", self.scale.to_string()),
        ];
        if self.format == FigmaImageFormat::Svg {
            pairs.push(("svg_include_id", self.svg_include_id.to_string()));
            pairs.push(("svg_simplify_stroke", self.svg_simplify_stroke.to_string()));
            pairs.push(("svg_outline_text", self.svg_outline_text.to_string()));
        }
        pairs
    }
}

/// `GET /v1/files/{key}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FigmaFileResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    pub document: FigmaDocumentNode,
}

/// `GET /v1/files/{key}/nodes`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FigmaNodesResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: HashMap<String, Option<FigmaNodeEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigmaNodeEntry {
    pub document: FigmaDocumentNode,
}

/// `GET /v1/images/{key}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FigmaImageResponse {
    #[serde(default)]
    pub err: Option<String>,
    #[serde(default)]
    pub images: HashMap<String, Option<String>>,
}

#[async_trait]
pub trait FigmaApi: Send + Sync {
    /// File metadata plus the document tree down to `depth`.
    async fn file(&self, file_key: &str, depth: Option<u32>) -> Result<FigmaFileResponse>;

    /// A single node subtree; `Ok(None)` when the file has no such node.
    async fn node(
        &self,
        file_key: &str,
        node_id: &str,
        depth: Option<u32>,
    ) -> Result<Option<FigmaDocumentNode>>;

    /// Render URLs for `node_ids`; a `None` value means Figma could not render that node.
    async fn export_images(
        &self,
        file_key: &str,
        node_ids: &[String],
        options: &ImageExportOptions,
    ) -> Result<FigmaImageResponse>;

    /// Fetch a rendered asset body.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct FigmaApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    retry_delay: Duration,
    max_retries: u32,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl FigmaApiClient {
    pub fn new(auth: FigmaAuth, settings: &ApiSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout.max(1)))
            .user_agent(concat!("figsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(&settings.base_url)?,
            token: auth.token,
            retry_delay: settings.retry_delay,
            max_retries: settings.max_retries,
            min_interval: request_interval(settings.requests_per_minute),
            last_request: Mutex::new(None),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::config("api_settings.base_url cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Send a request, sleeping `retry_delay` on every 429 until `max_retries`
    /// retries are used up.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.throttle().await;
            let response = build().send().await?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.max_retries {
                    return Err(SyncError::RateLimited { attempts: attempt });
                }
                warn!(
                    attempt,
                    delay_secs = self.retry_delay.as_secs_f64(),
                    "Figma rate limit hit, backing off"
                );
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::figma_api(Some(status), body));
            }
            return Ok(response);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "GET");
        let response = self
            .send(|| {
                self.http
                    .get(url.clone())
                    .header("X-Figma-Token", &self.token)
            })
            .await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl FigmaApi for FigmaApiClient {
    async fn file(&self, file_key: &str, depth: Option<u32>) -> Result<FigmaFileResponse> {
        let mut url = self.endpoint(&["files", file_key])?;
        if let Some(depth) = depth {
            url.query_pairs_mut()
                .append_pair("depth", &depth.to_string());
        }
        self.get_json(url).await
    }

    async fn node(
        &self,
        file_key: &str,
        node_id: &str,
        depth: Option<u32>,
    ) -> Result<Option<FigmaDocumentNode>> {
        let mut url = self.endpoint(&["files", file_key, "nodes"])?;
        url.query_pairs_mut().append_pair("ids", node_id);
        if let Some(depth) = depth {
            url.query_pairs_mut()
                .append_pair("depth", &depth.to_string());
        }
        let mut response: FigmaNodesResponse = self.get_json(url).await?;
        Ok(response
            .nodes
            .remove(node_id)
            .flatten()
            .map(|entry| entry.document))
    }

    async fn export_images(
        &self,
        file_key: &str,
        node_ids: &[String],
        options: &ImageExportOptions,
    ) -> Result<FigmaImageResponse> {
        let mut url = self.endpoint(&["images", file_key])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("ids", &node_ids.join(","));
            for (key, value) in options.query_pairs() {
                query.append_pair(key, &value);
            }
        }
        let response: FigmaImageResponse = self.get_json(url).await?;
        if let Some(err) = response.err.as_deref().filter(|e| !e.is_empty()) {
            return Err(SyncError::figma_api(None, err.to_string()));
        }
        Ok(response)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let url = Url::parse(url)?;
        // Render URLs are pre-signed; the Figma token is not sent along.
        let response = self.send(|| self.http.get(url.clone())).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn request_interval(requests_per_minute: u32) -> Duration {
    if requests_per_minute == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(60) / requests_per_minute
}

/// Fetch several node subtrees with at most `limit` requests in flight.
///
/// Results come back in the order of `node_ids`.
pub async fn fetch_nodes_concurrently<A>(
    api: &A,
    file_key: &str,
    node_ids: &[String],
    depth: Option<u32>,
    limit: usize,
) -> Vec<(String, Result<Option<FigmaDocumentNode>>)>
where
    A: FigmaApi + ?Sized,
{
    let mut results: Vec<(usize, String, Result<Option<FigmaDocumentNode>>)> =
        stream::iter(node_ids.iter().enumerate())
            .map(|(idx, id)| async move { (idx, id.clone(), api.node(file_key, id, depth).await) })
            .buffer_unordered(limit.max(1))
            .collect()
            .await;
    results.sort_by_key(|(idx, _, _)| *idx);
    results
        .into_iter()
        .map(|(_, id, result)| (id, result))
        .collect()
}
