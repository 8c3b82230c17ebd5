//! Publish exported assets to a GitHub repository via the contents API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GithubSettings;
use crate::error::{Result, SyncError};

pub const GITHUB_PAT_ENV: &str = "GITHUB_PAT";
pub const GITHUB_OWNER_ENV: &str = "GITHUB_REPO_OWNER";
pub const GITHUB_REPO_ENV: &str = "GITHUB_REPO_NAME";
pub const GITHUB_DATA_PATH_ENV: &str = "GITHUB_DATA_PATH";
pub const DEFAULT_DATA_PATH: &str = "figma-exports";

#[derive(Debug, Clone)]
pub struct GithubAuth {
    pub token: String,
    pub owner: String,
    pub repo: String,
    /// Directory inside the repository that receives the assets
    pub data_path: String,
}

impl GithubAuth {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SyncError::config(format!("{key} is not set")))
        };
        Ok(Self {
            token: required(GITHUB_PAT_ENV)?,
            owner: required(GITHUB_OWNER_ENV)?,
            repo: required(GITHUB_REPO_ENV)?,
            data_path: lookup(GITHUB_DATA_PATH_ENV)
                .map(|p| p.trim().trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_DATA_PATH.to_string()),
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    private: bool,
    auto_init: bool,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishSummary {
    pub repository: String,
    pub uploaded: Vec<String>,
    pub failed: Vec<PublishFailure>,
}

pub struct GithubPublisher {
    http: reqwest::Client,
    api_url: Url,
    auth: GithubAuth,
    branch: Option<String>,
    commit_message: String,
    create_repo: bool,
}

impl GithubPublisher {
    pub fn new(auth: GithubAuth, settings: &GithubSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("figsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: Url::parse(&settings.api_url)?,
            auth,
            branch: settings.branch.clone(),
            commit_message: settings.commit_message.clone(),
            create_repo: settings.create_repo,
        })
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.auth.owner, self.auth.repo)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::config("github.api_url cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn contents_url(&self, repo_path: &str) -> Result<Url> {
        let mut segments = vec!["repos", self.auth.owner.as_str(), self.auth.repo.as_str(), "contents"];
        segments.extend(repo_path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.endpoint(&segments)?;
        if let Some(branch) = &self.branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        Ok(url)
    }

    /// Repository path for a local file name.
    pub fn remote_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.auth.data_path, file_name)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("token {}", self.auth.token))
            .header("Accept", "application/vnd.github.v3+json")
    }

    async fn error_from(response: reqwest::Response) -> SyncError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        SyncError::github(Some(status), body)
    }

    /// Make sure the repository exists, creating it under the token's user
    /// when allowed.
    pub async fn ensure_repo(&self) -> Result<()> {
        let url = self.endpoint(&["repos", &self.auth.owner, &self.auth.repo])?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        match response.status() {
            status if status.is_success() => {
                debug!(repo = %self.repository(), "repository exists");
                Ok(())
            }
            StatusCode::NOT_FOUND if self.create_repo => {
                info!(repo = %self.repository(), "creating repository");
                let url = self.endpoint(&["user", "repos"])?;
                let body = CreateRepoRequest {
                    name: &self.auth.repo,
                    private: false,
                    auto_init: true,
                    description: "Design assets exported from Figma",
                };
                let response = self
                    .request(reqwest::Method::POST, url)
                    .json(&body)
                    .send()
                    .await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(Self::error_from(response).await)
                }
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn existing_sha(&self, repo_path: &str) -> Result<Option<String>> {
        let url = self.contents_url(repo_path)?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<ContentEntry>().await?.sha)),
            _ => Err(Self::error_from(response).await),
        }
    }

    /// Create or update one file.
    pub async fn put_file(&self, repo_path: &str, content: &[u8]) -> Result<()> {
        let sha = self.existing_sha(repo_path).await?;
        let mut url = self.contents_url(repo_path)?;
        url.set_query(None);
        let body = PutContentRequest {
            message: &self.commit_message,
            content: base64::engine::general_purpose::STANDARD.encode(content),
            sha,
            branch: self.branch.as_deref(),
        };
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(&body)
            .send()
            .await?;
        if response.status().is_success() {
            debug!(path = repo_path, bytes = content.len(), "uploaded");
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    /// Upload every file; one failing upload does not stop the others.
    pub async fn publish(&self, files: &[PathBuf]) -> Result<PublishSummary> {
        self.ensure_repo().await?;
        let mut summary = PublishSummary {
            repository: self.repository(),
            ..Default::default()
        };
        for local in files {
            let remote = self.remote_path(&file_name(local));
            let result = match tokio::fs::read(local).await {
                Ok(bytes) => self.put_file(&remote, &bytes).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => summary.uploaded.push(remote),
                Err(e) => {
                    warn!(path = %remote, error = %e, "upload failed");
                    summary.failed.push(PublishFailure {
                        path: remote,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            repo = %summary.repository,
            uploaded = summary.uploaded.len(),
            failed = summary.failed.len(),
            "publish finished"
        );
        Ok(summary)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
