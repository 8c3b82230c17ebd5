use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] ParseError),

    #[error("Figma API error (status: {status:?}): {message}")]
    FigmaApi {
        status: Option<StatusCode>,
        message: String,
    },

    #[error("Figma API rate limit still exceeded after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    #[error("Could not resolve node '{node_id}' after trying {attempts:?}")]
    NodeNotResolved {
        node_id: String,
        attempts: Vec<String>,
    },

    #[error("GitHub API error (status: {status:?}): {message}")]
    Github {
        status: Option<StatusCode>,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid name pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn figma_api(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        SyncError::FigmaApi {
            status,
            message: message.into(),
        }
    }

    pub fn github(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        SyncError::Github {
            status,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config(message.into())
    }

    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            SyncError::Io(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Check output/cache paths and permissions.",
            ),
            SyncError::Network(e) => ErrorPayload::new(
                ErrorCategory::Network,
                e.to_string(),
                "Check connectivity/proxy/VPN and retry.",
            ),
            SyncError::InvalidUrl(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Verify api_settings.base_url (e.g., https://api.figma.com/v1).",
            ),
            SyncError::FigmaApi { status, message } => ErrorPayload::new(
                ErrorCategory::Figma,
                format!("Figma API error (status {:?}): {}", status, message),
                "Check FIGMA_API_TOKEN, the file key and node ids.",
            ),
            SyncError::RateLimited { attempts } => ErrorPayload::new(
                ErrorCategory::Figma,
                format!("Rate limited by Figma after {attempts} attempt(s)"),
                "Lower api_settings.requests_per_minute or raise retry_delay; retry later.",
            ),
            SyncError::NodeNotResolved { node_id, attempts } => ErrorPayload::new(
                ErrorCategory::Figma,
                format!(
                    "Node '{}' not found (tried: {})",
                    node_id,
                    attempts.join(", ")
                ),
                "Copy the node id from the Figma URL (node-id=123-456) and check file access.",
            ),
            SyncError::Github { status, message } => ErrorPayload::new(
                ErrorCategory::Github,
                format!("GitHub API error (status {:?}): {}", status, message),
                "Check GITHUB_PAT scopes and GITHUB_REPO_OWNER/GITHUB_REPO_NAME.",
            ),
            SyncError::Serialization(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Check JSON inputs (config/cache); run with --verbose for details.",
            ),
            SyncError::Pattern(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Fix filter_patterns; only *, ? and [...] wildcards are supported.",
            ),
            SyncError::Export(msg) => ErrorPayload::new(
                ErrorCategory::Export,
                msg.to_string(),
                "Inspect the export report for per-node errors.",
            ),
            SyncError::Config(msg) => ErrorPayload::new(
                ErrorCategory::Config,
                msg.to_string(),
                "Check flags, config file and required environment variables.",
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Config,
    Network,
    Figma,
    Github,
    Export,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorPayload {
    pub fn new(category: ErrorCategory, message: String, remediation: impl Into<String>) -> Self {
        Self {
            category,
            message,
            remediation: Some(remediation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_config_category() {
        let payload = SyncError::config("missing FIGMA_API_TOKEN").to_payload();
        assert_eq!(payload.category, ErrorCategory::Config);
        assert!(payload.message.contains("FIGMA_API_TOKEN"));
        assert!(payload.remediation.is_some());
    }

    #[test]
    fn unresolved_node_lists_attempts() {
        let err = SyncError::NodeNotResolved {
            node_id: "431-22256".into(),
            attempts: vec!["431-22256".into(), "431:22256".into(), "0:1".into()],
        };
        let payload = err.to_payload();
        assert_eq!(payload.category, ErrorCategory::Figma);
        assert!(payload.message.contains("431:22256, 0:1"));
    }

    #[test]
    fn payload_serializes_lowercase_category() {
        let payload = SyncError::github(Some(StatusCode::FORBIDDEN), "bad token").to_payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["category"], "github");
    }

    #[test]
    fn variants_map_to_expected_categories() {
        let categories: Vec<ErrorCategory> = [
            SyncError::config("x"),
            SyncError::InvalidUrl(ParseError::EmptyHost),
            SyncError::figma_api(None, "x"),
            SyncError::RateLimited { attempts: 4 },
            SyncError::github(None, "x"),
            SyncError::Export("x".into()),
        ]
        .iter()
        .map(|e| e.to_payload().category)
        .collect();
        assert_eq!(
            categories,
            vec![
                ErrorCategory::Config,
                ErrorCategory::Config,
                ErrorCategory::Figma,
                ErrorCategory::Figma,
                ErrorCategory::Github,
                ErrorCategory::Export,
            ]
        );
    }
}
