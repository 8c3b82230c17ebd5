//! Node-ID normalisation and fallback resolution.
//!
//! Figma shows node ids as `431:22256` in the API but `431-22256` in share
//! URLs. [`candidates`] lists every spelling worth trying and
//! [`NodeResolver`] walks that list against the API until one answers,
//! searching node names when no spelling does.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::figma_client::FigmaApi;
use crate::types::FigmaDocumentNode;

pub const ROOT_NODE_ID: &str = "0:1";
pub const MAX_ATTEMPTS: usize = 5;
/// Prefix of the attempt entry recorded for a name search.
pub const NAME_ATTEMPT_PREFIX: &str = "name:";

static DASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+-\d+$").expect("static regex"));
static COLON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+:\d+$").expect("static regex"));
static PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(:\d+)+$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeIdFormat {
    /// `431-22256`
    Dash,
    /// `431:22256`
    Colon,
    /// `0:1:2:3`
    FullPath,
}

impl NodeIdFormat {
    pub fn detect(node_id: &str) -> Option<Self> {
        if DASH_RE.is_match(node_id) {
            Some(Self::Dash)
        } else if COLON_RE.is_match(node_id) {
            Some(Self::Colon)
        } else if PATH_RE.is_match(node_id) {
            Some(Self::FullPath)
        } else {
            None
        }
    }
}

/// Ordered, de-duplicated lookup candidates for `node_id`, capped at
/// [`MAX_ATTEMPTS`].
///
/// Order: the id as given, its opposite-punctuation spelling, the parent id
/// (last colon segment dropped), then the root page `0:1`.
pub fn candidates(node_id: &str) -> Vec<String> {
    let node_id = node_id.trim();
    let format = NodeIdFormat::detect(node_id);

    let colon_form = match format {
        Some(NodeIdFormat::Dash) => node_id.replace('-', ":"),
        _ => node_id.to_string(),
    };

    let mut list = vec![node_id.to_string()];
    match format {
        Some(NodeIdFormat::Dash) => list.push(colon_form.clone()),
        Some(NodeIdFormat::Colon) => list.push(node_id.replace(':', "-")),
        _ => {}
    }
    if let Some((parent, _)) = colon_form.rsplit_once(':') {
        if !parent.is_empty() {
            list.push(parent.to_string());
        }
    }
    list.push(ROOT_NODE_ID.to_string());

    let mut seen = std::collections::HashSet::new();
    list.retain(|id| !id.is_empty() && seen.insert(id.clone()));
    list.truncate(MAX_ATTEMPTS);
    list
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNode {
    pub original_id: String,
    pub resolved_id: String,
    pub format_used: Option<NodeIdFormat>,
    /// Every candidate tried, in order, including the one that worked
    pub attempts: Vec<String>,
    /// Set when the node was found by name rather than by id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_name: Option<String>,
    #[serde(skip)]
    pub document: FigmaDocumentNode,
}

/// A node whose name contains a search term.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMatch {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Slash-joined names from the page down to the node
    pub path: String,
}

impl ResolvedNode {
    /// The node came from a fallback candidate rather than the id as given.
    pub fn is_fallback(&self) -> bool {
        self.resolved_id != self.original_id
    }
}

pub struct NodeResolver<'a, A: FigmaApi + ?Sized> {
    api: &'a A,
    depth: Option<u32>,
}

impl<'a, A: FigmaApi + ?Sized> NodeResolver<'a, A> {
    pub fn new(api: &'a A, depth: Option<u32>) -> Self {
        Self { api, depth }
    }

    /// Try each candidate in turn; the first one the API returns wins.
    ///
    /// API errors on one candidate do not stop the walk. When no id answers,
    /// the document is searched for a node named like `node_id`; input that
    /// is not id-shaped is searched for before falling back to the root page.
    pub async fn resolve(&self, file_key: &str, node_id: &str) -> Result<ResolvedNode> {
        let id_shaped = NodeIdFormat::detect(node_id.trim()).is_some();
        let list = candidates(node_id);
        let mut attempts = Vec::with_capacity(list.len() + 1);
        for candidate in list {
            if candidate == ROOT_NODE_ID && !id_shaped {
                if let Some(found) = self.resolve_by_name(file_key, node_id, &mut attempts).await {
                    return Ok(found);
                }
            }
            attempts.push(candidate.clone());
            match self.api.node(file_key, &candidate, self.depth).await {
                Ok(Some(document)) => {
                    if candidate != node_id {
                        info!(
                            requested = node_id,
                            resolved = %candidate,
                            "node resolved through fallback id"
                        );
                    }
                    return Ok(ResolvedNode {
                        original_id: node_id.to_string(),
                        format_used: NodeIdFormat::detect(&candidate),
                        resolved_id: candidate,
                        attempts,
                        matched_name: None,
                        document,
                    });
                }
                Ok(None) => debug!(candidate = %candidate, "node not found"),
                Err(err) => warn!(candidate = %candidate, error = %err, "node lookup failed"),
            }
        }
        if id_shaped {
            if let Some(found) = self.resolve_by_name(file_key, node_id, &mut attempts).await {
                return Ok(found);
            }
        }
        Err(SyncError::NodeNotResolved {
            node_id: node_id.to_string(),
            attempts,
        })
    }

    /// Every node in the file whose name contains `term`, ignoring case, in
    /// document order. `node_type` narrows the result to one Figma type.
    pub async fn search_by_name(
        &self,
        file_key: &str,
        term: &str,
        node_type: Option<&str>,
    ) -> Result<Vec<NodeMatch>> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let file = self.api.file(file_key, self.depth).await?;
        let mut found = Vec::new();
        for page in &file.document.children {
            collect_matches(page, "", &needle, node_type, &mut found);
        }
        debug!(term, matches = found.len(), "name search finished");
        Ok(found)
    }

    async fn resolve_by_name(
        &self,
        file_key: &str,
        node_id: &str,
        attempts: &mut Vec<String>,
    ) -> Option<ResolvedNode> {
        let term = node_id.trim();
        if term.is_empty() {
            return None;
        }
        attempts.push(format!("{NAME_ATTEMPT_PREFIX}{term}"));
        let matches = match self.search_by_name(file_key, term, None).await {
            Ok(matches) => matches,
            Err(err) => {
                warn!(term, error = %err, "name search failed");
                return None;
            }
        };
        // An exact name beats a substring hit.
        let best = matches
            .iter()
            .position(|m| m.name.eq_ignore_ascii_case(term))
            .unwrap_or(0);
        let found = matches.into_iter().nth(best)?;
        match self.api.node(file_key, &found.id, self.depth).await {
            Ok(Some(document)) => {
                info!(
                    requested = node_id,
                    resolved = %found.id,
                    path = %found.path,
                    "node resolved by name"
                );
                Some(ResolvedNode {
                    original_id: node_id.to_string(),
                    format_used: NodeIdFormat::detect(&found.id),
                    resolved_id: found.id,
                    attempts: attempts.clone(),
                    matched_name: Some(found.name),
                    document,
                })
            }
            Ok(None) => None,
            Err(err) => {
                warn!(node_id = %found.id, error = %err, "named node lookup failed");
                None
            }
        }
    }
}

fn collect_matches(
    node: &FigmaDocumentNode,
    parent_path: &str,
    needle: &str,
    node_type: Option<&str>,
    found: &mut Vec<NodeMatch>,
) {
    let path = if parent_path.is_empty() {
        node.name.clone()
    } else {
        format!("{parent_path}/{}", node.name)
    };
    if node.name.to_lowercase().contains(needle)
        && node_type.map_or(true, |t| node.node_type == t)
    {
        found.push(NodeMatch {
            id: node.id.clone(),
            name: node.name.clone(),
            node_type: node.node_type.clone(),
            path: path.clone(),
        });
    }
    for child in &node.children {
        collect_matches(child, &path, needle, node_type, found);
    }
}
