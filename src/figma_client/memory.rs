//! In-process [`FigmaApi`] implementation backed by a fixed document tree.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FigmaApi, FigmaFileResponse, FigmaImageResponse, ImageExportOptions};
use crate::error::{Result, SyncError};
use crate::types::FigmaDocumentNode;

const RENDER_SCHEME: &str = "memory://render/";

/// A request observed by [`InMemoryFigmaApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    File,
    Node(String),
    ExportImages(Vec<String>),
    Download(String),
}

/// Serves a single Figma file from memory.
///
/// Every node in the document renders to `<svg id="{id}"/>` unless a body was
/// registered with [`with_asset`](Self::with_asset).
pub struct InMemoryFigmaApi {
    file: FigmaFileResponse,
    extra_nodes: HashMap<String, FigmaDocumentNode>,
    assets: HashMap<String, Vec<u8>>,
    unrenderable: HashSet<String>,
    failing_downloads: HashSet<String>,
    calls: Mutex<Vec<ApiCall>>,
}

impl InMemoryFigmaApi {
    pub fn new(file: FigmaFileResponse) -> Self {
        Self {
            file,
            extra_nodes: HashMap::new(),
            assets: HashMap::new(),
            unrenderable: HashSet::new(),
            failing_downloads: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_document(version: &str, document: FigmaDocumentNode) -> Self {
        Self::new(FigmaFileResponse {
            name: "In-memory file".to_string(),
            version: version.to_string(),
            last_modified: None,
            document,
        })
    }

    /// Make `node` reachable through [`FigmaApi::node`] under `id`, even if it
    /// is not part of the document tree.
    pub fn with_node(mut self, id: impl Into<String>, node: FigmaDocumentNode) -> Self {
        self.extra_nodes.insert(id.into(), node);
        self
    }

    pub fn with_asset(mut self, id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.assets.insert(id.into(), body.into());
        self
    }

    /// Figma returns a null render URL for `id`.
    pub fn with_unrenderable(mut self, id: impl Into<String>) -> Self {
        self.unrenderable.insert(id.into());
        self
    }

    /// The render URL for `id` fails to download.
    pub fn with_failing_download(mut self, id: impl Into<String>) -> Self {
        self.failing_downloads.insert(id.into());
        self
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock_calls().clone()
    }

    /// Node ids of every `export_images` request, one entry per request.
    pub fn export_batches(&self) -> Vec<Vec<String>> {
        self.lock_calls()
            .iter()
            .filter_map(|call| match call {
                ApiCall::ExportImages(ids) => Some(ids.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ApiCall) {
        self.lock_calls().push(call);
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<ApiCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find(&self, id: &str) -> Option<&FigmaDocumentNode> {
        self.extra_nodes
            .get(id)
            .or_else(|| find_in_tree(&self.file.document, id))
    }
}

fn find_in_tree<'a>(node: &'a FigmaDocumentNode, id: &str) -> Option<&'a FigmaDocumentNode> {
    if node.id == id {
        return Some(node);
    }
    node.children.iter().find_map(|child| find_in_tree(child, id))
}

fn truncate(node: &FigmaDocumentNode, depth: Option<u32>) -> FigmaDocumentNode {
    let mut copy = node.clone();
    if let Some(depth) = depth {
        prune(&mut copy, depth);
    }
    copy
}

fn prune(node: &mut FigmaDocumentNode, depth: u32) {
    if depth == 0 {
        node.children.clear();
        return;
    }
    for child in &mut node.children {
        prune(child, depth - 1);
    }
}

#[async_trait]
impl FigmaApi for InMemoryFigmaApi {
    async fn file(&self, _file_key: &str, depth: Option<u32>) -> Result<FigmaFileResponse> {
        self.record(ApiCall::File);
        let mut file = self.file.clone();
        file.document = truncate(&self.file.document, depth);
        Ok(file)
    }

    async fn node(
        &self,
        _file_key: &str,
        node_id: &str,
        depth: Option<u32>,
    ) -> Result<Option<FigmaDocumentNode>> {
        self.record(ApiCall::Node(node_id.to_string()));
        Ok(self.find(node_id).map(|node| truncate(node, depth)))
    }

    async fn export_images(
        &self,
        _file_key: &str,
        node_ids: &[String],
        _options: &ImageExportOptions,
    ) -> Result<FigmaImageResponse> {
        self.record(ApiCall::ExportImages(node_ids.to_vec()));
        let images = node_ids
            .iter()
            .map(|id| {
                let url = (!self.unrenderable.contains(id) && self.find(id).is_some())
                    .then(|| format!("{RENDER_SCHEME}{id}"));
                (id.clone(), url)
            })
            .collect();
        Ok(FigmaImageResponse { err: None, images })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.record(ApiCall::Download(url.to_string()));
        let id = url
            .strip_prefix(RENDER_SCHEME)
            .ok_or_else(|| SyncError::figma_api(None, format!("unknown render url {url}")))?;
        if self.failing_downloads.contains(id) {
            return Err(SyncError::figma_api(
                Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
                format!("render for {id} failed"),
            ));
        }
        Ok(self
            .assets
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!(r#"<svg id="{id}"/>"#).into_bytes()))
    }
}
