//! Flattened node records produced by walking the Figma tree.

use serde::{Deserialize, Serialize};

use super::figma::FigmaDocumentNode;

/// A candidate node for export, flattened out of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub width: f64,
    pub height: f64,
    pub last_modified: Option<String>,
    pub version: i64,
    /// Slash-separated layer path from the traversal root
    pub path: String,
    /// Depth below the traversal root (root = 0)
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_name: Option<String>,
    /// Ids of every ancestor up to the traversal root, nearest last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestor_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    pub max_depth: usize,
    pub max_dimension: f64,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_dimension: 2000.0,
        }
    }
}

/// Walk `root` depth-first and return every exportable node.
///
/// A node qualifies when its type is exportable and both dimensions lie in
/// `(0, max_dimension]`. Pages (`CANVAS` nodes) are not exported themselves
/// but set the page context for their descendants.
pub fn collect_nodes(root: &FigmaDocumentNode, options: &CollectOptions) -> Vec<NodeRecord> {
    let mut out = Vec::new();
    let mut ancestors = Vec::new();
    walk(root, 0, "", None, &mut ancestors, options, &mut out);
    out
}

fn walk(
    node: &FigmaDocumentNode,
    depth: usize,
    parent_path: &str,
    page: Option<(&str, &str)>,
    ancestors: &mut Vec<String>,
    options: &CollectOptions,
    out: &mut Vec<NodeRecord>,
) {
    if depth > options.max_depth {
        return;
    }

    let name = if node.name.is_empty() {
        "Unnamed"
    } else {
        node.name.as_str()
    };
    let path = if parent_path.is_empty() {
        name.to_string()
    } else {
        format!("{parent_path}/{name}")
    };
    let page = if node.node_type == "CANVAS" {
        Some((node.id.as_str(), name))
    } else {
        page
    };

    let (width, height) = (node.width(), node.height());
    if node.is_exportable_type()
        && !node.id.is_empty()
        && width > 0.0
        && height > 0.0
        && width <= options.max_dimension
        && height <= options.max_dimension
    {
        out.push(NodeRecord {
            id: node.id.clone(),
            name: name.to_string(),
            node_type: node.node_type.clone(),
            width,
            height,
            last_modified: node.last_modified.clone(),
            version: node.version,
            path: path.clone(),
            depth,
            page_id: page.map(|(id, _)| id.to_string()),
            page_name: page.map(|(_, name)| name.to_string()),
            ancestor_ids: ancestors.clone(),
        });
    }

    ancestors.push(node.id.clone());
    for child in &node.children {
        walk(child, depth + 1, &path, page, ancestors, options, out);
    }
    ancestors.pop();
}
