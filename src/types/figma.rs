//! Figma document tree types.
//!
//! These types mirror the JSON node tree returned by the Figma REST API
//! (`GET /v1/files/{key}` and `GET /v1/files/{key}/nodes`).

use serde::{Deserialize, Deserializer, Serialize};

/// Node types Figma can render to a standalone image without surprises.
pub const EXPORTABLE_TYPES: [&str; 4] = ["COMPONENT", "INSTANCE", "FRAME", "GROUP"];

/// A node of the Figma document tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FigmaDocumentNode {
    /// Figma-assigned node id (`"123:456"`)
    pub id: String,
    /// Display name in the layers panel
    #[serde(default)]
    pub name: String,
    /// Figma node type (DOCUMENT, CANVAS, FRAME, COMPONENT, ...)
    #[serde(rename = "type", default)]
    pub node_type: String,
    /// Absolute position and size on the canvas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_bounding_box: Option<BoundingBox>,
    /// Last edit timestamp, when the API reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Node version counter, when the API reports one
    #[serde(default, deserialize_with = "lenient_version")]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FigmaDocumentNode>,
}

impl FigmaDocumentNode {
    pub fn width(&self) -> f64 {
        self.absolute_bounding_box.map(|b| b.width).unwrap_or(0.0)
    }

    pub fn height(&self) -> f64 {
        self.absolute_bounding_box.map(|b| b.height).unwrap_or(0.0)
    }

    pub fn is_exportable_type(&self) -> bool {
        EXPORTABLE_TYPES.contains(&self.node_type.as_str())
    }
}

/// Figma `absoluteBoundingBox`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

// Figma reports versions as numbers on nodes but as numeric strings on files.
fn lenient_version<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}
