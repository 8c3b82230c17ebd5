//! Machine-readable command output.
//!
//! Every command prints exactly one [`FigsyncOutput`] value, tagged by
//! `mode`. Consumers should check `version` before relying on field shapes.

use serde::Serialize;

use crate::error::ErrorPayload;
use crate::node_id::{NodeIdFormat, ResolvedNode};
use crate::pipeline::SyncOutcome;
use crate::readiness::DevReadyStatus;

pub const FIGSYNC_OUTPUT_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FigsyncOutput {
    Sync(SyncOutput),
    Resolve(ResolveOutput),
    Assess(AssessOutput),
    Error(ErrorOutput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutput {
    pub version: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOutput {
    pub version: String,
    pub node_id: String,
    pub format: Option<NodeIdFormat>,
    /// Ids the resolver tries, in order
    pub candidates: Vec<String>,
    /// Absent when resolution ran offline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedNode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessOutput {
    pub version: String,
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub node_type: String,
    pub score: f64,
    pub status: DevReadyStatus,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOutput {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub error: ErrorPayload,
}
