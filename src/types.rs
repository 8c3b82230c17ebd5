//! Data types used throughout the figsync library.
//!
//! This module is organized by domain:
//! - [`figma`] - Raw Figma document tree as returned by the REST API
//! - [`node`] - Flattened node records produced by tree traversal

pub mod figma;
pub mod node;

pub use figma::{BoundingBox, FigmaDocumentNode, EXPORTABLE_TYPES};
pub use node::{collect_nodes, CollectOptions, NodeRecord};
