pub mod change;
pub mod config;
pub mod error;
pub mod export;
pub mod figma_client;
pub mod filter;
pub mod github;
pub mod jobs;
pub mod node_id;
pub mod output;
pub mod pipeline;
pub mod readiness;
pub mod report;
#[cfg(test)]
mod stub_http;
pub mod types;

pub use change::{
    CacheWriteMode, ChangeCache, ChangeDetector, ChangeReport, ChangeStats, ChangeStatus,
    NodeInfo,
};
pub use config::Config;
pub use error::{ErrorCategory, ErrorPayload, Result, SyncError};
pub use export::{
    plan_jobs, sanitize_filename, EngineSettings, ExportEngine, ExportJob, ExportStatus,
    ExportSummary,
};
pub use figma_client::{
    FigmaApi, FigmaApiClient, FigmaAuth, FigmaFileResponse, FigmaImageFormat, FigmaImageResponse,
    FigmaNodesResponse, ImageExportOptions,
};
pub use filter::{
    CollisionPolicy, FileNamer, FilterCombinator, FilterOutcome, NodeFilter, PatternFilter,
    TargetFilter,
};
pub use github::{GithubAuth, GithubPublisher, PublishSummary};
pub use jobs::{JobRegistry, SyncJob, SyncJobStatus};
pub use node_id::{candidates, NodeIdFormat, NodeMatch, NodeResolver, ResolvedNode};
pub use output::{
    AssessOutput, ErrorOutput, FigsyncOutput, ResolveOutput, SyncOutput, FIGSYNC_OUTPUT_VERSION,
};
pub use pipeline::{resolve_node, SyncOutcome, SyncPipeline, SyncRequest};
pub use readiness::{Assessment, DevReadyScorer, DevReadyStatus};
pub use report::{ReportFormat, SyncReport};
pub use types::{collect_nodes, BoundingBox, CollectOptions, FigmaDocumentNode, NodeRecord};
