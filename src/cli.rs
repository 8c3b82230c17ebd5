use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use figsync_lib::FilterCombinator;

#[derive(Parser, Debug)]
#[command(name = "figsync")]
#[command(about = "Export named Figma nodes to SVG/PNG files with change detection")]
#[command(version)]
pub struct Cli {
    /// Config file (JSON, or TOML when the name ends in .toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging on stderr (overrides LOG_LEVEL)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a Figma file, detect changes and export the selected nodes
    Sync {
        /// Figma file key (the part after /file/ or /design/ in the URL)
        #[arg(long, env = "FIGMA_FILE_KEY")]
        file_key: String,

        /// Only sync the subtree under this node (123:456 or 123-456)
        #[arg(long)]
        node_id: Option<String>,

        /// Overrides output_settings.default_output_dir
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Export every selected node even when unchanged
        #[arg(long)]
        force: bool,

        /// Detect, filter and score only; write nothing
        #[arg(long)]
        dry_run: bool,

        /// How name patterns and target node ids combine
        #[arg(long, value_enum)]
        combine: Option<CombineArg>,

        /// Upload exported files to GitHub (needs GITHUB_PAT, GITHUB_REPO_OWNER, GITHUB_REPO_NAME)
        #[arg(long)]
        publish: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,

        /// Write the command output to a file instead of stdout
        #[arg(long = "out")]
        output: Option<PathBuf>,
    },

    /// Show how a node id is resolved, optionally against the live file
    Resolve {
        #[arg(long)]
        node_id: String,

        #[arg(long, env = "FIGMA_FILE_KEY")]
        file_key: Option<String>,

        /// List candidate ids without calling the API
        #[arg(long)]
        offline: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,

        #[arg(long = "out")]
        output: Option<PathBuf>,
    },

    /// Score one node name and size for dev readiness
    Assess {
        #[arg(long)]
        name: String,

        #[arg(long, default_value_t = 24.0)]
        width: f64,

        #[arg(long, default_value_t = 24.0)]
        height: f64,

        #[arg(long, default_value = "COMPONENT")]
        node_type: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,

        #[arg(long = "out")]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CombineArg {
    Or,
    And,
}

impl From<CombineArg> for FilterCombinator {
    fn from(arg: CombineArg) -> Self {
        match arg {
            CombineArg::Or => FilterCombinator::Or,
            CombineArg::And => FilterCombinator::And,
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
