//! CLI Tooling
//!
//! Command-line interface for recording, importing and playing back projects.

use crate::api::{PlaybackRequest, ReplayContext};
use crate::config::{ConfigLoader, FailurePolicy, LivelogConfig};
use crate::error::{ApiError, ErrorResponse, StorageError};
use crate::logging::init_logging;
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;

/// livelog - record a workspace as it changes, replay it with annotations
#[derive(Parser)]
#[command(name = "livelog")]
#[command(about = "Record workspace history and play it back as an annotated timeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll a workspace and record every change (runs until killed)
    Record {
        /// Workspace directory; created and initialised if missing
        workspace: PathBuf,
    },
    /// Import a gzip tar of a git working directory as a new project
    Import {
        /// Path to the .tar.gz archive
        archive: PathBuf,
        /// Project name shown in listings
        #[arg(long)]
        name: String,
    },
    /// List known projects
    Projects {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print a project's timeline as JSON
    Playback {
        project_id: String,
        /// Abort on the first snapshot that fails to materialize
        #[arg(long)]
        fail_fast: bool,
        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Workspace whose `.livelog.toml` joins the config layers.
    fn workspace_root(&self) -> Option<&PathBuf> {
        match &self.command {
            Commands::Record { workspace } => Some(workspace),
            _ => None,
        }
    }

    fn apply_log_overrides(&self, config: &mut LivelogConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.logging.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
    }
}

/// CLI context holding the loaded config and the replay context
pub struct CliContext {
    replay: ReplayContext,
}

impl CliContext {
    /// Load config, install logging and open the store.
    pub fn new(cli: &Cli) -> Result<Self, ApiError> {
        let mut config = match &cli.config {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(cli.workspace_root().map(PathBuf::as_path))?,
        };
        cli.apply_log_overrides(&mut config);
        init_logging(&config.logging)?;

        // the recorder runs indefinitely; it must not keep the store locked
        let replay = match cli.command {
            Commands::Record { .. } => ReplayContext::open_on_demand(config)?,
            _ => ReplayContext::open(config)?,
        };
        Ok(Self { replay })
    }

    pub fn from_replay(replay: ReplayContext) -> Self {
        Self { replay }
    }

    pub fn replay(&self) -> &ReplayContext {
        &self.replay
    }

    /// Execute a CLI command and return what should be printed.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Record { workspace } => {
                let mut recorder = self.replay.recorder(workspace)?;
                info!(
                    project_id = %recorder.project_id(),
                    workspace = %workspace.display(),
                    "Starting recorder"
                );
                recorder.run();
                Ok(String::new())
            }
            Commands::Import { archive, name } => {
                let file = File::open(archive).map_err(StorageError::IoError)?;
                let response = self.replay.import_archive(file, name)?;
                to_json(&response)
            }
            Commands::Projects { format } => self.handle_projects(*format),
            Commands::Playback {
                project_id,
                fail_fast,
                timeout_ms,
            } => {
                let request = PlaybackRequest {
                    project_id: project_id.clone(),
                    failure_policy: fail_fast.then_some(FailurePolicy::FailFast),
                    timeout_ms: *timeout_ms,
                };
                let entries = self.replay.playback(request)?;
                to_json(&entries)
            }
        }
    }

    fn handle_projects(&self, format: OutputFormat) -> Result<String, ApiError> {
        let mut rows = Vec::new();
        for project_id in self.replay.list_projects()? {
            let project = self.replay.project(&project_id)?;
            let snapshots = self.replay.store().list_snapshots(&project_id)?.len();
            rows.push((project, snapshots));
        }

        match format {
            OutputFormat::Json => {
                let list: Vec<_> = rows
                    .iter()
                    .map(|(project, snapshots)| {
                        json!({
                            "project_id": project.project_id,
                            "display_name": project.display_name,
                            "original_name": project.original_name,
                            "workspace_path": project.workspace_path,
                            "created_at": project.created_at,
                            "snapshots": snapshots,
                        })
                    })
                    .collect();
                to_json(&json!({ "projects": list, "total": rows.len() }))
            }
            OutputFormat::Text => Ok(format_projects_table(&rows)),
        }
    }
}

fn format_projects_table(rows: &[(crate::store::ProjectRecord, usize)]) -> String {
    if rows.is_empty() {
        return "No projects found.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Project ID", "Name", "Snapshots", "Workspace"]);
    for (project, snapshots) in rows {
        table.add_row(vec![
            project.project_id.clone(),
            project.display_name.clone(),
            snapshots.to_string(),
            project.workspace_path.display().to_string(),
        ]);
    }
    format!("{}\n\nTotal: {} project(s)", table, rows.len())
}

/// One-line [`ErrorResponse`] JSON for a failed command, printed on stderr.
pub fn error_json(err: &ApiError) -> String {
    json!(ErrorResponse::from(err)).to_string()
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::StorageError(StorageError::Serialization(e.to_string())))
}
