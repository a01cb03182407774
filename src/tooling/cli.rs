//! CLI Tooling
//!
//! `pull`, `push` and `generate-metadata` over one workspace folder. Flags
//! win over the branch-resolved configuration.

use crate::config::{ConfigLoader, SyncOptions, WorkspaceConfig};
use crate::context::{BranchInfo, SyncContext};
use crate::error::SyncError;
use crate::logging::LoggingConfig;
use crate::regeneration::{MetadataGenerator, RegenerationMode, Regenerator};
use crate::remote::{HttpRemote, RemoteWorkspace};
use crate::store::Lockfile;
use crate::sync::conflict::{Prompter, Unattended};
use crate::sync::pull::{self, PullOptions};
use crate::sync::push::{self, PushOptions};
use crate::sync::report::{format_changes, SyncReport};
use crate::sync::{local_snapshot, Change, ChangeTracker};
use crate::types::Direction;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use super::prompt::TerminalPrompter;

/// wmsync - synchronize a local folder with a remote workspace
#[derive(Parser, Debug)]
#[command(name = "wmsync")]
#[command(about = "Bidirectional synchronization between a local folder and a remote workspace")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides discovery of wmill.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Remote instance URL
    #[arg(long, env = "WMSYNC_BASE_URL")]
    pub base_url: Option<String>,

    /// Remote workspace id
    #[arg(long, env = "WMSYNC_WORKSPACE_ID")]
    pub workspace_id: Option<String>,

    /// API token
    #[arg(long, env = "WMSYNC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Logging settings: the configuration document's, overridden by flags.
    pub fn logging_config(&self, base: Option<&LoggingConfig>) -> LoggingConfig {
        let mut config = base.cloned().unwrap_or_default();
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull the remote workspace into the local folder
    Pull {
        #[command(flatten)]
        sync: SyncArgs,
    },
    /// Push the local folder to the remote workspace
    Push {
        #[command(flatten)]
        sync: SyncArgs,
        /// Do not pull first in stateful mode
        #[arg(long)]
        skip_pull: bool,
        /// Deployment message attached to pushed scripts
        #[arg(long)]
        message: Option<String>,
    },
    /// Recompute schemas and locks of artifacts whose code changed
    GenerateMetadata {
        /// Only list stale artifacts
        #[arg(long)]
        dry_run: bool,
        /// Emit a JSON summary
        #[arg(long)]
        json_output: bool,
        /// Override the git branch
        #[arg(long)]
        branch: Option<String>,
    },
}

/// Flags shared by pull and push.
#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    /// Show changes without applying them
    #[arg(long)]
    pub dry_run: bool,
    /// Apply without asking; the remote wins conflicts
    #[arg(long)]
    pub yes: bool,
    /// Emit a single JSON document on stdout
    #[arg(long)]
    pub json_output: bool,
    /// Show line diffs of edited files
    #[arg(long)]
    pub show_diffs: bool,
    /// Track the last pulled state under .wmill/ for conflict detection
    #[arg(long)]
    pub stateful: bool,
    /// Record conflicts and exit non-zero instead of resolving them
    #[arg(long)]
    pub fail_conflicts: bool,
    /// Number of artifacts applied concurrently
    #[arg(long)]
    pub parallel: Option<usize>,
    /// Override the git branch
    #[arg(long)]
    pub branch: Option<String>,
    /// Comma-separated include globs, replacing the configured ones
    #[arg(long, value_delimiter = ',')]
    pub includes: Vec<String>,
    /// Comma-separated exclude globs, added to the configured ones
    #[arg(long, value_delimiter = ',')]
    pub excludes: Vec<String>,
    #[arg(long)]
    pub skip_variables: bool,
    #[arg(long)]
    pub skip_resources: bool,
    #[arg(long)]
    pub skip_resource_types: bool,
    #[arg(long)]
    pub skip_secrets: bool,
    #[arg(long)]
    pub skip_scripts: bool,
    #[arg(long)]
    pub skip_flows: bool,
    #[arg(long)]
    pub skip_apps: bool,
    #[arg(long)]
    pub skip_folders: bool,
    #[arg(long)]
    pub skip_scripts_metadata: bool,
    #[arg(long)]
    pub include_schedules: bool,
    #[arg(long)]
    pub include_triggers: bool,
    #[arg(long)]
    pub include_users: bool,
    #[arg(long)]
    pub include_groups: bool,
    #[arg(long)]
    pub include_settings: bool,
    #[arg(long)]
    pub include_key: bool,
    /// Pull secrets in plain text
    #[arg(long)]
    pub plain_secrets: bool,
    /// Keep descriptors as JSON instead of YAML
    #[arg(long)]
    pub json: bool,
    /// Validate flow, schedule and trigger documents before pushing
    #[arg(long)]
    pub lint: bool,
}

impl SyncArgs {
    /// Apply flags on top of the effective options. Boolean flags only turn
    /// toggles on.
    pub fn apply_to(&self, options: &mut SyncOptions) {
        if let Some(parallel) = self.parallel {
            options.parallel = parallel;
        }
        if !self.includes.is_empty() {
            options.includes = self.includes.clone();
        }
        options.excludes.extend(self.excludes.iter().cloned());
        let toggles: [(&mut bool, bool); 18] = [
            (&mut options.skip_variables, self.skip_variables),
            (&mut options.skip_resources, self.skip_resources),
            (&mut options.skip_resource_types, self.skip_resource_types),
            (&mut options.skip_secrets, self.skip_secrets),
            (&mut options.skip_scripts, self.skip_scripts),
            (&mut options.skip_flows, self.skip_flows),
            (&mut options.skip_apps, self.skip_apps),
            (&mut options.skip_folders, self.skip_folders),
            (&mut options.skip_scripts_metadata, self.skip_scripts_metadata),
            (&mut options.include_schedules, self.include_schedules),
            (&mut options.include_triggers, self.include_triggers),
            (&mut options.include_users, self.include_users),
            (&mut options.include_groups, self.include_groups),
            (&mut options.include_settings, self.include_settings),
            (&mut options.include_key, self.include_key),
            (&mut options.plain_secrets, self.plain_secrets),
            (&mut options.json, self.json),
            (&mut options.lint, self.lint),
        ];
        for (option, flag) in toggles {
            *option |= flag;
        }
    }
}

/// Rendered result of a command and whether it succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

/// Collaborators of one command.
pub struct Collaborators<'a> {
    pub remote: &'a dyn RemoteWorkspace,
    pub generator: Option<&'a dyn MetadataGenerator>,
    pub prompter: &'a dyn Prompter,
}

/// CLI context: the workspace root and its configuration document.
pub struct CliContext {
    workspace_root: PathBuf,
    config: WorkspaceConfig,
    config_path: Option<PathBuf>,
}

impl CliContext {
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let workspace_root = dunce::canonicalize(&workspace_root)
            .with_context(|| format!("workspace {} not found", workspace_root.display()))?;
        let loaded = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(CliContext {
            workspace_root,
            config: loaded.config,
            config_path: loaded.file.or(config_path),
        })
    }

    /// Context over an already loaded configuration.
    pub fn with_config(workspace_root: PathBuf, config: WorkspaceConfig) -> Self {
        CliContext {
            workspace_root,
            config,
            config_path: None,
        }
    }

    pub fn logging(&self) -> Option<&LoggingConfig> {
        self.config.logging.as_ref()
    }

    fn sync_context(&self, branch: Option<&str>, args: Option<&SyncArgs>) -> Result<SyncContext, SyncError> {
        let branch = BranchInfo::resolve(&self.workspace_root, branch)?;
        SyncContext::build(&self.workspace_root, &self.config, branch, |options| {
            if let Some(args) = args {
                args.apply_to(options);
            }
        })
    }

    /// Execute a command against the HTTP remote named on the command line.
    pub async fn execute(&self, cli: &Cli) -> anyhow::Result<CommandOutput> {
        let base_url = cli
            .base_url
            .as_deref()
            .context("no remote configured: pass --base-url or set WMSYNC_BASE_URL")?;
        let workspace_id = cli
            .workspace_id
            .as_deref()
            .context("no workspace id: pass --workspace-id or set WMSYNC_WORKSPACE_ID")?;
        let token = cli
            .token
            .as_deref()
            .context("no token: pass --token or set WMSYNC_TOKEN")?;
        let remote = HttpRemote::new(base_url, workspace_id, token)?;
        info!(
            workspace = workspace_id,
            root = %self.workspace_root.display(),
            config = ?self.config_path,
            "Starting command"
        );
        let collaborators = Collaborators {
            remote: &remote,
            generator: Some(&remote),
            prompter: &TerminalPrompter,
        };
        self.execute_with(&cli.command, &collaborators).await
    }

    /// Execute a command against the given collaborators.
    pub async fn execute_with(
        &self,
        command: &Commands,
        collaborators: &Collaborators<'_>,
    ) -> anyhow::Result<CommandOutput> {
        match command {
            Commands::Pull { sync } => self.handle_pull(sync, collaborators).await,
            Commands::Push {
                sync,
                skip_pull,
                message,
            } => {
                self.handle_push(sync, *skip_pull, message.as_deref(), collaborators)
                    .await
            }
            Commands::GenerateMetadata {
                dry_run,
                json_output,
                branch,
            } => {
                let generator = collaborators
                    .generator
                    .context("generate-metadata needs a remote to resolve locks")?;
                self.handle_generate_metadata(*dry_run, *json_output, branch.as_deref(), generator)
                    .await
            }
        }
    }

    /// Shows the listing on stderr and asks before applying. Returns whether
    /// the listing was shown, and `Some(report)` when the run stops here.
    fn gate(
        &self,
        direction: Direction,
        changes: &[Change],
        args: &SyncArgs,
        prompter: &dyn Prompter,
    ) -> (bool, Option<SyncReport>) {
        let (empty_message, dry_run_message) = match direction {
            Direction::Pull => ("No changes to apply", "Dry run: no changes applied"),
            Direction::Push => ("No changes to push", "Dry run: no changes pushed"),
        };
        if changes.is_empty() {
            return (false, Some(SyncReport::unapplied(direction, Vec::new(), empty_message)));
        }
        if args.dry_run {
            return (false, Some(SyncReport::unapplied(direction, changes.to_vec(), dry_run_message)));
        }
        if args.yes {
            return (false, None);
        }
        if !args.json_output {
            eprint!("{}", format_changes(changes, args.show_diffs));
        }
        let question = format!("Apply these {} changes?", changes.len());
        if prompter.confirm(&question) {
            (true, None)
        } else {
            (true, Some(SyncReport::unapplied(direction, changes.to_vec(), "Cancelled")))
        }
    }

    fn render(report: &SyncReport, args: &SyncArgs, listed: bool) -> CommandOutput {
        let text = if listed && !args.json_output {
            report.render_outcome()
        } else {
            report.render(args.json_output, args.show_diffs)
        };
        let success = match report.check() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Run did not complete cleanly");
                false
            }
        };
        CommandOutput {
            text: text.trim_end().to_string(),
            success,
        }
    }

    async fn handle_pull(&self, args: &SyncArgs, collaborators: &Collaborators<'_>) -> anyhow::Result<CommandOutput> {
        let ctx = self.sync_context(args.branch.as_deref(), Some(args))?;
        let options = PullOptions {
            dry_run: args.dry_run,
            yes: args.yes,
            fail_conflicts: args.fail_conflicts,
            stateful: args.stateful,
        };
        let plan = pull::plan(&ctx, collaborators.remote, &options)
            .await
            .context("failed to compute remote changes")?;
        let (listed, stop) = self.gate(Direction::Pull, &plan.changes, args, collaborators.prompter);
        if let Some(report) = stop {
            return Ok(Self::render(&report, args, listed));
        }
        let prompter: &dyn Prompter = if args.yes { &Unattended } else { collaborators.prompter };
        let report = pull::apply_plan(&ctx, plan, &options, prompter, None).await?;
        Ok(Self::render(&report, args, listed))
    }

    async fn handle_push(
        &self,
        args: &SyncArgs,
        skip_pull: bool,
        message: Option<&str>,
        collaborators: &Collaborators<'_>,
    ) -> anyhow::Result<CommandOutput> {
        let mut ctx = self.sync_context(args.branch.as_deref(), Some(args))?;
        if let Some(message) = message {
            ctx.options.message = Some(message.to_string());
        }
        let options = PushOptions {
            dry_run: args.dry_run,
            yes: args.yes,
            fail_conflicts: args.fail_conflicts,
            stateful: args.stateful,
            skip_pull,
        };
        if options.stateful && !options.skip_pull && !options.dry_run {
            let pull_options = PullOptions {
                dry_run: false,
                yes: args.yes,
                fail_conflicts: args.fail_conflicts,
                stateful: true,
            };
            let pulled = pull::pull(&ctx, collaborators.remote, &pull_options, collaborators.prompter, None)
                .await
                .context("pull before push failed")?;
            pulled.check().context("pull before push left conflicts")?;
        }
        let plan = push::plan(&ctx, collaborators.remote)
            .await
            .context("failed to compute local changes")?;
        let (listed, stop) = self.gate(Direction::Push, &plan.changes, args, collaborators.prompter);
        if let Some(mut report) = stop {
            report.stale = plan.stale;
            return Ok(Self::render(&report, args, listed));
        }
        let report = push::apply_plan(&ctx, collaborators.remote, plan, &options).await?;
        Ok(Self::render(&report, args, listed))
    }

    async fn handle_generate_metadata(
        &self,
        dry_run: bool,
        json_output: bool,
        branch: Option<&str>,
        generator: &dyn MetadataGenerator,
    ) -> anyhow::Result<CommandOutput> {
        let ctx = self.sync_context(branch, None)?;
        let local = local_snapshot(&ctx, false).await;
        let mut tracker = ChangeTracker::default();
        for path in local.keys() {
            tracker.track(path, &local);
        }
        let mode = if dry_run {
            RegenerationMode::CheckStale
        } else {
            RegenerationMode::Regenerate
        };
        let mut lockfile = Lockfile::open(&ctx.root).await?;
        let report = Regenerator::new(&ctx, Some(generator))
            .run(&tracker, &mut lockfile, mode)
            .await;
        if !dry_run {
            lockfile.save().await?;
        }

        let success = report.failed.is_empty();
        let text = if json_output {
            let failed: Vec<_> = report
                .failed
                .iter()
                .map(|(path, error)| json!({ "path": path, "error": error }))
                .collect();
            serde_json::to_string_pretty(&json!({
                "success": success,
                "regenerated": report.regenerated,
                "up_to_date": report.up_to_date.len(),
                "stale": report.stale,
                "failed": failed,
            }))?
        } else {
            let mut text = format!(
                "Regenerated {}, up to date {}, stale {}, failed {}",
                report.regenerated.len(),
                report.up_to_date.len(),
                report.stale.len(),
                report.failed.len()
            );
            for path in report.regenerated.iter().chain(report.stale.iter()) {
                text.push_str(&format!("\n  {}", path));
            }
            for (path, error) in &report.failed {
                text.push_str(&format!("\n  ! {}: {}", path, error));
            }
            text
        };
        Ok(CommandOutput { text, success })
    }
}
