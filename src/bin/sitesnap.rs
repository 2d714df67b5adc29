// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use sitesnap::{
    config::SyncConfig,
    path::default_config_file,
    prompt::{AssumeYes, InquirePrompter, Prompter},
    select::SnapshotRef,
    syscall::SystemCall,
    workflow::Workflow,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  sitesnap [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer every confirmation with yes.
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let path = match self.config {
            Some(path) => path,
            None => default_config_file()?,
        };
        let config = SyncConfig::load(&path)?;

        if self.yes {
            run_command(self.command, &config, AssumeYes(InquirePrompter))
        } else {
            run_command(self.command, &config, InquirePrompter)
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Push new snapshot of local site.
    #[command(override_usage = "sitesnap push [options]")]
    Push,

    /// Pull snapshot onto local site.
    #[command(override_usage = "sitesnap pull [options] [--tag <name|latest>]")]
    Pull(PullOptions),

    /// Repair permissions and rerun site hooks.
    #[command(override_usage = "sitesnap fix [options]")]
    Fix,

    /// List snapshot tags, newest first.
    #[command(override_usage = "sitesnap tags [options]")]
    Tags,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PullOptions {
    /// Snapshot tag to pull, or "latest" for the branch head.
    #[arg(short, long, value_name = "name|latest")]
    pub tag: Option<SnapshotRef>,
}

fn main() {
    let cli = Cli::parse();
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_command(command: Command, config: &SyncConfig, prompter: impl Prompter) -> Result<()> {
    let mut workflow = Workflow::new(config, &SystemCall, prompter, ProgressBar::no_length());
    match command {
        Command::Push => run_push(&mut workflow),
        Command::Pull(opts) => run_pull(&mut workflow, opts),
        Command::Fix => run_fix(&mut workflow),
        Command::Tags => run_tags(&mut workflow),
    }
}

fn run_push(workflow: &mut Workflow<'_, SystemCall, impl Prompter>) -> Result<()> {
    let summary = workflow.push()?;
    if !summary.pushed {
        warn!("no snapshot pushed");
        return Ok(());
    }

    if !summary.commit.changed {
        info!("snapshot unchanged since last push");
    }
    if summary.tagged {
        info!("pushed snapshot {}", summary.tag);
    } else {
        warn!("pushed snapshot, but tag {} is missing on the remote", summary.tag);
    }
    if !summary.staging.is_complete() {
        warn!(
            "{} path(s) could not be staged, see warnings above",
            summary.staging.failures.len()
        );
    }

    Ok(())
}

fn run_pull(
    workflow: &mut Workflow<'_, SystemCall, impl Prompter>,
    opts: PullOptions,
) -> Result<()> {
    let summary = workflow.pull(opts.tag)?;
    if let Some(import) = &summary.import {
        info!("imported database with {} tables", import.tables);
    }
    if !summary.staging.is_complete() {
        warn!(
            "{} path(s) could not be applied, see warnings above",
            summary.staging.failures.len()
        );
    }
    for hook in &summary.failed_hooks {
        warn!("{hook} hook failed, rerun it with `sitesnap fix`");
    }
    info!("pulled snapshot {}", summary.target);

    Ok(())
}

fn run_fix(workflow: &mut Workflow<'_, SystemCall, impl Prompter>) -> Result<()> {
    let summary = workflow.fix()?;
    for path in &summary.normalized {
        info!("normalized permissions of {:?}", path.display());
    }
    if summary.permission_failures > 0 {
        warn!("{} path(s) kept their permissions", summary.permission_failures);
    }
    for hook in &summary.failed_hooks {
        warn!("{hook} hook failed");
    }

    Ok(())
}

fn run_tags(workflow: &mut Workflow<'_, SystemCall, impl Prompter>) -> Result<()> {
    let tags = workflow.tags()?;
    if tags.is_empty() {
        info!("no snapshot tags found");
    }
    for tag in tags {
        println!("{tag}");
    }

    Ok(())
}
