#![warn(missing_docs)]
//! Replication status command line: resolves remotes and replays replication
//! events into a status cache to report per-project status.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replstatus::metrics::render;
use replstatus::{
    EventIngestor, EventRecord, FileJournal, RefLister, RemoteSelector, StatusCache, StatusConfig,
    StatusError, StatusMetrics, StatusQuery,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "replstatus")]
#[command(about = "Replication status tracker", long_about = None)]
struct Cli {
    /// Configuration file (.toml or .json).
    #[arg(short, long, env = "REPLSTATUS_CONFIG", default_value = "/etc/replstatus/replstatus.toml")]
    config: PathBuf,

    /// Overrides `instance_id` from the configuration.
    #[arg(long, env = "REPLSTATUS_INSTANCE_ID")]
    instance_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a remote's URL templates, or its destinations for a project.
    Resolve {
        #[arg(short, long)]
        remote: String,
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Replay events and print the status of a project.
    Status {
        /// JSON-lines event file, `-` for stdin.
        #[arg(short, long)]
        events: Option<String>,
        #[arg(short, long)]
        project: String,
        /// Remote stanza name; all remotes when omitted.
        #[arg(short, long)]
        remote: Option<String>,
        /// Bare repository to list refs from.
        #[arg(long)]
        git_dir: Option<PathBuf>,
        /// Explicit refs; combined with `--git-dir` if both are given.
        #[arg(long = "ref")]
        refs: Vec<String>,
        /// Also print metrics in Prometheus text format.
        #[arg(long)]
        metrics: bool,
    },
}

/// Refs gathered up front for a single project.
struct ListedRefs {
    project: String,
    refs: BTreeSet<String>,
}

impl RefLister for ListedRefs {
    fn list_refs(&self, project: &str) -> Result<BTreeSet<String>, StatusError> {
        if project == self.project {
            Ok(self.refs.clone())
        } else {
            Err(StatusError::ProjectNotFound {
                project: project.to_string(),
            })
        }
    }
}

async fn git_refs(git_dir: &Path) -> Result<BTreeSet<String>> {
    let output = tokio::process::Command::new("git")
        .arg("--git-dir")
        .arg(git_dir)
        .args(["for-each-ref", "--format=%(refname)"])
        .output()
        .await
        .context("failed to run git for-each-ref")?;
    if !output.status.success() {
        anyhow::bail!(
            "git for-each-ref failed in {}: {}",
            git_dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}

async fn replay_events<R: AsyncRead + Unpin>(reader: R, ingestor: &EventIngestor) -> Result<usize> {
    let mut lines = BufReader::new(reader).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(&line) {
            Ok(record) => {
                ingestor.on_event(record);
            }
            Err(e) => tracing::warn!(line = line_no, error = %e, "skipping undecodable event"),
        }
    }
    Ok(line_no)
}

fn open_cache(config: &StatusConfig) -> Result<StatusCache> {
    match &config.persistence {
        Some(p) => {
            let journal = FileJournal::open(&p.journal_path)
                .with_context(|| format!("opening journal {}", p.journal_path.display()))?;
            Ok(StatusCache::recover(&config.cache, journal)?)
        }
        None => Ok(StatusCache::new(&config.cache)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        StatusConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", cli.config.display());
        StatusConfig::default()
    };
    if cli.instance_id.is_some() {
        config.instance_id = cli.instance_id.clone();
    }
    let remotes = Arc::new(config.remotes()?);

    match cli.command {
        Command::Resolve { remote, project } => {
            let out = match project {
                Some(project) => remotes.resolve(&remote, &project),
                None => remotes.templates(&remote),
            };
            for line in out {
                println!("{}", line);
            }
            Ok(())
        }
        Command::Status {
            events,
            project,
            remote,
            git_dir,
            refs,
            metrics,
        } => {
            let cache = Arc::new(open_cache(&config)?);
            let status_metrics = Arc::new(StatusMetrics::new());
            let ingestor = EventIngestor::new(
                cache.clone(),
                status_metrics.clone(),
                config.instance_id().map(str::to_string),
            );

            if let Some(events) = events {
                let lines = if events == "-" {
                    replay_events(tokio::io::stdin(), &ingestor).await?
                } else {
                    let file = tokio::fs::File::open(&events)
                        .await
                        .with_context(|| format!("opening events file {}", events))?;
                    replay_events(file, &ingestor).await?
                };
                tracing::info!(lines, "events replayed");
            }

            let mut ref_names: BTreeSet<String> = refs.into_iter().collect();
            if let Some(dir) = &git_dir {
                ref_names.extend(git_refs(dir).await?);
            }
            if git_dir.is_none() && ref_names.is_empty() {
                ref_names = cache
                    .entries()
                    .into_iter()
                    .filter(|(k, _)| k.project() == project)
                    .map(|(k, _)| k.ref_name().to_string())
                    .collect();
            }

            let lister = ListedRefs {
                project: project.clone(),
                refs: ref_names,
            };
            let query = StatusQuery::new(remotes, cache.clone());
            let status = query.query(&project, &RemoteSelector::from_option(remote), &lister)?;

            println!("{}", serde_json::to_string_pretty(&status)?);
            if metrics {
                print!("{}", render(&status_metrics.to_metrics(&cache.stats())));
            }
            if config.persistence.is_some() {
                cache.compact_journal()?;
            }
            if status.status.is_failure() {
                std::process::exit(2);
            }
            Ok(())
        }
    }
}
