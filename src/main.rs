//! transient-alert: supernova candidate digest bot.
//!
//! Single-binary Tokio application that:
//! 1. Queries ALeRCE, ANTARES and YSE-PZ for fresh transients
//! 2. Skips candidates already posted (SQLite dedup store)
//! 3. Fits SALT3 parameters through the fit service
//! 4. Posts one digest per run to Slack

mod config;
mod dedup;
mod digest;
mod journal;
mod orchestrator;
mod scheduler;
#[cfg(test)]
mod testing;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use alerce_client::AlerceClient;
use antares_client::AntaresClient;
use common::{CandidateSource, SourceId};
use salt_fit_client::SaltFitClient;
use slack_client::SlackClient;
use yse_client::YseClient;

use crate::dedup::DedupStore;
use crate::journal::RunJournal;
use crate::orchestrator::Orchestrator;

/// Transient survey digest bot
#[derive(Parser)]
#[command(name = "transient-alert", about = "Post SALT3 fits of new transients to Slack")]
struct Cli {
    /// Sources to query, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "alerce,antares,yse")]
    sources: Vec<SourceId>,

    /// Build the digest without committing ids or posting.
    #[arg(long)]
    no_post: bool,

    /// Run once and exit instead of looping.
    #[arg(long)]
    once: bool,

    /// Seconds between run starts (overrides config).
    #[arg(long)]
    period_secs: Option<u64>,

    /// Create the dedup store for this deployment, then exit.
    #[arg(long)]
    init_store: bool,

    /// Config file (default: ./config.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "transient_alert=info,alerce_client=info,antares_client=info,yse_client=info,\
                 salt_fit_client=info,slack_client=info"
                    .into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let post = !cli.no_post;

    let mut cfg = config::load_config(cli.config.as_deref()).context("loading configuration")?;
    if let Some(period) = cli.period_secs {
        cfg.period_secs = period;
    }

    if cli.init_store {
        let path = cfg.store_path();
        DedupStore::provision(&path)
            .with_context(|| format!("provisioning dedup store {}", path.display()))?;
        return Ok(());
    }

    let selected: BTreeSet<SourceId> = cli.sources.iter().copied().collect();
    let selected_list: Vec<SourceId> = selected.iter().copied().collect();
    config::validate_config(&cfg, &selected_list, post)?;

    info!("Deployment: {}", cfg.deployment);
    info!(
        "Sources: {:?}, post={}, period={}s, store={}",
        selected_list,
        post,
        cfg.period_secs,
        cfg.store_path().display()
    );

    // Clients are built once and reused by every run.
    let mut sources: Vec<Box<dyn CandidateSource>> = Vec::new();
    for id in &selected {
        let source: Box<dyn CandidateSource> = match id {
            SourceId::Alerce => Box::new(AlerceClient::new(cfg.alerce.clone())?),
            SourceId::Antares => Box::new(AntaresClient::new(cfg.antares.clone())?),
            SourceId::Yse => Box::new(YseClient::new(cfg.yse.clone())?),
        };
        sources.push(source);
    }
    let estimator = SaltFitClient::new(cfg.fitter.clone())?;
    let sink = SlackClient::new(cfg.slack.clone())?;

    let journal = match RunJournal::open(&cfg) {
        Ok(j) => {
            info!("Run journal: {}", j.current_file().display());
            Some(j)
        }
        Err(e) => {
            warn!("Run journal disabled: {}", e);
            None
        }
    };

    let mut orchestrator = Orchestrator::new(
        sources,
        Box::new(estimator),
        Box::new(sink),
        cfg.store_path(),
    )
    .with_journal(journal);

    if cli.once {
        let batch = orchestrator.run(&selected, post).await.map_err(|e| {
            error!("Run failed: {}", e);
            e
        })?;
        if !post && !batch.is_empty() {
            println!("{}", batch.digest());
        }
        return Ok(());
    }

    let period = Duration::from_secs(cfg.period_secs);
    info!("Running every {}s. Press Ctrl+C to stop.", cfg.period_secs);
    tokio::select! {
        result = scheduler::run_forever(&mut orchestrator, &selected, post, period) => {
            if let Err(e) = &result {
                error!("Run failed, stopping: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
