//! Run journal: one JSON line per pipeline event, kept next to the dedup
//! store as `<store_dir>/journal/<deployment>-<YYYY-MM-DD>.jsonl`.

use std::collections::BTreeMap;
use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use common::{AlertConfig, SourceId};
use serde::Serialize;
use tracing::warn;

/// Something worth recording about a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    RunStart {
        sources: Vec<SourceId>,
        post: bool,
    },
    StoreUnavailable {
        path: String,
    },
    CandidateSkipped {
        source: SourceId,
        id: String,
    },
    /// Tabular export row for a fitted candidate.
    CandidateFitted {
        source: SourceId,
        id: String,
        ra: f64,
        dec: f64,
        url: String,
        params: BTreeMap<String, f64>,
    },
    CandidateFailed {
        source: SourceId,
        id: String,
        code: &'static str,
        error: String,
    },
    DigestDelivered {
        lines: usize,
    },
    RunSummary {
        pulled: usize,
        skipped: usize,
        failed: usize,
        fitted: usize,
        post: bool,
    },
    RunFailed {
        code: &'static str,
        error: String,
    },
}

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    deployment: &'a str,
    #[serde(flatten)]
    event: &'a RunEvent,
}

pub struct RunJournal {
    dir: PathBuf,
    deployment: String,
}

impl RunJournal {
    /// Journal for the configured deployment; creates the directory.
    pub fn open(cfg: &AlertConfig) -> std::io::Result<Self> {
        let dir = cfg.store_dir.join("journal");
        create_dir_all(&dir)?;
        Ok(Self {
            dir,
            deployment: cfg.deployment.trim().to_string(),
        })
    }

    fn file_for(&self, now: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{}-{}.jsonl", self.deployment, now.format("%Y-%m-%d")))
    }

    /// Today's journal file.
    pub fn current_file(&self) -> PathBuf {
        self.file_for(Utc::now())
    }

    /// Append `event`. Failures are logged and dropped.
    pub fn record(&self, event: &RunEvent) {
        let now = Utc::now();
        let line = Line {
            ts: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            deployment: &self.deployment,
            event,
        };
        let path = self.file_for(now);
        let result = serde_json::to_string(&line)
            .map_err(std::io::Error::from)
            .and_then(|text| {
                let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
                writeln!(file, "{}", text)
            });

        if let Err(e) = result {
            warn!("journal write to {} failed: {}", path.display(), e);
        }
    }
}
