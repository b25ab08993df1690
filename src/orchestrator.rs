//! One pipeline run: query sources, fit new candidates, commit, deliver.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use common::{
    Candidate, CandidateSource, Error, FitResult, NotificationSink, ParameterEstimator, RawRecord,
    SourceId,
};
use tracing::{debug, info, warn};

use crate::dedup::DedupStore;
use crate::digest::format_line;
use crate::journal::{RunEvent, RunJournal};

/// Lines and ids accumulated by a run, index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunBatch {
    pub formatted_lines: Vec<String>,
    pub newly_seen_ids: Vec<String>,
}

impl RunBatch {
    pub fn digest(&self) -> String {
        self.formatted_lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.formatted_lines.is_empty()
    }

    fn push(&mut self, id: String, line: String) {
        self.newly_seen_ids.push(id);
        self.formatted_lines.push(line);
    }
}

#[derive(Debug, Default)]
struct RunStats {
    pulled: usize,
    skipped: usize,
    failed: usize,
}

enum Outcome {
    /// Already posted in an earlier run or earlier in this one.
    Seen(String),
    Fitted(Candidate, FitResult),
}

fn note(journal: &Option<RunJournal>, event: RunEvent) {
    if let Some(journal) = journal {
        journal.record(&event);
    }
}

pub struct Orchestrator {
    sources: Vec<Box<dyn CandidateSource>>,
    estimator: Box<dyn ParameterEstimator>,
    sink: Box<dyn NotificationSink>,
    store_path: PathBuf,
    journal: Option<RunJournal>,
}

impl Orchestrator {
    pub fn new(
        mut sources: Vec<Box<dyn CandidateSource>>,
        estimator: Box<dyn ParameterEstimator>,
        sink: Box<dyn NotificationSink>,
        store_path: PathBuf,
    ) -> Self {
        sources.sort_by_key(|s| s.id());
        Self {
            sources,
            estimator,
            sink,
            store_path,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Option<RunJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Run the pipeline once over `selected` sources.
    ///
    /// With `post`, new ids are committed and the digest is delivered. Any
    /// returned error means nothing was committed or delivered, except a
    /// delivery failure, which happens after the commit.
    pub async fn run(&mut self, selected: &BTreeSet<SourceId>, post: bool) -> Result<RunBatch, Error> {
        let result = self.run_inner(selected, post).await;
        if let Err(e) = &result {
            note(
                &self.journal,
                RunEvent::RunFailed {
                    code: e.code(),
                    error: e.to_string(),
                },
            );
        }
        result
    }

    async fn run_inner(
        &mut self,
        selected: &BTreeSet<SourceId>,
        post: bool,
    ) -> Result<RunBatch, Error> {
        let names: Vec<&str> = selected.iter().map(SourceId::as_str).collect();
        info!("Run starting: sources={} post={}", names.join(","), post);
        note(
            &self.journal,
            RunEvent::RunStart {
                sources: selected.iter().copied().collect(),
                post,
            },
        );

        let mut store = DedupStore::open(&self.store_path);
        if !store.is_available() {
            note(
                &self.journal,
                RunEvent::StoreUnavailable {
                    path: store.path().display().to_string(),
                },
            );
        }

        let mut batch = RunBatch::default();
        let mut stats = RunStats::default();
        let mut seen_this_run: HashSet<String> = HashSet::new();

        for source in self.sources.iter().filter(|s| selected.contains(&s.id())) {
            let source_id = source.id();
            let records = source.query().await?;
            let cap = source.max_candidates().unwrap_or(usize::MAX);
            if records.len() > cap {
                info!(
                    "{}: {} records listed, processing first {}",
                    source_id,
                    records.len(),
                    cap
                );
            } else {
                info!("{}: {} records listed", source_id, records.len());
            }

            for record in records.into_iter().take(cap) {
                stats.pulled += 1;
                let label = record.listed_name.clone();
                let outcome = Self::process(
                    source.as_ref(),
                    self.estimator.as_ref(),
                    record,
                    &store,
                    &seen_this_run,
                )
                .await;

                match outcome {
                    Ok(Outcome::Seen(id)) => {
                        stats.skipped += 1;
                        debug!("{}: {} already posted, skipping", source_id, id);
                        note(
                            &self.journal,
                            RunEvent::CandidateSkipped {
                                source: source_id,
                                id,
                            },
                        );
                    }
                    Ok(Outcome::Fitted(candidate, fit)) => {
                        let line = format_line(&candidate, &fit, candidate.annotation.as_deref());
                        info!("{}: fitted {} (z={:.3})", source_id, candidate.id(), fit.z());
                        note(
                            &self.journal,
                            RunEvent::CandidateFitted {
                                source: source_id,
                                id: candidate.id().to_string(),
                                ra: candidate.ra,
                                dec: candidate.dec,
                                url: candidate.reference_url.clone(),
                                params: fit.to_map(),
                            },
                        );
                        seen_this_run.insert(candidate.id().to_string());
                        batch.push(candidate.id().to_string(), line);
                    }
                    Err(e) if e.is_candidate_scoped() => {
                        stats.failed += 1;
                        warn!("{}: {} failed: {}", source_id, label, e);
                        note(
                            &self.journal,
                            RunEvent::CandidateFailed {
                                source: source_id,
                                id: label,
                                code: e.code(),
                                error: e.to_string(),
                            },
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if post {
            if store.is_available() {
                let inserted = store.insert_all(&batch.newly_seen_ids)?;
                info!(
                    "Recorded {} new ids in {}",
                    inserted,
                    store.path().display()
                );
            } else {
                warn!(
                    "Dedup store unavailable; {} ids not recorded and may be posted again",
                    batch.newly_seen_ids.len()
                );
            }
            drop(store);

            if batch.is_empty() {
                info!("No new candidates; nothing to post");
            } else {
                self.sink.deliver(&batch.digest()).await?;
                info!("Delivered digest with {} lines", batch.formatted_lines.len());
                note(
                    &self.journal,
                    RunEvent::DigestDelivered {
                        lines: batch.formatted_lines.len(),
                    },
                );
            }
        } else {
            info!(
                "Dry run: {} lines built, nothing committed or posted",
                batch.formatted_lines.len()
            );
        }

        note(
            &self.journal,
            RunEvent::RunSummary {
                pulled: stats.pulled,
                skipped: stats.skipped,
                failed: stats.failed,
                fitted: batch.newly_seen_ids.len(),
                post,
            },
        );
        info!(
            "Run finished: pulled={} skipped={} failed={} fitted={}",
            stats.pulled,
            stats.skipped,
            stats.failed,
            batch.newly_seen_ids.len()
        );

        Ok(batch)
    }

    async fn process(
        source: &dyn CandidateSource,
        estimator: &dyn ParameterEstimator,
        record: RawRecord,
        store: &DedupStore,
        seen_this_run: &HashSet<String>,
    ) -> Result<Outcome, Error> {
        let candidate = source.build_candidate(record).await?;
        if seen_this_run.contains(candidate.id()) || store.contains(candidate.id()) {
            return Ok(Outcome::Seen(candidate.id().to_string()));
        }

        let light_curve = match &candidate.light_curve {
            Some(lc) => lc.clone(),
            None => source.load_light_curve(&candidate).await?,
        };
        let fit = estimator.fit(&light_curve).await?;
        Ok(Outcome::Fitted(candidate, fit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEstimator, MockSink, MockSource, Script};

    struct Harness {
        _tmp: tempfile::TempDir,
        store_path: PathBuf,
        sink: MockSink,
    }

    impl Harness {
        fn new(provision: bool) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let store_path = tmp.path().join("posted-test.db");
            if provision {
                DedupStore::provision(&store_path).unwrap();
            }
            Self {
                _tmp: tmp,
                store_path,
                sink: MockSink::default(),
            }
        }

        fn orchestrator(&self, sources: Vec<MockSource>) -> Orchestrator {
            Orchestrator::new(
                sources
                    .into_iter()
                    .map(|s| Box::new(s) as Box<dyn CandidateSource>)
                    .collect(),
                Box::new(MockEstimator),
                Box::new(self.sink.clone()),
                self.store_path.clone(),
            )
        }

        fn delivered(&self) -> Vec<String> {
            self.sink.delivered.lock().unwrap().clone()
        }

        fn seed(&self, ids: &[&str]) {
            let mut store = DedupStore::provision(&self.store_path).unwrap();
            let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
            store.insert_all(&ids).unwrap();
        }
    }

    fn all() -> BTreeSet<SourceId> {
        SourceId::ALL.into_iter().collect()
    }

    #[tokio::test]
    async fn test_posted_ids_are_excluded_and_not_reinserted() {
        let h = Harness::new(true);
        h.seed(&["ZTF23old"]);
        let mut orch = h.orchestrator(vec![MockSource::new(
            SourceId::Alerce,
            &[("ZTF23old", Script::Fits), ("ZTF23new", Script::Fits)],
        )]);

        let batch = orch.run(&all(), true).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["ZTF23new"]);
        assert_eq!(batch.formatted_lines.len(), 1);
        assert!(batch.formatted_lines[0].starts_with("<https://example.org/ZTF23new|ZTF23new>"));
        assert_eq!(h.delivered(), vec![batch.digest()]);

        let store = DedupStore::open(&h.store_path);
        assert!(store.contains("ZTF23old"));
        assert!(store.contains("ZTF23new"));
    }

    #[tokio::test]
    async fn test_second_run_digest_is_empty() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![
            MockSource::new(SourceId::Alerce, &[("ZTF23a", Script::Fits)]),
            MockSource::new(SourceId::Yse, &[("2023abc", Script::Fits)]),
        ]);

        let first = orch.run(&all(), true).await.unwrap();
        assert_eq!(first.newly_seen_ids, vec!["ZTF23a", "2023abc"]);

        let second = orch.run(&all(), true).await.unwrap();
        assert!(second.is_empty());
        assert!(second.newly_seen_ids.is_empty());
        // One message from the first run, none from the second.
        assert_eq!(h.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_middle_failure_does_not_stop_the_third() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![MockSource::new(
            SourceId::Antares,
            &[
                ("ZTF23one", Script::Fits),
                ("ZTF23two", Script::TooFewPoints),
                ("ZTF23three", Script::Fits),
            ],
        )]);

        let batch = orch.run(&all(), true).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["ZTF23one", "ZTF23three"]);

        let store = DedupStore::open(&h.store_path);
        assert!(!store.contains("ZTF23two"));
    }

    #[tokio::test]
    async fn test_newly_seen_matches_successful_lines() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![MockSource::new(
            SourceId::Yse,
            &[
                ("2023a", Script::NotFound),
                ("2023b", Script::Fits),
                ("2023c", Script::LightCurveDown),
                ("2023d", Script::TooFewPoints),
                ("2023e", Script::Fits),
            ],
        )]);

        let batch = orch.run(&all(), false).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["2023b", "2023e"]);
        assert_eq!(batch.formatted_lines.len(), batch.newly_seen_ids.len());
        for (id, line) in batch.newly_seen_ids.iter().zip(&batch.formatted_lines) {
            assert!(line.contains(&format!("|{}>", id)));
        }
    }

    #[tokio::test]
    async fn test_source_failure_discards_partial_batch() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![
            MockSource::new(SourceId::Alerce, &[("ZTF23a", Script::Fits)]),
            MockSource::failing(SourceId::Antares),
            MockSource::new(SourceId::Yse, &[("2023abc", Script::Fits)]),
        ]);

        let err = orch.run(&all(), true).await.unwrap_err();
        assert!(matches!(err, Error::SourceQuery { source_id: SourceId::Antares, .. }));
        assert!(h.delivered().is_empty());
        assert!(!DedupStore::open(&h.store_path).contains("ZTF23a"));
    }

    #[tokio::test]
    async fn test_non_candidate_error_aborts_run() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![MockSource::new(
            SourceId::Alerce,
            &[("ZTF23a", Script::Fits), ("ZTF23b", Script::LocalIo)],
        )]);

        let err = orch.run(&all(), true).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(h.delivered().is_empty());
        assert!(!DedupStore::open(&h.store_path).contains("ZTF23a"));
    }

    #[tokio::test]
    async fn test_cap_counts_every_pulled_record() {
        let h = Harness::new(true);
        h.seed(&["ZTF23a"]);
        let source = MockSource::new(
            SourceId::Antares,
            &[
                ("ZTF23a", Script::Fits),
                ("ZTF23b", Script::NotFound),
                ("ZTF23c", Script::Fits),
                ("ZTF23d", Script::Fits),
            ],
        )
        .with_cap(3);
        let built = source.built.clone();
        let mut orch = h.orchestrator(vec![source]);

        let batch = orch.run(&all(), true).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["ZTF23c"]);
        assert_eq!(*built.lock().unwrap(), vec!["ZTF23a", "ZTF23b", "ZTF23c"]);
    }

    #[tokio::test]
    async fn test_malformed_listing_row_only_drops_itself() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![
            MockSource::new(
                SourceId::Alerce,
                &[
                    ("ZTF23before", Script::Fits),
                    ("ZTF23broken", Script::Malformed),
                    ("ZTF23after", Script::Fits),
                ],
            ),
            MockSource::new(SourceId::Yse, &[("2023abc", Script::Fits)]),
        ]);

        let batch = orch.run(&all(), true).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["ZTF23before", "ZTF23after", "2023abc"]);
        assert_eq!(h.delivered(), vec![batch.digest()]);

        let store = DedupStore::open(&h.store_path);
        assert!(store.contains("ZTF23after"));
        assert!(!store.contains("ZTF23broken"));
    }

    #[tokio::test]
    async fn test_empty_digest_sends_nothing() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![MockSource::new(
            SourceId::Alerce,
            &[("ZTF23a", Script::NotFound)],
        )]);

        let batch = orch.run(&all(), true).await.unwrap();
        assert!(batch.is_empty());
        assert!(h.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_still_delivers() {
        let h = Harness::new(false);
        let mut orch = h.orchestrator(vec![MockSource::new(
            SourceId::Alerce,
            &[("ZTF23a", Script::Fits)],
        )]);

        let first = orch.run(&all(), true).await.unwrap();
        let second = orch.run(&all(), true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.delivered().len(), 2);
        assert!(!h.store_path.exists());
    }

    #[tokio::test]
    async fn test_dry_run_neither_commits_nor_delivers() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![MockSource::new(
            SourceId::Alerce,
            &[("ZTF23a", Script::Fits)],
        )]);

        let batch = orch.run(&all(), false).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["ZTF23a"]);
        assert!(h.delivered().is_empty());
        assert!(!DedupStore::open(&h.store_path).contains("ZTF23a"));
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_commit() {
        let mut h = Harness::new(true);
        h.sink.fail = true;
        let mut orch = h.orchestrator(vec![MockSource::new(
            SourceId::Alerce,
            &[("ZTF23a", Script::Fits)],
        )]);

        let err = orch.run(&all(), true).await.unwrap_err();
        assert!(matches!(err, Error::Notify(_)));
        assert!(DedupStore::open(&h.store_path).contains("ZTF23a"));
    }

    #[tokio::test]
    async fn test_sources_run_in_declaration_order_and_selection_applies() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![
            MockSource::new(SourceId::Yse, &[("2023abc", Script::Fits)]),
            MockSource::new(SourceId::Antares, &[("ZTF23b", Script::Fits)]),
            MockSource::new(SourceId::Alerce, &[("ZTF23a", Script::Fits)]),
        ]);

        let batch = orch.run(&all(), false).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["ZTF23a", "ZTF23b", "2023abc"]);

        let only_yse: BTreeSet<SourceId> = [SourceId::Yse].into_iter().collect();
        let batch = orch.run(&only_yse, false).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["2023abc"]);
    }

    #[tokio::test]
    async fn test_same_object_from_two_sources_posted_once() {
        let h = Harness::new(true);
        let mut orch = h.orchestrator(vec![
            MockSource::new(SourceId::Alerce, &[("ZTF23shared", Script::Fits)]),
            MockSource::new(SourceId::Antares, &[("ZTF23shared", Script::Fits)]),
        ]);

        let batch = orch.run(&all(), true).await.unwrap();
        assert_eq!(batch.newly_seen_ids, vec!["ZTF23shared"]);
    }

    #[tokio::test]
    async fn test_journal_records_run_events() {
        let h = Harness::new(true);
        let mut cfg = common::AlertConfig::default();
        cfg.store_dir = h._tmp.path().to_path_buf();
        let journal = RunJournal::open(&cfg).unwrap();
        let journal_file = journal.current_file();
        let mut orch = h
            .orchestrator(vec![MockSource::new(
                SourceId::Alerce,
                &[("ZTF23a", Script::Fits), ("ZTF23b", Script::NotFound)],
            )])
            .with_journal(Some(journal));

        orch.run(&all(), true).await.unwrap();

        let contents = std::fs::read_to_string(journal_file).unwrap();
        let kinds: Vec<String> = contents
            .lines()
            .map(|l| {
                serde_json::from_str::<serde_json::Value>(l).unwrap()["kind"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "run_start",
                "candidate_fitted",
                "candidate_failed",
                "digest_delivered",
                "run_summary"
            ]
        );
    }
}
