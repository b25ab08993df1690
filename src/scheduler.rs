//! Fixed-period run loop.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use common::{Error, SourceId};
use tokio::time::sleep;
use tracing::info;

use crate::orchestrator::Orchestrator;

/// Time left in the period after a run; zero when the run overran.
pub fn sleep_for(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Run forever, one run per `period` measured start to start.
///
/// Returns only with the first run error.
pub async fn run_forever(
    orchestrator: &mut Orchestrator,
    sources: &BTreeSet<SourceId>,
    post: bool,
    period: Duration,
) -> Result<(), Error> {
    loop {
        let started = Instant::now();
        let batch = orchestrator.run(sources, post).await?;
        let pause = sleep_for(period, started.elapsed());
        info!(
            "Run produced {} lines; next run in {}s",
            batch.formatted_lines.len(),
            pause.as_secs()
        );
        sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEstimator, MockSink, MockSource};
    use common::CandidateSource;

    #[test]
    fn test_sleep_compensates_for_run_time() {
        let period = Duration::from_secs(86_400);
        assert_eq!(
            sleep_for(period, Duration::from_secs(600)),
            Duration::from_secs(85_800)
        );
        assert_eq!(sleep_for(period, Duration::ZERO), period);
    }

    #[test]
    fn test_overrun_sleeps_zero() {
        let period = Duration::from_secs(60);
        assert_eq!(sleep_for(period, Duration::from_secs(61)), Duration::ZERO);
        assert_eq!(sleep_for(period, period), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_run_error_ends_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let sources: Vec<Box<dyn CandidateSource>> =
            vec![Box::new(MockSource::failing(SourceId::Alerce))];
        let mut orch = Orchestrator::new(
            sources,
            Box::new(MockEstimator),
            Box::new(MockSink::default()),
            tmp.path().join("posted-test.db"),
        );
        let selected: BTreeSet<SourceId> = [SourceId::Alerce].into_iter().collect();

        let err = run_forever(&mut orch, &selected, true, Duration::from_secs(3600))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceQuery { .. }));
    }
}
