//! Seams between the orchestrator and its external collaborators.

use async_trait::async_trait;

use crate::types::{Candidate, FitResult, LightCurve, RawRecord, SourceId};
use crate::Result;

/// One survey service, normalized to [`Candidate`]s.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn id(&self) -> SourceId;

    /// Max candidates pulled per run; `None` means unbounded.
    fn max_candidates(&self) -> Option<usize> {
        None
    }

    /// Run the source's fixed freshness/quality query.
    ///
    /// Errors here are whole-source failures.
    async fn query(&self) -> Result<Vec<RawRecord>>;

    /// Resolve a listed record; fails with `NotFound` when the object has no
    /// catalog entry.
    async fn build_candidate(&self, record: RawRecord) -> Result<Candidate>;

    /// Fetch photometry for a candidate built without it.
    async fn load_light_curve(&self, candidate: &Candidate) -> Result<LightCurve>;
}

/// Light-curve model fit.
#[async_trait]
pub trait ParameterEstimator: Send + Sync {
    /// Fails with `InsufficientData` or `NonConvergence`.
    async fn fit(&self, light_curve: &LightCurve) -> Result<FitResult>;
}

/// Where the digest goes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<()>;
}
