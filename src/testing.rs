//! Hand-written pipeline doubles shared by orchestrator and scheduler tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{
    Candidate, CandidateSource, Error, FitResult, FitValues, LightCurve, NotificationSink,
    Observation, ParameterEstimator, RawRecord, SourceId,
};
use serde_json::json;

/// How a scripted record behaves when processed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    Fits,
    NotFound,
    TooFewPoints,
    LightCurveDown,
    /// Listing row whose fields do not decode.
    Malformed,
    /// A non candidate-scoped failure.
    LocalIo,
}

pub struct MockSource {
    id: SourceId,
    records: Vec<(String, Script)>,
    fail_query: bool,
    cap: Option<usize>,
    pub built: Arc<Mutex<Vec<String>>>,
}

impl MockSource {
    pub fn new(id: SourceId, records: &[(&str, Script)]) -> Self {
        Self {
            id,
            records: records
                .iter()
                .map(|(name, script)| (name.to_string(), *script))
                .collect(),
            fail_query: false,
            cap: None,
            built: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(id: SourceId) -> Self {
        let mut source = Self::new(id, &[]);
        source.fail_query = true;
        source
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }
}

fn points(n: usize) -> LightCurve {
    LightCurve::new(
        (0..n)
            .map(|i| Observation {
                mjd: 60200.0 + i as f64,
                mag: 19.0,
                mag_err: 0.05,
                band: common::bandpass::ZTF_G.to_string(),
            })
            .collect(),
    )
}

#[async_trait]
impl CandidateSource for MockSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn max_candidates(&self) -> Option<usize> {
        self.cap
    }

    async fn query(&self) -> Result<Vec<RawRecord>, Error> {
        if self.fail_query {
            return Err(Error::SourceQuery {
                source_id: self.id,
                message: "503 Service Unavailable".into(),
            });
        }
        Ok(self
            .records
            .iter()
            .map(|(name, script)| RawRecord {
                source: self.id,
                listed_name: name.clone(),
                payload: json!({ "script": format!("{:?}", script) }),
            })
            .collect())
    }

    async fn build_candidate(&self, record: RawRecord) -> Result<Candidate, Error> {
        if let Ok(mut built) = self.built.lock() {
            built.push(record.listed_name.clone());
        }
        let script = record.payload["script"].as_str().unwrap_or_default().to_string();
        match script.as_str() {
            "NotFound" => Err(Error::NotFound(record.listed_name)),
            "Malformed" => Err(Error::MalformedRecord(format!(
                "{}: missing field `meanra`",
                record.listed_name
            ))),
            "LocalIo" => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "cache dir not writable",
            ))),
            _ => {
                let cand = Candidate::new(
                    record.listed_name.clone(),
                    self.id,
                    150.0,
                    2.5,
                    format!("https://example.org/{}", record.listed_name),
                )?;
                Ok(match script.as_str() {
                    "TooFewPoints" => cand.with_light_curve(points(2)),
                    _ => cand,
                })
            }
        }
    }

    async fn load_light_curve(&self, candidate: &Candidate) -> Result<LightCurve, Error> {
        let script = self
            .records
            .iter()
            .find(|(name, _)| name == candidate.id())
            .map(|(_, s)| *s);
        match script {
            Some(Script::LightCurveDown) => Err(Error::Http("connection reset".into())),
            _ => Ok(points(8)),
        }
    }
}

/// Fits every light curve with at least five points.
pub struct MockEstimator;

#[async_trait]
impl ParameterEstimator for MockEstimator {
    async fn fit(&self, light_curve: &LightCurve) -> Result<FitResult, Error> {
        if light_curve.len() < 5 {
            return Err(Error::InsufficientData(format!("{} points", light_curve.len())));
        }
        FitResult::new(
            FitValues {
                z: 0.05,
                phase: -3.0,
                t0: 60205.0,
                ms: 18.0,
                x1: 0.5,
                c: -0.02,
                chisq: 8.0,
                npoints: light_curve.len(),
            },
            BTreeMap::new(),
        )
    }
}

#[derive(Clone, Default)]
pub struct MockSink {
    pub delivered: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

#[async_trait]
impl NotificationSink for MockSink {
    async fn deliver(&self, text: &str) -> Result<(), Error> {
        if self.fail {
            return Err(Error::Notify("Slack returned 500".into()));
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(text.to_string());
        }
        Ok(())
    }
}
