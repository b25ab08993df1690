//! ALeRCE ZTF API client.
//!
//! Lists recent objects the light-curve classifier tags as supernovae and
//! fetches their ZTF detections on demand.

use async_trait::async_trait;
use chrono::Utc;
use common::bandpass::{ZTF_G, ZTF_R};
use common::config::AlerceConfig;
use common::time::lookback_window;
use common::{
    body_excerpt, Candidate, CandidateSource, Error, LightCurve, Observation, RawRecord, SourceId,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

const OBJECT_PAGE_URL: &str = "https://alerce.online/object";

/// ALeRCE REST client.
#[derive(Debug, Clone)]
pub struct AlerceClient {
    client: reqwest::Client,
    cfg: AlerceConfig,
}

// ── ALeRCE response types ─────────────────────────────────────────────

/// Response from `GET /objects`.
///
/// Items stay untyped until a candidate is built from them.
#[derive(Debug, Deserialize)]
pub struct ObjectsResponse {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

/// One row of the object listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlerceObject {
    pub oid: String,
    pub meanra: f64,
    pub meandec: f64,
    #[serde(default)]
    pub firstmjd: Option<f64>,
    #[serde(default)]
    pub ndet: Option<u32>,
}

/// One row of `GET /objects/{oid}/detections`.
#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub mjd: f64,
    pub fid: u8,
    #[serde(default)]
    pub magpsf: Option<f64>,
    #[serde(default)]
    pub sigmapsf: Option<f64>,
    #[serde(default)]
    pub has_stamp: bool,
}

// ── Implementation ────────────────────────────────────────────────────

impl AlerceClient {
    pub fn new(cfg: AlerceConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("transient-alert/0.1")
            .pool_max_idle_per_host(4)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build ALeRCE HTTP client: {}", e)))?;

        Ok(Self { client, cfg })
    }

    /// Objects first detected inside the lookback window.
    pub async fn fetch_recent_objects(&self) -> Result<Vec<serde_json::Value>, Error> {
        let (start, end) = lookback_window(Utc::now(), self.cfg.lookback_days);
        let url = format!("{}/objects", self.cfg.base_url.trim_end_matches('/'));
        let query = vec![
            ("classifier", self.cfg.classifier.clone()),
            ("class_name", self.cfg.class_name.clone()),
            ("firstmjd", start.to_string()),
            ("firstmjd", end.to_string()),
            ("page_size", self.cfg.page_size.to_string()),
        ];

        debug!("Fetching ALeRCE objects: {} firstmjd=[{:.3}, {:.3}]", url, start, end);

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Http(format!("ALeRCE objects request: {}", e)))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "ALeRCE returned {} for objects query: {}",
                status,
                body_excerpt(&body)
            )));
        }

        let data: ObjectsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("ALeRCE objects JSON: {}", e)))?;

        debug!(
            "ALeRCE listed {} objects (total={:?})",
            data.items.len(),
            data.total
        );

        Ok(data.items)
    }

    /// All detections for an object.
    pub async fn fetch_detections(&self, oid: &str) -> Result<Vec<Detection>, Error> {
        let url = format!(
            "{}/objects/{}/detections",
            self.cfg.base_url.trim_end_matches('/'),
            oid
        );

        debug!("Fetching ALeRCE detections: {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("HTTP error for {}: {}", oid, e)))?;

        let status = resp.status().as_u16();
        if status == 404 {
            return Err(Error::NotFound(format!("{} has no ALeRCE detections", oid)));
        }
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "ALeRCE returned {} for {}: {}",
                status,
                oid,
                body_excerpt(&body)
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::Http(format!("JSON parse error for {}: {}", oid, e)))
    }
}

fn object_url(oid: &str) -> String {
    format!("{}/{}", OBJECT_PAGE_URL, oid)
}

fn fid_band(fid: u8) -> String {
    match fid {
        1 => ZTF_G.to_string(),
        2 => ZTF_R.to_string(),
        other => format!("ZTF-Cam - fid{}", other),
    }
}

/// Keep real (stamped) detections with a measured magnitude.
fn detections_to_light_curve(detections: &[Detection]) -> LightCurve {
    let observations = detections
        .iter()
        .filter(|d| d.has_stamp)
        .filter_map(|d| {
            let mag = d.magpsf?;
            let mag_err = d.sigmapsf?;
            Some(Observation {
                mjd: d.mjd,
                mag,
                mag_err,
                band: fid_band(d.fid),
            })
        })
        .collect();
    LightCurve::new(observations)
}

fn item_to_record(item: serde_json::Value) -> RawRecord {
    RawRecord {
        source: SourceId::Alerce,
        listed_name: item["oid"].as_str().unwrap_or_default().to_string(),
        payload: item,
    }
}

#[async_trait]
impl CandidateSource for AlerceClient {
    fn id(&self) -> SourceId {
        SourceId::Alerce
    }

    async fn query(&self) -> Result<Vec<RawRecord>, Error> {
        let objects = self
            .fetch_recent_objects()
            .await
            .map_err(|e| Error::SourceQuery {
                source_id: SourceId::Alerce,
                message: e.to_string(),
            })?;
        Ok(objects.into_iter().map(item_to_record).collect())
    }

    async fn build_candidate(&self, record: RawRecord) -> Result<Candidate, Error> {
        let object: AlerceObject = serde_json::from_value(record.payload).map_err(|e| {
            Error::MalformedRecord(format!("ALeRCE row {}: {}", record.listed_name, e))
        })?;
        Candidate::new(
            object.oid.clone(),
            SourceId::Alerce,
            object.meanra,
            object.meandec,
            object_url(&object.oid),
        )
    }

    async fn load_light_curve(&self, candidate: &Candidate) -> Result<LightCurve, Error> {
        let detections = self.fetch_detections(candidate.id()).await?;
        Ok(detections_to_light_curve(&detections))
    }
}
