//! ANTARES broker client.
//!
//! Searches loci with recent alerts and a bounded number of magnitude
//! measurements. Loci carry their light curve, so candidates come back
//! with photometry attached.

use async_trait::async_trait;
use chrono::Utc;
use common::bandpass::{ZTF_G, ZTF_R};
use common::config::AntaresConfig;
use common::time::lookback_window;
use common::{
    body_excerpt, Candidate, CandidateSource, Error, LightCurve, Observation, RawRecord, SourceId,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

const LOCUS_PAGE_URL: &str = "https://antares.noirlab.edu/loci";
const TNS_CATALOG: &str = "tns_public_objects";

/// ANTARES REST client.
#[derive(Debug, Clone)]
pub struct AntaresClient {
    client: reqwest::Client,
    cfg: AntaresConfig,
}

// ── ANTARES response types ────────────────────────────────────────────

/// JSON:API page from `GET /loci`.
///
/// Loci are decoded one by one when candidates are built.
#[derive(Debug, Deserialize)]
pub struct LociResponse {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    #[serde(default)]
    pub links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

/// Single-locus response from `GET /loci/{id}`.
#[derive(Debug, Deserialize)]
pub struct LocusDetailResponse {
    pub data: LocusResource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocusResource {
    pub id: String,
    pub attributes: LocusAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocusAttributes {
    pub ra: f64,
    pub dec: f64,
    #[serde(default)]
    pub properties: LocusProperties,
    #[serde(default)]
    pub catalogs: Vec<String>,
    /// `catalog name -> matched objects`.
    #[serde(default)]
    pub catalog_objects: Option<serde_json::Map<String, serde_json::Value>>,
    /// Alert history as CSV text.
    #[serde(default)]
    pub lightcurve: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocusProperties {
    #[serde(default)]
    pub ztf_object_id: Option<String>,
    #[serde(default)]
    pub num_mag_values: Option<u32>,
    #[serde(default)]
    pub oldest_alert_observation_time: Option<f64>,
}

/// One alert row of a locus light curve.
#[derive(Debug, Deserialize)]
struct AlertRow {
    ant_mjd: Option<f64>,
    #[serde(default)]
    ant_mag: Option<f64>,
    #[serde(default)]
    ant_magerr: Option<f64>,
    #[serde(default)]
    ant_passband: Option<String>,
}

// ── Implementation ────────────────────────────────────────────────────

impl AntaresClient {
    pub fn new(cfg: AntaresConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("transient-alert/0.1")
            .pool_max_idle_per_host(4)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build ANTARES HTTP client: {}", e)))?;

        Ok(Self { client, cfg })
    }

    /// Elasticsearch filter for fresh loci with a usable number of points.
    pub fn search_filter(&self, oldest_alert_mjd: f64) -> serde_json::Value {
        json!({
            "query": {
                "bool": {
                    "filter": [
                        {"range": {"properties.num_mag_values": {
                            "gte": self.cfg.min_points,
                            "lte": self.cfg.max_points
                        }}},
                        {"range": {"properties.oldest_alert_observation_time": {
                            "gte": oldest_alert_mjd
                        }}}
                    ]
                }
            }
        })
    }

    /// Loci matching the freshness filter, at most `max_candidates`.
    pub async fn search_loci(&self) -> Result<Vec<serde_json::Value>, Error> {
        let (start, _) = lookback_window(Utc::now(), self.cfg.lookback_days);
        let filter = self.search_filter(start).to_string();
        let limit = self.cfg.max_candidates.max(1);

        let mut collected: Vec<serde_json::Value> = Vec::new();
        let mut next_url: Option<String> = None;

        while collected.len() < limit {
            let request = match &next_url {
                Some(url) => self.client.get(url),
                None => self
                    .client
                    .get(format!("{}/loci", self.cfg.base_url.trim_end_matches('/')))
                    .query(&[
                        ("elasticsearch_query[locus_listing]", filter.clone()),
                        ("page[limit]", limit.to_string()),
                    ]),
            };

            debug!(
                "Fetching ANTARES loci page: next_present={} collected={}",
                next_url.is_some(),
                collected.len()
            );

            let resp = request
                .send()
                .await
                .map_err(|e| Error::Http(format!("ANTARES loci request: {}", e)))?;

            let status = resp.status().as_u16();
            if status != 200 {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Http(format!(
                    "ANTARES returned {} for loci search: {}",
                    status,
                    body_excerpt(&body)
                )));
            }

            let page: LociResponse = resp
                .json()
                .await
                .map_err(|e| Error::Http(format!("ANTARES loci JSON: {}", e)))?;

            if page.data.is_empty() {
                break;
            }
            collected.extend(page.data);
            next_url = page.links.and_then(|l| l.next);
            if next_url.is_none() {
                break;
            }
        }

        collected.truncate(limit);
        Ok(collected)
    }

    pub async fn fetch_locus(&self, locus_id: &str) -> Result<LocusResource, Error> {
        let url = format!(
            "{}/loci/{}",
            self.cfg.base_url.trim_end_matches('/'),
            locus_id
        );
        debug!("Fetching ANTARES locus: {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("HTTP error for {}: {}", locus_id, e)))?;

        let status = resp.status().as_u16();
        if status == 404 {
            return Err(Error::NotFound(format!("locus {}", locus_id)));
        }
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "ANTARES returned {} for {}: {}",
                status,
                locus_id,
                body_excerpt(&body)
            )));
        }

        let detail: LocusDetailResponse = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("JSON parse error for {}: {}", locus_id, e)))?;
        Ok(detail.data)
    }
}

fn passband_label(passband: &str) -> String {
    match passband {
        "g" => ZTF_G.to_string(),
        "R" => ZTF_R.to_string(),
        other => format!("ZTF-Cam - {}", other),
    }
}

/// Parse the locus CSV; rows missing any of time, magnitude, error or
/// passband are dropped.
fn parse_lightcurve_csv(raw: &str) -> Result<LightCurve, Error> {
    let mut reader = csv::Reader::from_reader(raw.as_bytes());
    let mut observations = Vec::new();

    for row in reader.deserialize::<AlertRow>() {
        let row = row.map_err(|e| Error::Csv(e.to_string()))?;
        let (Some(mjd), Some(mag), Some(mag_err), Some(passband)) =
            (row.ant_mjd, row.ant_mag, row.ant_magerr, row.ant_passband)
        else {
            continue;
        };
        observations.push(Observation {
            mjd,
            mag,
            mag_err,
            band: passband_label(passband.trim()),
        });
    }

    Ok(LightCurve::new(observations))
}

/// First TNS designation matched to the locus, if any.
fn tns_name(attributes: &LocusAttributes) -> Option<String> {
    if !attributes.catalogs.iter().any(|c| c == TNS_CATALOG) {
        return None;
    }
    attributes
        .catalog_objects
        .as_ref()?
        .get(TNS_CATALOG)?
        .as_array()?
        .first()?
        .get("name")?
        .as_str()
        .map(|name| format!("TNS {}", name))
}

fn locus_to_candidate(locus: &LocusResource) -> Result<Candidate, Error> {
    let ztf_id = locus
        .attributes
        .properties
        .ztf_object_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::NotFound(format!("locus {} has no ZTF object id", locus.id)))?;

    let mut candidate = Candidate::new(
        ztf_id,
        SourceId::Antares,
        locus.attributes.ra,
        locus.attributes.dec,
        format!("{}/{}", LOCUS_PAGE_URL, locus.id),
    )?
    .with_annotation(tns_name(&locus.attributes))
    .with_source_key(locus.id.clone());

    if let Some(raw) = &locus.attributes.lightcurve {
        candidate = candidate.with_light_curve(parse_lightcurve_csv(raw)?);
    }
    Ok(candidate)
}

fn item_to_record(item: serde_json::Value) -> RawRecord {
    RawRecord {
        source: SourceId::Antares,
        listed_name: item["id"].as_str().unwrap_or_default().to_string(),
        payload: item,
    }
}

fn decode_locus(record: RawRecord) -> Result<LocusResource, Error> {
    serde_json::from_value(record.payload).map_err(|e| {
        Error::MalformedRecord(format!("ANTARES locus {}: {}", record.listed_name, e))
    })
}

#[async_trait]
impl CandidateSource for AntaresClient {
    fn id(&self) -> SourceId {
        SourceId::Antares
    }

    fn max_candidates(&self) -> Option<usize> {
        Some(self.cfg.max_candidates)
    }

    async fn query(&self) -> Result<Vec<RawRecord>, Error> {
        let loci = self.search_loci().await.map_err(|e| Error::SourceQuery {
            source_id: SourceId::Antares,
            message: e.to_string(),
        })?;

        Ok(loci.into_iter().map(item_to_record).collect())
    }

    async fn build_candidate(&self, record: RawRecord) -> Result<Candidate, Error> {
        locus_to_candidate(&decode_locus(record)?)
    }

    async fn load_light_curve(&self, candidate: &Candidate) -> Result<LightCurve, Error> {
        if let Some(lc) = &candidate.light_curve {
            return Ok(lc.clone());
        }
        // Listing omitted the alert history; the detail view carries it.
        let locus_id = candidate.source_key.as_deref().ok_or_else(|| {
            Error::MalformedRecord(format!("{} has no ANTARES locus id", candidate.id()))
        })?;
        let locus = self.fetch_locus(locus_id).await?;
        match locus.attributes.lightcurve {
            Some(raw) => parse_lightcurve_csv(&raw),
            None => {
                warn!("Locus {} returned no light curve", locus_id);
                Ok(LightCurve::default())
            }
        }
    }
}
