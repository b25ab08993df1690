//! YSE-PZ client.
//!
//! Pulls the "young and fast" explorer query, resolves each listed name
//! against the transient API and downloads photometry on demand. All
//! endpoints use HTTP basic auth.

use std::collections::HashMap;

use async_trait::async_trait;
use common::bandpass::band_key;
use common::config::YseConfig;
use common::{
    body_excerpt, Candidate, CandidateSource, Error, LightCurve, Observation, RawRecord, SourceId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const MAX_MAG_ERR: f64 = 3.0;
const MAX_FLUXCAL: f64 = 1e10;

/// YSE-PZ REST client.
#[derive(Debug, Clone)]
pub struct YseClient {
    client: reqwest::Client,
    cfg: YseConfig,
}

// ── YSE-PZ response types ─────────────────────────────────────────────

/// One row of the explorer query CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerRow {
    pub name: String,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub first_detection: Option<String>,
    #[serde(default)]
    pub latest_detection: Option<String>,
    pub number_of_detection: u32,
    #[serde(default)]
    pub group_name: Option<String>,
}

/// Response from `GET /api/transients/?name=`.
#[derive(Debug, Deserialize)]
pub struct TransientsResponse {
    #[serde(default)]
    pub results: Vec<Transient>,
}

#[derive(Debug, Deserialize)]
pub struct Transient {
    pub name: String,
    pub ra: f64,
    pub dec: f64,
}

/// Parsed `download_photometry` file.
#[derive(Debug, Default)]
pub struct PhotometryFile {
    pub header: HashMap<String, String>,
    pub light_curve: LightCurve,
}

// ── Parsing ───────────────────────────────────────────────────────────

/// Lookup name: `SN 2023abc` and `SN2023abc` both become `2023abc`.
pub fn normalize_name(name: &str) -> String {
    match name.rsplit_once("SN") {
        Some((_, rest)) => rest.trim().to_string(),
        None => name.trim().to_string(),
    }
}

/// Position of `number_of_detection` in an explorer row.
const DETECTIONS_FIELD: usize = 4;

/// Detection count of a raw explorer row; `None` when blank or unparsable.
pub fn detection_count(row: &csv::StringRecord) -> Option<u32> {
    row.get(DETECTIONS_FIELD)?.trim().parse().ok()
}

/// Explorer CSV rows with enough detections, most-detected first.
///
/// The first line of the download is a title row, not the header. Rows
/// stay raw; a row whose count does not parse is filtered out like any
/// other under-observed row, and the remaining fields are decoded per
/// candidate.
pub fn parse_explorer_csv(raw: &str, min_detections: u32) -> Vec<csv::StringRecord> {
    let body = raw.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows: Vec<(u32, csv::StringRecord)> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let row = match record {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping unreadable YSE explorer row {}: {}", line + 2, e);
                continue;
            }
        };
        match detection_count(&row) {
            Some(n) if n >= min_detections => rows.push((n, row)),
            _ => {}
        }
    }

    rows.sort_by(|a, b| b.0.cmp(&a.0));
    rows.into_iter().map(|(_, row)| row).collect()
}

/// Typed view of a raw explorer row.
pub fn decode_explorer_row(fields: &[String]) -> Result<ExplorerRow, Error> {
    csv::StringRecord::from(fields.to_vec())
        .deserialize::<ExplorerRow>(None)
        .map_err(|e| Error::MalformedRecord(format!("YSE-PZ explorer row: {}", e)))
}

/// Parse a photometry download.
///
/// `#KEY: value` lines form the header; the first other line names the
/// whitespace-separated columns.
pub fn parse_photometry(raw: &str) -> Result<PhotometryFile, Error> {
    let mut header = HashMap::new();
    let mut columns: Option<HashMap<String, usize>> = None;
    let mut observations = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(meta) = line.strip_prefix('#') {
            if let Some((key, value)) = meta.split_once(':') {
                header.insert(key.trim().to_string(), value.trim().to_string());
            }
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if columns.is_none() {
            columns = Some(
                tokens
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (name.to_string(), i))
                    .collect(),
            );
            continue;
        }
        let Some(index) = columns.as_ref() else {
            continue;
        };

        if let Some(obs) = row_to_observation(index, &tokens)? {
            observations.push(obs);
        }
    }

    let known_redshift = header
        .get("REDSHIFT")
        .and_then(|z| z.parse::<f64>().ok())
        .filter(|z| z.is_finite());

    Ok(PhotometryFile {
        header,
        light_curve: LightCurve {
            observations,
            known_redshift,
        },
    })
}

fn column<'a>(
    index: &HashMap<String, usize>,
    tokens: &[&'a str],
    name: &str,
) -> Result<Option<&'a str>, Error> {
    let i = index
        .get(name)
        .ok_or_else(|| Error::Csv(format!("photometry table has no {} column", name)))?;
    Ok(tokens.get(*i).copied())
}

fn finite(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn row_to_observation(
    index: &HashMap<String, usize>,
    tokens: &[&str],
) -> Result<Option<Observation>, Error> {
    let mjd = finite(column(index, tokens, "MJD")?);
    let mag = finite(column(index, tokens, "MAG")?);
    let mag_err = finite(column(index, tokens, "MAGERR")?);
    let fluxcal = finite(column(index, tokens, "FLUXCAL")?);
    let flt = column(index, tokens, "FLT")?;
    let instrument = column(index, tokens, "INSTRUMENT")?;

    let (Some(mjd), Some(mag), Some(mag_err), Some(fluxcal), Some(flt), Some(instrument)) =
        (mjd, mag, mag_err, fluxcal, flt, instrument)
    else {
        return Ok(None);
    };

    if flt == "Unknown" || mag_err >= MAX_MAG_ERR || fluxcal >= MAX_FLUXCAL {
        return Ok(None);
    }

    let instrument = if instrument == "HKO" { "ACAM1" } else { instrument };
    Ok(Some(Observation {
        mjd,
        mag,
        mag_err,
        band: band_key(instrument, flt),
    }))
}

// ── Implementation ────────────────────────────────────────────────────

impl YseClient {
    pub fn new(cfg: YseConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("transient-alert/0.1")
            .pool_max_idle_per_host(4)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build YSE HTTP client: {}", e)))?;

        Ok(Self { client, cfg })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    async fn get_text(&self, url: &str, what: &str) -> Result<String, Error> {
        debug!("Fetching YSE-PZ {}: {}", what, url);

        let resp = self
            .client
            .get(url)
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .send()
            .await
            .map_err(|e| Error::Http(format!("YSE-PZ {} request: {}", what, e)))?;

        let status = resp.status().as_u16();
        if status == 404 {
            return Err(Error::NotFound(format!("YSE-PZ {}", what)));
        }
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "YSE-PZ returned {} for {}: {}",
                status,
                what,
                body_excerpt(&body)
            )));
        }

        resp.text()
            .await
            .map_err(|e| Error::Http(format!("YSE-PZ {} body: {}", what, e)))
    }

    /// Raw rows of the saved explorer query.
    pub async fn fetch_explorer_rows(&self) -> Result<Vec<csv::StringRecord>, Error> {
        let url = self.url(&format!("explorer/{}/download", self.cfg.query_id));
        let raw = self.get_text(&url, "explorer query").await?;
        let rows = parse_explorer_csv(&raw, self.cfg.min_detections);
        info!(
            "YSE-PZ explorer query {} returned {} rows with >= {} detections",
            self.cfg.query_id,
            rows.len(),
            self.cfg.min_detections
        );
        Ok(rows)
    }

    /// Resolve a transient by name; `NotFound` when YSE-PZ has no entry.
    pub async fn lookup_transient(&self, name: &str) -> Result<Transient, Error> {
        let url = self.url("api/transients/");
        debug!("Looking up YSE-PZ transient {}", name);

        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .query(&[("name", name)])
            .send()
            .await
            .map_err(|e| Error::Http(format!("HTTP error for {}: {}", name, e)))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "YSE-PZ returned {} for {}: {}",
                status,
                name,
                body_excerpt(&body)
            )));
        }

        let data: TransientsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("JSON parse error for {}: {}", name, e)))?;

        data.results
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("{} not found on YSE-PZ", name)))
    }

    pub async fn fetch_photometry(&self, name: &str) -> Result<PhotometryFile, Error> {
        let url = self.url(&format!("download_photometry/{}/", name));
        let raw = self.get_text(&url, &format!("photometry for {}", name)).await?;
        parse_photometry(&raw)
    }

    fn detail_url(&self, name: &str) -> String {
        self.url(&format!("transient_detail/{}", name))
    }
}

fn row_to_record(row: &csv::StringRecord) -> RawRecord {
    RawRecord {
        source: SourceId::Yse,
        listed_name: row.get(0).unwrap_or_default().trim().to_string(),
        payload: serde_json::Value::from(row.iter().collect::<Vec<&str>>()),
    }
}

#[async_trait]
impl CandidateSource for YseClient {
    fn id(&self) -> SourceId {
        SourceId::Yse
    }

    async fn query(&self) -> Result<Vec<RawRecord>, Error> {
        let rows = self
            .fetch_explorer_rows()
            .await
            .map_err(|e| Error::SourceQuery {
                source_id: SourceId::Yse,
                message: e.to_string(),
            })?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn build_candidate(&self, record: RawRecord) -> Result<Candidate, Error> {
        let fields: Vec<String> = serde_json::from_value(record.payload).map_err(|e| {
            Error::MalformedRecord(format!("YSE-PZ row {}: {}", record.listed_name, e))
        })?;
        let row = decode_explorer_row(&fields)?;
        let name = normalize_name(&row.name);
        if name.is_empty() {
            return Err(Error::MalformedRecord("YSE-PZ row without a name".into()));
        }
        let transient = self.lookup_transient(&name).await?;

        Ok(Candidate::new(
            name.clone(),
            SourceId::Yse,
            transient.ra,
            transient.dec,
            self.detail_url(&name),
        )?
        .with_annotation(row.group_name))
    }

    async fn load_light_curve(&self, candidate: &Candidate) -> Result<LightCurve, Error> {
        let file = self.fetch_photometry(candidate.id()).await?;
        Ok(file.light_curve)
    }
}
