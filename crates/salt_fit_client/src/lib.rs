//! SALT3 light-curve fitting through a remote fit service.
//!
//! [`prepare`] turns survey photometry into the flux table the service
//! fits; [`SaltFitClient`] posts it and converts the reply into a
//! [`FitResult`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use common::bandpass::{salt_bandpass, zp_system};
use common::config::FitterConfig;
use common::time::now_mjd;
use common::{body_excerpt, Error, FitResult, FitValues, LightCurve, ParameterEstimator};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Zero point shared by every flux point.
pub const ZERO_POINT: f64 = 27.5;
/// Rest-frame B magnitude offset for `x0`.
const MB_OFFSET: f64 = 10.635;
/// Half-width of the `t0` search window around the brightest point.
const T0_WINDOW_DAYS: f64 = 10.0;

const Z_BOUNDS: [f64; 2] = [0.0, 0.7];
const X1_BOUNDS: [f64; 2] = [-3.0, 3.0];
const C_BOUNDS: [f64; 2] = [-0.3, 0.3];

// ── Request/response wire types ───────────────────────────────────────

/// Photometry table in the fitter's column layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhotometryTable {
    pub time: Vec<f64>,
    pub band: Vec<String>,
    pub flux: Vec<f64>,
    pub fluxerr: Vec<f64>,
    pub zp: Vec<f64>,
    pub zpsys: Vec<String>,
}

impl PhotometryTable {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Body of `POST {fitter.url}`.
#[derive(Debug, Clone, Serialize)]
pub struct FitRequest {
    pub model: String,
    pub data: PhotometryTable,
    /// Parameters left free.
    pub vparam_names: Vec<String>,
    pub bounds: BTreeMap<String, [f64; 2]>,
    /// Parameters pinned before fitting.
    pub fixed: BTreeMap<String, f64>,
}

/// Fitter reply.
#[derive(Debug, Deserialize)]
pub struct FitResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub chisq: Option<f64>,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<f64>,
    #[serde(default)]
    pub errors: BTreeMap<String, f64>,
}

// ── Preparation ───────────────────────────────────────────────────────

/// Build a fit request from a light curve.
///
/// Unmapped bands and non-finite rows are dropped; fewer than
/// `min_points` survivors is `InsufficientData`.
pub fn prepare(light_curve: &LightCurve, min_points: usize) -> Result<FitRequest, Error> {
    let mut data = PhotometryTable::default();
    let mut brightest: Option<(f64, f64)> = None;

    for obs in &light_curve.observations {
        let Some(bandpass) = salt_bandpass(&obs.band) else {
            continue;
        };
        if !(obs.mjd.is_finite() && obs.mag.is_finite() && obs.mag_err.is_finite()) {
            continue;
        }

        let flux = 10f64.powf(-0.4 * (obs.mag - ZERO_POINT));
        let fluxerr = flux * obs.mag_err * 0.4 * std::f64::consts::LN_10;

        if brightest.map_or(true, |(_, best)| flux > best) {
            brightest = Some((obs.mjd, flux));
        }

        data.time.push(obs.mjd);
        data.band.push(bandpass.to_string());
        data.flux.push(flux);
        data.fluxerr.push(fluxerr);
        data.zp.push(ZERO_POINT);
        data.zpsys.push(zp_system(bandpass).to_string());
    }

    let peak_mjd = match brightest {
        Some((mjd, _)) if data.len() >= min_points => mjd,
        _ => {
            return Err(Error::InsufficientData(format!(
                "{} usable points of {}, need {}",
                data.len(),
                light_curve.len(),
                min_points
            )))
        }
    };

    let mut bounds = BTreeMap::new();
    bounds.insert(
        "t0".to_string(),
        [peak_mjd - T0_WINDOW_DAYS, peak_mjd + T0_WINDOW_DAYS],
    );
    bounds.insert("x1".to_string(), X1_BOUNDS);
    bounds.insert("c".to_string(), C_BOUNDS);

    let mut fixed = BTreeMap::new();
    let mut vparam_names = Vec::new();
    match light_curve.known_redshift {
        Some(z) => {
            fixed.insert("z".to_string(), z);
        }
        None => {
            vparam_names.push("z".to_string());
            bounds.insert("z".to_string(), Z_BOUNDS);
        }
    }
    vparam_names.extend(["t0", "x0", "x1", "c"].map(String::from));

    Ok(FitRequest {
        model: "salt3".to_string(),
        data,
        vparam_names,
        bounds,
        fixed,
    })
}

/// Convert a fitter reply into a [`FitResult`] evaluated at `now_mjd`.
pub fn to_fit_result(
    request: &FitRequest,
    response: FitResponse,
    now_mjd: f64,
) -> Result<FitResult, Error> {
    if !response.success {
        return Err(Error::NonConvergence(if response.message.is_empty() {
            "fit reported failure".to_string()
        } else {
            response.message
        }));
    }
    if response.param_names.len() != response.parameters.len() {
        return Err(Error::FitService(format!(
            "{} parameter names but {} values",
            response.param_names.len(),
            response.parameters.len()
        )));
    }

    let params: BTreeMap<&str, f64> = response
        .param_names
        .iter()
        .map(String::as_str)
        .zip(response.parameters.iter().copied())
        .collect();
    let param = |name: &str| -> Result<f64, Error> {
        params
            .get(name)
            .copied()
            .or_else(|| request.fixed.get(name).copied())
            .ok_or_else(|| Error::FitService(format!("reply has no {} parameter", name)))
    };

    let x0 = param("x0")?;
    if !x0.is_finite() || x0 <= 0.0 {
        return Err(Error::NonConvergence(format!("x0 = {}", x0)));
    }
    let t0 = param("t0")?;

    FitResult::new(
        FitValues {
            z: param("z")?,
            phase: now_mjd - t0,
            t0,
            ms: MB_OFFSET - 2.5 * x0.log10(),
            x1: param("x1")?,
            c: param("c")?,
            chisq: response.chisq.unwrap_or(f64::NAN),
            npoints: request.data.len(),
        },
        response.errors,
    )
}

// ── Client ────────────────────────────────────────────────────────────

/// HTTP client for the fit service.
#[derive(Debug, Clone)]
pub struct SaltFitClient {
    client: reqwest::Client,
    cfg: FitterConfig,
}

impl SaltFitClient {
    pub fn new(cfg: FitterConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("transient-alert/0.1")
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Config(format!("failed to build fit-service HTTP client: {}", e)))?;

        Ok(Self { client, cfg })
    }

    async fn submit(&self, request: &FitRequest) -> Result<FitResponse, Error> {
        debug!(
            "Posting {} points to fit service {} (free: {})",
            request.data.len(),
            self.cfg.url,
            request.vparam_names.join(",")
        );

        let resp = self
            .client
            .post(&self.cfg.url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::FitService(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::FitService(format!(
                "fit service returned {}: {}",
                status.as_u16(),
                body_excerpt(&body)
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::FitService(format!("invalid reply: {}", e)))
    }
}

#[async_trait]
impl ParameterEstimator for SaltFitClient {
    async fn fit(&self, light_curve: &LightCurve) -> Result<FitResult, Error> {
        let request = prepare(light_curve, self.cfg.min_points)?;
        let response = self.submit(&request).await?;
        let result = to_fit_result(&request, response, now_mjd());
        if let Err(e) = &result {
            warn!("SALT3 fit rejected: {}", e);
        }
        result
    }
}
