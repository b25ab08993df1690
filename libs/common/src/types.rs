//! Domain types shared across the pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

// ── Sources ───────────────────────────────────────────────────────────

/// Survey service a candidate was pulled from.
///
/// Declaration order is processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Alerce,
    Antares,
    Yse,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Alerce, SourceId::Antares, SourceId::Yse];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Alerce => "alerce",
            SourceId::Antares => "antares",
            SourceId::Yse => "yse",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "alerce" => Ok(SourceId::Alerce),
            "antares" => Ok(SourceId::Antares),
            "yse" | "yse-pz" => Ok(SourceId::Yse),
            other => Err(Error::Config(format!(
                "unknown source '{}'; expected alerce|antares|yse",
                other
            ))),
        }
    }
}

// ── Photometry ────────────────────────────────────────────────────────

/// A single photometric measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Modified Julian Date.
    pub mjd: f64,
    /// Apparent magnitude.
    pub mag: f64,
    pub mag_err: f64,
    /// Bandpass label as `Instrument - Filter` (see [`crate::bandpass`]).
    pub band: String,
}

/// Observations for one object, in source order (not necessarily sorted).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightCurve {
    pub observations: Vec<Observation>,
    /// Spectroscopic redshift reported by the source, if any.
    #[serde(default)]
    pub known_redshift: Option<f64>,
}

impl LightCurve {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self {
            observations,
            known_redshift: None,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

// ── Candidates ────────────────────────────────────────────────────────

/// A source record before it is resolved into a [`Candidate`].
///
/// `payload` carries the adapter's own row shape; only the adapter that
/// produced it interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: SourceId,
    /// Identifier as listed by the source; may not resolve.
    pub listed_name: String,
    pub payload: serde_json::Value,
}

/// A transient that exists in its source catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    id: String,
    pub source: SourceId,
    pub ra: f64,
    pub dec: f64,
    pub reference_url: String,
    /// `None` until fetched for adapters that load photometry lazily.
    pub light_curve: Option<LightCurve>,
    pub annotation: Option<String>,
    /// The source's own key for the object when it differs from `id`
    /// (an ANTARES locus id for a ZTF-named candidate).
    pub source_key: Option<String>,
}

impl Candidate {
    /// Build a candidate; an empty identifier is rejected.
    pub fn new(
        id: impl Into<String>,
        source: SourceId,
        ra: f64,
        dec: f64,
        reference_url: impl Into<String>,
    ) -> Result<Self, Error> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(Error::MalformedRecord(format!(
                "{} record without an object id",
                source
            )));
        }
        if !ra.is_finite() || !dec.is_finite() {
            return Err(Error::MalformedRecord(format!(
                "{}: non-finite coordinates ({}, {})",
                id, ra, dec
            )));
        }
        Ok(Self {
            id,
            source,
            ra,
            dec,
            reference_url: reference_url.into(),
            light_curve: None,
            annotation: None,
            source_key: None,
        })
    }

    pub fn with_light_curve(mut self, light_curve: LightCurve) -> Self {
        self.light_curve = Some(light_curve);
        self
    }

    pub fn with_annotation(mut self, annotation: Option<String>) -> Self {
        self.annotation = annotation.filter(|a| !a.trim().is_empty());
        self
    }

    pub fn with_source_key(mut self, key: impl Into<String>) -> Self {
        self.source_key = Some(key.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

// ── Fit results ───────────────────────────────────────────────────────

/// Raw values handed to [`FitResult::new`].
#[derive(Debug, Clone, Default)]
pub struct FitValues {
    pub z: f64,
    /// Days since model peak (negative before peak).
    pub phase: f64,
    pub t0: f64,
    /// Peak rest-frame B magnitude derived from x0.
    pub ms: f64,
    pub x1: f64,
    pub c: f64,
    pub chisq: f64,
    pub npoints: usize,
}

/// Best-fit light-curve parameters for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitResult {
    z: f64,
    phase: f64,
    t0: f64,
    ms: f64,
    x1: f64,
    c: f64,
    chisq: f64,
    npoints: usize,
    errors: BTreeMap<String, f64>,
}

impl FitResult {
    /// Validates that every headline value is finite.
    pub fn new(values: FitValues, errors: BTreeMap<String, f64>) -> Result<Self, Error> {
        let named = [
            ("z", values.z),
            ("phase", values.phase),
            ("t0", values.t0),
            ("ms", values.ms),
            ("x1", values.x1),
            ("c", values.c),
            ("chisq", values.chisq),
        ];
        if let Some((name, value)) = named.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::NonConvergence(format!("{} = {}", name, value)));
        }

        Ok(Self {
            z: values.z,
            phase: values.phase,
            t0: values.t0,
            ms: values.ms,
            x1: values.x1,
            c: values.c,
            chisq: values.chisq,
            npoints: values.npoints,
            errors,
        })
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn ms(&self) -> f64 {
        self.ms
    }

    pub fn x1(&self) -> f64 {
        self.x1
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn chisq(&self) -> f64 {
        self.chisq
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    /// Uncertainty for a fitted parameter, e.g. `error("x1")`.
    pub fn error(&self, param: &str) -> Option<f64> {
        self.errors.get(param).copied()
    }

    /// Flat name -> value view, uncertainties suffixed with `_err`.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        map.insert("chisq".to_string(), self.chisq);
        map.insert("phase".to_string(), self.phase);
        map.insert("z".to_string(), self.z);
        map.insert("t0".to_string(), self.t0);
        map.insert("ms".to_string(), self.ms);
        map.insert("x1".to_string(), self.x1);
        map.insert("c".to_string(), self.c);
        map.insert("npoints".to_string(), self.npoints as f64);
        for (name, err) in &self.errors {
            map.insert(format!("{}_err", name), *err);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_parse_and_order() {
        assert_eq!("ANTARES".parse::<SourceId>().unwrap(), SourceId::Antares);
        assert_eq!(" yse ".parse::<SourceId>().unwrap(), SourceId::Yse);
        assert!("ztf".parse::<SourceId>().is_err());
        assert!(SourceId::Alerce < SourceId::Antares && SourceId::Antares < SourceId::Yse);
    }

    #[test]
    fn test_candidate_rejects_empty_id() {
        let err = Candidate::new("  ", SourceId::Alerce, 10.0, 5.0, "https://x").unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(_)));
    }

    #[test]
    fn test_candidate_drops_blank_annotation() {
        let cand = Candidate::new("ZTF23aaaaaaa", SourceId::Alerce, 10.0, 5.0, "https://x")
            .unwrap()
            .with_annotation(Some("   ".into()));
        assert_eq!(cand.annotation, None);
        assert_eq!(cand.id(), "ZTF23aaaaaaa");
    }

    #[test]
    fn test_fit_result_rejects_nan() {
        let values = FitValues {
            z: f64::NAN,
            ..FitValues::default()
        };
        assert!(matches!(
            FitResult::new(values, BTreeMap::new()),
            Err(Error::NonConvergence(_))
        ));
    }

    #[test]
    fn test_fit_result_map_names() {
        let mut errors = BTreeMap::new();
        errors.insert("x1".to_string(), 0.3);
        let fit = FitResult::new(
            FitValues {
                z: 0.05,
                phase: -3.0,
                t0: 60200.0,
                ms: 18.2,
                x1: 0.5,
                c: -0.02,
                chisq: 12.5,
                npoints: 14,
            },
            errors,
        )
        .unwrap();

        let map = fit.to_map();
        assert_eq!(map.get("npoints"), Some(&14.0));
        assert_eq!(map.get("x1_err"), Some(&0.3));
        assert_eq!(fit.error("x1"), Some(0.3));
        assert_eq!(map.len(), 9);
    }
}
