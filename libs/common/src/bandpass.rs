//! Survey filter -> SALT bandpass name lookup.
//!
//! Keys follow the `Instrument - Filter` convention used by YSE-PZ
//! photometry downloads; ZTF-only sources use the ZTF keys directly.

pub const ZTF_G: &str = "ZTF-Cam - g-ZTF";
pub const ZTF_R: &str = "ZTF-Cam - r-ZTF";
pub const ZTF_I: &str = "ZTF-Cam - i-ZTF";

const BANDPASSES: &[(&str, &str)] = &[
    (ZTF_G, "ztfg"),
    (ZTF_R, "ztfr"),
    (ZTF_I, "ztfi"),
    ("GPC1 - g", "ps1::g"),
    ("GPC1 - r", "ps1::r"),
    ("GPC1 - i", "ps1::i"),
    ("GPC1 - z", "ps1::z"),
    ("GPC2 - g", "ps1::g"),
    ("GPC2 - r", "ps1::r"),
    ("GPC2 - i", "ps1::i"),
    ("GPC2 - z", "ps1::z"),
    ("ATLAS - c", "atlasc"),
    ("ATLAS - o", "atlaso"),
    ("ACAM1 - B", "bessellb"),
    ("ACAM1 - V", "bessellv"),
    ("ACAM1 - R", "bessellr"),
    ("Swope - g", "swope2::g"),
    ("Swope - r", "swope2::r"),
    ("Swope - i", "swope2::i"),
];

/// Compose the lookup key for an instrument/filter pair.
pub fn band_key(instrument: &str, filter: &str) -> String {
    format!("{} - {}", instrument.trim(), filter.trim())
}

/// SALT bandpass for a band label, if the filter is supported.
pub fn salt_bandpass(band: &str) -> Option<&'static str> {
    BANDPASSES
        .iter()
        .find(|(key, _)| *key == band)
        .map(|(_, name)| *name)
}

/// Magnitude system for a SALT bandpass.
pub fn zp_system(bandpass: &str) -> &'static str {
    if bandpass.starts_with("bessell") {
        "Vega"
    } else {
        "AB"
    }
}
