//! Slack digest lines.

use common::{Candidate, FitResult};

pub const PROVENANCE: &str = "Found using automation";

/// Whole days, truncated toward zero; `+` marks a positive phase.
pub fn format_phase(phase: f64) -> String {
    let whole = phase.trunc() as i64;
    if phase > 0.0 {
        format!("+{}", whole)
    } else {
        whole.to_string()
    }
}

/// One mrkdwn line: linked name, fit summary, position, optional note.
pub fn format_line(candidate: &Candidate, fit: &FitResult, note: Option<&str>) -> String {
    let mut line = format!(
        "<{}|{}> z = {:.3}, t = {}, x1 = {:.1}, c = {:.2}, ra, dec = {:.3}, {:.3}",
        candidate.reference_url,
        candidate.id(),
        fit.z(),
        format_phase(fit.phase()),
        fit.x1(),
        fit.c(),
        candidate.ra,
        candidate.dec,
    );
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        line.push_str("; ");
        line.push_str(note);
    }
    line.push_str("; ");
    line.push_str(PROVENANCE);
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{FitValues, SourceId};
    use std::collections::BTreeMap;

    fn fit(phase: f64) -> FitResult {
        FitResult::new(
            FitValues {
                z: 0.05,
                phase,
                t0: 60200.0,
                ms: 18.1,
                x1: 0.5,
                c: -0.02,
                chisq: 10.0,
                npoints: 12,
            },
            BTreeMap::new(),
        )
        .unwrap()
    }

    fn candidate() -> Candidate {
        Candidate::new(
            "SN2023abc",
            SourceId::Yse,
            150.123,
            20.456,
            "https://ziggy.ucolick.org/yse/transient_detail/2023abc",
        )
        .unwrap()
    }

    #[test]
    fn test_line_layout() {
        let line = format_line(&candidate(), &fit(-3.0), None);
        assert!(line.contains("z = 0.050, t = -3, x1 = 0.5, c = -0.02, ra, dec = 150.123, 20.456"));
        assert_eq!(
            line,
            "<https://ziggy.ucolick.org/yse/transient_detail/2023abc|SN2023abc> \
             z = 0.050, t = -3, x1 = 0.5, c = -0.02, ra, dec = 150.123, 20.456; \
             Found using automation"
        );
    }

    #[test]
    fn test_note_precedes_provenance() {
        let line = format_line(&candidate(), &fit(4.7), Some("TNS 2023abc"));
        assert!(line.ends_with("20.456; TNS 2023abc; Found using automation"));
        assert!(line.contains("t = +4,"));

        let blank = format_line(&candidate(), &fit(4.7), Some("  "));
        assert!(blank.ends_with("20.456; Found using automation"));
    }

    #[test]
    fn test_phase_sign() {
        assert_eq!(format_phase(-3.0), "-3");
        assert_eq!(format_phase(-3.9), "-3");
        assert_eq!(format_phase(12.2), "+12");
        assert_eq!(format_phase(0.0), "0");
        assert_eq!(format_phase(-0.4), "0");
        assert_eq!(format_phase(0.4), "+0");
    }

    #[test]
    fn test_deterministic() {
        let a = format_line(&candidate(), &fit(-3.0), Some("YSE"));
        let b = format_line(&candidate(), &fit(-3.0), Some("YSE"));
        assert_eq!(a, b);
    }
}
