use anyhow::Result;
use regex::{Captures, Regex};

use crate::biometry::{EyeMeasurement, Keratometry};
use crate::error::{ExtractionError, ExtractionResult};

/// Number capture shared by every field pattern: digits with an optional
/// decimal part. Comma is still accepted in case normalization missed one.
const NUM: &str = r"(\d+(?:[.,]\d+)?)";

/// Axial length, most specific label first.
const AL_PATTERNS: &[&str] = &[
    r"(?i)\bComp\.?\s*AL\b\s*[:=]?\s*{n}",
    r"(?i)\bAxial\s*Length\s*[:=]?\s*{n}",
    r"(?i)\bCompr(?:imento)?\.?\s*Axial\s*[:=]?\s*{n}",
    r"(?i)\bAL\b\s*[:=]?\s*{n}",
];

/// K1/K2 are only ever taken from one pattern capturing both values.
/// First capture is K1, second is K2.
const K_PATTERNS: &[&str] = &[
    r"(?i)\bK1\s*/\s*K2\b\s*[:=]?\s*{n}\s*(?:D\s*)?[/-]\s*{n}",
    r"(?i)\bMV\b\s*[:=]?\s*{n}\s*(?:D\s*)?[/-]\s*{n}",
    r"(?i)\b(?:SimK|Km)\b\s*[:=]?\s*{n}\s*(?:D\s*)?[/-]\s*{n}",
    r"(?is)\bK1\b\s*[:=]?\s*{n}\s*(?:D\b)?.{0,80}?\bK2\b\s*[:=]?\s*{n}",
    r"(?i)\bK\b\s*[:=]?\s*{n}\s*[/-]\s*{n}",
];

/// Anterior chamber depth.
const ACD_PATTERNS: &[&str] = &[
    r"(?i)\bACD(?:\s*opt)?\b\s*[:=]?\s*{n}",
    r"(?i)\bAnterior\s*Chamber\s*Depth\s*[:=]?\s*{n}",
    r"(?i)\bC[âa]mara\s+Anterior[^\n]{0,40}?{n}\s*mm",
    r"(?i)\bProfundidade[^\n]{0,40}?Anterior[^\n\d]{0,40}{n}",
];

/// Common OCR misreads of label tokens, rewritten to the expected label.
/// Each replacement maps a canonical label onto itself, so running the
/// fixes twice changes nothing.
const LABEL_FIXES: &[(&str, &str)] = &[
    (r"(?i)\b(comp)[,.\s]*(al)\b", "${1}. ${2}"),
    (r"\bAC[0O]\b", "ACD"),
    (r"\bK[lI]\b", "K1"),
    (r"\bKZ\b", "K2"),
    (r"(^|[\s(|])0([DSE])\b", "${1}O${2}"),
];

/// An ordered list of patterns for one field. The first pattern that matches
/// wins; later patterns are not tried.
pub struct FieldCascade {
    field: &'static str,
    patterns: Vec<Regex>,
}

impl FieldCascade {
    pub fn new(field: &'static str, templates: &[&str]) -> Result<Self> {
        let patterns = templates
            .iter()
            .map(|t| Regex::new(&t.replace("{n}", NUM)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { field, patterns })
    }

    /// Returns the index of the winning pattern and its captures.
    pub fn first_match<'t>(&self, text: &'t str) -> Option<(usize, Captures<'t>)> {
        self.patterns
            .iter()
            .enumerate()
            .find_map(|(idx, re)| re.captures(text).map(|caps| (idx, caps)))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}

/// Turns one eye's recognized text into an `EyeMeasurement`.
pub struct FieldParser {
    al: FieldCascade,
    keratometry: FieldCascade,
    acd: FieldCascade,
    label_fixes: Vec<(Regex, &'static str)>,
}

impl FieldParser {
    pub fn new() -> Result<Self> {
        let label_fixes = LABEL_FIXES
            .iter()
            .map(|(pattern, replacement)| Ok((Regex::new(pattern)?, *replacement)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            al: FieldCascade::new("AL", AL_PATTERNS)?,
            keratometry: FieldCascade::new("K1/K2", K_PATTERNS)?,
            acd: FieldCascade::new("ACD", ACD_PATTERNS)?,
            label_fixes,
        })
    }

    /// Normalizes OCR text before matching.
    ///
    /// - non-breaking spaces and tabs become plain spaces
    /// - a comma between two digits becomes a decimal point
    /// - known label misreads are rewritten (`AC0` → `ACD`, `0D` → `OD`, ...)
    ///
    /// Well-formed text passes through unchanged and the function is
    /// idempotent.
    pub fn normalize(&self, text: &str) -> String {
        let spaced: String = text
            .chars()
            .map(|c| match c {
                '\u{00A0}' | '\u{202F}' | '\t' => ' ',
                other => other,
            })
            .collect();

        let mut normalized = decimal_commas_to_points(&spaced);
        for (pattern, replacement) in &self.label_fixes {
            if pattern.is_match(&normalized) {
                normalized = pattern.replace_all(&normalized, *replacement).into_owned();
            }
        }
        normalized
    }

    /// Extracts AL, K1/K2 and ACD. Fields with no matching pattern are `None`.
    pub fn parse_eye(&self, text: &str) -> EyeMeasurement {
        let normalized = self.normalize(text);
        EyeMeasurement {
            al: self.parse_single(&self.al, &normalized),
            keratometry: self.parse_keratometry(&normalized),
            acd: self.parse_single(&self.acd, &normalized),
        }
    }

    fn parse_single(&self, cascade: &FieldCascade, text: &str) -> Option<f64> {
        let (idx, caps) = cascade.first_match(text)?;
        log::debug!("{} matched pattern {} of {}", cascade.field, idx + 1, cascade.len());
        capture_number(&caps, 1, cascade.field)
    }

    fn parse_keratometry(&self, text: &str) -> Option<Keratometry> {
        let (idx, caps) = self.keratometry.first_match(text)?;
        log::debug!(
            "K1/K2 matched pattern {} of {}",
            idx + 1,
            self.keratometry.len()
        );
        let k1 = capture_number(&caps, 1, "K1")?;
        let k2 = capture_number(&caps, 2, "K2")?;
        Some(Keratometry { k1, k2 })
    }
}

/// Converts a number written with a decimal comma or point.
pub fn parse_measurement(text: &str) -> ExtractionResult<f64> {
    let cleaned = text.trim().replace(',', ".");
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ExtractionError::NumericConversion {
            text: text.to_string(),
        })
}

/// A capture that does not convert leaves the field absent.
fn capture_number(caps: &Captures<'_>, group: usize, field: &str) -> Option<f64> {
    let raw = caps.get(group)?.as_str();
    match parse_measurement(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("{}: {}", field, e);
            None
        }
    }
}

/// Replaces every comma that sits between two digits with a point.
fn decimal_commas_to_points(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let between_digits = c == ','
                && i > 0
                && chars[i - 1].is_ascii_digit()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if between_digits { '.' } else { c }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FieldParser {
        FieldParser::new().unwrap()
    }

    #[test]
    fn test_parse_measurement() {
        assert_eq!(parse_measurement("23.58").unwrap(), 23.58);
        assert_eq!(parse_measurement("23,58").unwrap(), 23.58);
        assert_eq!(parse_measurement(" 3.15 ").unwrap(), 3.15);
        assert!(matches!(
            parse_measurement("2x.5"),
            Err(ExtractionError::NumericConversion { .. })
        ));
        assert!(parse_measurement("").is_err());
    }

    #[test]
    fn test_comp_al_point_and_comma() {
        let p = parser();
        assert_eq!(p.parse_eye("Comp. AL: 23.58").al, Some(23.58));
        assert_eq!(p.parse_eye("Comp. AL: 23,58").al, Some(23.58));
    }

    #[test]
    fn test_mv_pair_keeps_order() {
        let eye = parser().parse_eye("MV: 43.50/44.10");
        assert_eq!(eye.k1(), Some(43.50));
        assert_eq!(eye.k2(), Some(44.10));
    }

    #[test]
    fn test_k1_k2_synonym_forms() {
        let p = parser();

        let eye = p.parse_eye("K1/K2: 43,50/44,10");
        assert_eq!((eye.k1(), eye.k2()), (Some(43.50), Some(44.10)));

        let eye = p.parse_eye("SimK 42.75 - 43.25");
        assert_eq!((eye.k1(), eye.k2()), (Some(42.75), Some(43.25)));

        let eye = p.parse_eye("K1: 43.50 D @ 12\nK2: 44.10 D @ 102");
        assert_eq!((eye.k1(), eye.k2()), (Some(43.50), Some(44.10)));

        let eye = p.parse_eye("K: 41.00/42.00");
        assert_eq!((eye.k1(), eye.k2()), (Some(41.00), Some(42.00)));
    }

    #[test]
    fn test_single_k_value_is_not_guessed() {
        let eye = parser().parse_eye("K1: 43.50 D\nACD: 3.10");
        assert_eq!(eye.keratometry, None);
        assert_eq!(eye.acd, Some(3.10));
    }

    #[test]
    fn test_unlabeled_text_yields_all_absent() {
        let eye = parser().parse_eye("Instituto de Olhos\n24.05 43.20 44.80 3.15\nPage 1 of 2");
        assert!(eye.is_empty());
    }

    #[test]
    fn test_specific_pattern_wins_over_generic() {
        let eye = parser().parse_eye("AL: 22.00\nComp. AL: 23.58");
        assert_eq!(eye.al, Some(23.58));

        let eye = parser().parse_eye("K: 40.00/41.00\nMV: 43.50/44.10");
        assert_eq!((eye.k1(), eye.k2()), (Some(43.50), Some(44.10)));
    }

    #[test]
    fn test_al_synonyms() {
        let p = parser();
        assert_eq!(p.parse_eye("Axial Length: 24.12 mm").al, Some(24.12));
        assert_eq!(p.parse_eye("Comprimento Axial 23,45 mm").al, Some(23.45));
        assert_eq!(p.parse_eye("AL = 22.9").al, Some(22.9));
    }

    #[test]
    fn test_acd_synonyms() {
        let p = parser();
        assert_eq!(p.parse_eye("ACD: 3.15mm").acd, Some(3.15));
        assert_eq!(p.parse_eye("ACDopt: 3.20").acd, Some(3.20));
        assert_eq!(p.parse_eye("Anterior Chamber Depth 3.10").acd, Some(3.10));
        assert_eq!(p.parse_eye("Câmara Anterior: 3,22 mm").acd, Some(3.22));
        assert_eq!(
            p.parse_eye("Profundidade da câmara anterior: 3.05").acd,
            Some(3.05)
        );
    }

    #[test]
    fn test_ocr_label_misreads_are_corrected() {
        let p = parser();
        assert_eq!(p.parse_eye("Comp, AL: 24,05").al, Some(24.05));
        assert_eq!(p.parse_eye("AC0: 3.15 mm").acd, Some(3.15));

        let eye = p.parse_eye("Kl: 43.5 D\nKZ: 44.1 D");
        assert_eq!((eye.k1(), eye.k2()), (Some(43.5), Some(44.1)));

        assert_eq!(p.normalize("0D  0S"), "OD  OS");
        // A zero that is part of a number is left alone
        assert_eq!(p.normalize("44.0D"), "44.0D");
    }

    #[test]
    fn test_normalize_leaves_well_formed_text_unchanged() {
        let text = "Comp. AL: 24.05\nMV: 43.20/44.80\nACD: 3.15mm\nOD";
        assert_eq!(parser().normalize(text), text);
    }

    #[test]
    fn test_normalize_spaces_and_commas() {
        let p = parser();
        assert_eq!(p.normalize("AL:\u{00A0}23,58"), "AL: 23.58");
        assert_eq!(p.normalize("Smith, John"), "Smith, John");
        assert_eq!(p.normalize("1,2,3"), "1.2.3");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let p = parser();
        let raw = "Comp , AL:\t24,05\nMV: 43,20/44,80\nAC0: 3,15 mm\n0S";
        let once = p.normalize(raw);
        assert_eq!(p.normalize(&once), once);
        assert_eq!(p.parse_eye(&once), p.parse_eye(raw));
    }

    #[test]
    fn test_full_eye_block() {
        let eye = parser().parse_eye("Comp. AL: 24.05\nMV: 43.20/44.80\nACD: 3.15mm");
        assert_eq!(eye.al, Some(24.05));
        assert_eq!(eye.k1(), Some(43.20));
        assert_eq!(eye.k2(), Some(44.80));
        assert_eq!(eye.acd, Some(3.15));
        assert!(eye.is_complete());
    }
}
