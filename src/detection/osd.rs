//! Parsing of the Tesseract OSD report.
//!
//! With `--psm 0` the engine prints one `Key: value` pair per line:
//!
//! ```text
//! Page number: 0
//! Orientation in degrees: 270
//! Rotate: 90
//! Orientation confidence: 21.27
//! Script: Latin
//! Script confidence: 4.14
//! ```

use serde_json::{Map, Number, Value};

use crate::error::DetectError;
use crate::models::{
    DetectionResult, ORIENTATION_CONFIDENCE, ORIENTATION_DEGREES, SCRIPT, SCRIPT_CONFIDENCE,
};

const KNOWN_KEYS: &[(&str, &str)] = &[
    ("Page number", "page_number"),
    ("Orientation in degrees", ORIENTATION_DEGREES),
    ("Rotate", "rotate"),
    ("Orientation confidence", ORIENTATION_CONFIDENCE),
    ("Script", SCRIPT),
    ("Script confidence", SCRIPT_CONFIDENCE),
];

/// Marker the engine prints when an image has too little text for OSD
const TOO_FEW_CHARACTERS: &str = "Too few characters";

/// Parse an OSD report into a detection result.
///
/// Unknown keys are kept under a snake_case name. Diagnostic lines
/// (`Warning: ...`, `Error: ...`) are ignored.
pub fn parse_report(report: &str) -> Result<DetectionResult, DetectError> {
    let mut fields = Map::new();
    let mut recognised = false;

    for line in report.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() || is_diagnostic(key) {
            continue;
        }

        let name = match KNOWN_KEYS.iter().find(|(label, _)| label.eq_ignore_ascii_case(key)) {
            Some((_, name)) => {
                recognised = true;
                name.to_string()
            }
            None => snake_case(key),
        };
        fields.insert(name, parse_value(value));
    }

    if !recognised {
        return Err(DetectError::Engine(format!(
            "unrecognised OSD report: {:?}",
            report.trim()
        )));
    }

    Ok(DetectionResult::new(fields))
}

/// Whether the engine gave up because the image holds too little text
pub fn is_too_few_characters(stderr: &str) -> bool {
    stderr.contains(TOO_FEW_CHARACTERS)
}

fn is_diagnostic(key: &str) -> bool {
    ["warning", "error"]
        .iter()
        .any(|prefix| key.to_ascii_lowercase().starts_with(prefix))
}

fn parse_value(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REPORT: &str = "Page number: 0\n\
                          Orientation in degrees: 270\n\
                          Rotate: 90\n\
                          Orientation confidence: 21.27\n\
                          Script: Latin\n\
                          Script confidence: 4.14\n";

    #[test]
    fn test_parse_full_report() {
        let result = parse_report(REPORT).unwrap();

        assert_eq!(result.get("orientation_degrees"), Some(&json!(270)));
        assert_eq!(result.get("orientation_confidence"), Some(&json!(21.27)));
        assert_eq!(result.get("rotate"), Some(&json!(90)));
        assert_eq!(result.get("script"), Some(&json!("Latin")));
        assert_eq!(result.get("script_confidence"), Some(&json!(4.14)));
        assert_eq!(result.get("page_number"), Some(&json!(0)));
        assert!(result.text_detected());
    }

    #[test]
    fn test_unknown_keys_are_kept() {
        let result = parse_report("Orientation in degrees: 0\nScript Id (beta): 7\n").unwrap();
        assert_eq!(result.get("script_id_beta"), Some(&json!(7)));
    }

    #[test]
    fn test_diagnostics_and_noise_are_skipped() {
        let report = "Warning: Invalid resolution 0 dpi. Using 70 instead.\n\
                      Estimating resolution as 179\n\
                      Orientation in degrees: 180\n\
                      Orientation confidence: 3.5\n";
        let result = parse_report(report).unwrap();

        assert_eq!(result.fields().len(), 2);
        assert_eq!(result.orientation_degrees(), Some(180.0));
    }

    #[test]
    fn test_unrecognised_report_is_an_engine_error() {
        assert!(matches!(parse_report(""), Err(DetectError::Engine(_))));
        assert!(matches!(
            parse_report("Tesseract Open Source OCR Engine v5.3.0"),
            Err(DetectError::Engine(_))
        ));
    }

    #[test]
    fn test_too_few_characters_marker() {
        assert!(is_too_few_characters(
            "Too few characters. Skipping this page\nError during processing.\n"
        ));
        assert!(!is_too_few_characters("Error opening data file osd.traineddata"));
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Orientation in degrees"), "orientation_in_degrees");
        assert_eq!(snake_case("  Weird--Key  "), "weird_key");
    }
}
