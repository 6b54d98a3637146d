//! Language tables shared by the stages.
//!
//! Codes are ISO 639-1. `auto` is only meaningful as a transcription source.

use crate::error::{DubsubError, Result};

/// Marker for provider-side language detection.
pub const AUTO: &str = "auto";

/// Languages the transcription providers accept as a hint.
pub const TRANSCRIPTION_LANGUAGES: [&str; 14] = [
    "ja", "en", "zh", "ko", "es", "de", "it", "pt", "ru", "ar", "hi", "th", "vi", "id",
];

/// Languages the translation stage can target.
pub const TRANSLATION_TARGETS: [&str; 15] = [
    "fr", "en", "es", "de", "it", "pt", "zh", "ja", "ko", "ru", "ar", "hi", "nl", "pl", "tr",
];

/// Languages the voice synthesizers can speak.
pub const SYNTHESIS_LANGUAGES: [&str; 10] =
    ["fr", "en", "ja", "zh", "ko", "de", "es", "it", "pt", "ru"];

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}

pub fn is_auto(code: &str) -> bool {
    normalize_code(code) == AUTO
}

pub fn is_transcription_language(code: &str) -> bool {
    let code = normalize_code(code);
    code == AUTO || TRANSCRIPTION_LANGUAGES.contains(&code.as_str())
}

pub fn is_translation_target(code: &str) -> bool {
    TRANSLATION_TARGETS.contains(&normalize_code(code).as_str())
}

pub fn is_synthesis_language(code: &str) -> bool {
    SYNTHESIS_LANGUAGES.contains(&normalize_code(code).as_str())
}

/// Convert language code to an English name for prompting.
pub fn language_name(code: &str) -> &'static str {
    match normalize_code(code).as_str() {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "id" => "Indonesian",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        _ => "the target language",
    }
}

/// Known codes, used to map provider-reported language names back to codes.
const KNOWN_CODES: [&str; 18] = [
    "en", "es", "fr", "de", "it", "pt", "ru", "ja", "ko", "zh", "ar", "hi", "th", "vi", "id", "nl",
    "pl", "tr",
];

/// Turn a provider-reported language ("Japanese", "ja", "JA") into a code.
pub fn code_from_detected(reported: &str) -> String {
    let reported = reported.trim();
    KNOWN_CODES
        .iter()
        .find(|code| language_name(code).eq_ignore_ascii_case(reported))
        .map(|code| code.to_string())
        .unwrap_or_else(|| normalize_code(reported))
}

/// Check a source/target pair before any stage runs.
pub fn validate_pair(source: &str, target: &str, dub: bool) -> Result<()> {
    if !is_transcription_language(source) {
        return Err(DubsubError::Configuration(format!(
            "Unsupported source language '{}'. Use 'auto' or one of: {}",
            source,
            TRANSCRIPTION_LANGUAGES.join(", ")
        )));
    }
    if is_auto(target) {
        return Err(DubsubError::Configuration(
            "Target language cannot be 'auto'".to_string(),
        ));
    }
    if !is_translation_target(target) {
        return Err(DubsubError::Configuration(format!(
            "Unsupported target language '{}'. Use one of: {}",
            target,
            TRANSLATION_TARGETS.join(", ")
        )));
    }
    if dub && !is_synthesis_language(target) {
        return Err(DubsubError::Configuration(format!(
            "Dubbing is not available for '{}'. Use one of: {}",
            target,
            SYNTHESIS_LANGUAGES.join(", ")
        )));
    }
    Ok(())
}

/// ISO 639-2 code used for container stream metadata.
pub fn iso639_2(code: &str) -> &'static str {
    match normalize_code(code).as_str() {
        "fr" => "fre",
        "en" => "eng",
        "es" => "spa",
        "de" => "ger",
        "it" => "ita",
        "pt" => "por",
        "zh" => "chi",
        "ja" => "jpn",
        "ko" => "kor",
        "ru" => "rus",
        "ar" => "ara",
        "hi" => "hin",
        "nl" => "dut",
        "pl" => "pol",
        "tr" => "tur",
        _ => "und",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_is_source_only() {
        assert!(is_transcription_language("auto"));
        assert!(is_transcription_language(" AUTO "));
        assert!(!is_translation_target("auto"));
    }

    #[test]
    fn test_language_name() {
        assert_eq!(language_name("ja"), "Japanese");
        assert_eq!(language_name("FR"), "French");
        assert_eq!(language_name("xyz"), "the target language");
    }

    #[test]
    fn test_iso639_2() {
        assert_eq!(iso639_2("fr"), "fre");
        assert_eq!(iso639_2("ja"), "jpn");
        assert_eq!(iso639_2("sw"), "und");
    }

    #[test]
    fn test_code_from_detected() {
        assert_eq!(code_from_detected("Japanese"), "ja");
        assert_eq!(code_from_detected("english"), "en");
        assert_eq!(code_from_detected(" FR "), "fr");
        assert_eq!(code_from_detected("swahili"), "swahili");
    }

    #[test]
    fn test_validate_pair() {
        assert!(validate_pair("auto", "fr", true).is_ok());
        assert!(validate_pair("ja", "auto", false).is_err());
        assert!(validate_pair("xx", "fr", false).is_err());
        assert!(validate_pair("ja", "ar", false).is_ok());
        assert!(validate_pair("ja", "ar", true).is_err());
    }

    #[test]
    fn test_synthesis_languages() {
        assert!(is_synthesis_language("fr"));
        assert!(!is_synthesis_language("ar"));
    }
}
