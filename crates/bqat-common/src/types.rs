//! Common types used across BQAT

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::BqatError;

/// Image formats searched when no explicit type list is given
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["wsq", "jpg", "jpeg", "png", "bmp", "jp2"];

/// Biometric sample category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Face,
    Finger,
    Iris,
    Speech,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Face => "face",
            Modality::Finger => "finger",
            Modality::Iris => "iris",
            Modality::Speech => "speech",
        }
    }

    /// Extensions searched by default for this modality
    pub fn default_extensions(self) -> Vec<String> {
        self.resolve_extensions(&[])
    }

    /// Resolve the effective extension list from a user supplied one.
    ///
    /// Speech always searches `wav`. WSQ is a fingerprint-only format and is
    /// dropped for the other image modalities.
    pub fn resolve_extensions(self, requested: &[String]) -> Vec<String> {
        if self == Modality::Speech {
            return vec!["wav".to_string()];
        }

        let base: Vec<String> = if requested.is_empty() {
            DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
        } else {
            requested
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect()
        };

        base.into_iter()
            .filter(|ext| self == Modality::Finger || ext != "wsq")
            .collect()
    }
}

impl std::str::FromStr for Modality {
    type Err = BqatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "face" => Ok(Modality::Face),
            "finger" | "fingerprint" => Ok(Modality::Finger),
            "iris" => Ok(Modality::Iris),
            "speech" => Ok(Modality::Speech),
            other => Err(BqatError::UnsupportedModality(other.to_string())),
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp used in artifact file names, e.g. `7-3-2024_9-5-41`.
///
/// Fields are not zero padded.
pub fn artifact_timestamp(at: &DateTime<Local>) -> String {
    format!(
        "{}-{}-{}_{}-{}-{}",
        at.day(),
        at.month(),
        at.year(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_modality_from_str() {
        assert_eq!("FACE".parse::<Modality>().unwrap(), Modality::Face);
        assert_eq!("fingerprint".parse::<Modality>().unwrap(), Modality::Finger);
        assert_eq!("finger".parse::<Modality>().unwrap(), Modality::Finger);
        assert_eq!("Iris".parse::<Modality>().unwrap(), Modality::Iris);
        assert_eq!("speech".parse::<Modality>().unwrap(), Modality::Speech);
        assert!("palm".parse::<Modality>().is_err());
    }

    #[test]
    fn test_wsq_only_for_fingerprint() {
        assert!(Modality::Finger
            .default_extensions()
            .contains(&"wsq".to_string()));
        assert!(!Modality::Face.default_extensions().contains(&"wsq".to_string()));
        assert!(!Modality::Iris.default_extensions().contains(&"wsq".to_string()));
    }

    #[test]
    fn test_speech_always_wav() {
        let requested = vec!["png".to_string()];
        assert_eq!(Modality::Speech.resolve_extensions(&requested), vec!["wav"]);
    }

    #[test]
    fn test_requested_extensions_normalized() {
        let requested = vec![".PNG".to_string(), " jpg".to_string(), "".to_string()];
        assert_eq!(
            Modality::Face.resolve_extensions(&requested),
            vec!["png", "jpg"]
        );
    }

    #[test]
    fn test_artifact_timestamp_unpadded() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 41).unwrap();
        assert_eq!(artifact_timestamp(&at), "7-3-2024_9-5-41");
    }
}
