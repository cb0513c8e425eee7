use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Labels the deployed model knows about
pub const DISEASE_LABELS: [&str; 8] = [
    "Anthracnose",
    "Bacterial Canker",
    "Cutting Weevil",
    "Die Back",
    "Gall Midge",
    "Healthy",
    "Powdery Mildew",
    "Sooty Mould",
];

/// One capture or upload in the history list
///
/// Serialized through [`StoredRecord`] so the on-disk shape stays
/// `{id, uri, timestamp, disease?, confidence?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredRecord", into = "StoredRecord")]
pub struct CaptureRecord {
    pub id: String,
    /// Opaque reference to the image, never opened by the store
    pub locator: String,
    /// Epoch milliseconds, fixed at creation
    pub created_at: i64,
    pub analysis: Analysis,
}

impl CaptureRecord {
    pub fn label(&self) -> Option<&str> {
        match &self.analysis {
            Analysis::Classified { label, .. } => Some(label),
            Analysis::Unclassified => None,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self.analysis {
            Analysis::Classified { confidence, .. } => Some(confidence),
            Analysis::Unclassified => None,
        }
    }

    pub fn is_classified(&self) -> bool {
        matches!(self.analysis, Analysis::Classified { .. })
    }
}

/// Classification state of a record. Label and confidence travel together.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Analysis {
    #[default]
    Unclassified,
    Classified { label: String, confidence: f64 },
}

impl Analysis {
    /// Build a classified state, checking the confidence range
    pub fn classified(label: impl Into<String>, confidence: f64) -> Result<Self, String> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(format!("confidence {} is outside [0, 1]", confidence));
        }

        Ok(Analysis::Classified {
            label: label.into(),
            confidence,
        })
    }

    /// Both or neither. A lone label or a lone confidence is rejected.
    pub fn from_parts(label: Option<String>, confidence: Option<f64>) -> Result<Self, String> {
        match (label, confidence) {
            (None, None) => Ok(Analysis::Unclassified),
            (Some(label), Some(confidence)) => Analysis::classified(label, confidence),
            (Some(_), None) => Err("label supplied without confidence".to_string()),
            (None, Some(_)) => Err("confidence supplied without label".to_string()),
        }
    }
}

/// On-disk layout of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: String,
    uri: String,
    timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    disease: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
}

impl TryFrom<StoredRecord> for CaptureRecord {
    type Error = String;

    fn try_from(stored: StoredRecord) -> Result<Self, Self::Error> {
        let analysis = Analysis::from_parts(stored.disease, stored.confidence)
            .map_err(|e| format!("record {}: {}", stored.id, e))?;

        Ok(CaptureRecord {
            id: stored.id,
            locator: stored.uri,
            created_at: stored.timestamp,
            analysis,
        })
    }
}

impl From<CaptureRecord> for StoredRecord {
    fn from(record: CaptureRecord) -> Self {
        let (disease, confidence) = match record.analysis {
            Analysis::Classified { label, confidence } => (Some(label), Some(confidence)),
            Analysis::Unclassified => (None, None),
        };

        StoredRecord {
            id: record.id,
            uri: record.locator,
            timestamp: record.created_at,
            disease,
            confidence,
        }
    }
}

/// Display band for a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.8 {
            ConfidenceLevel::High
        } else if confidence > 0.6 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

/// What the classifier said about one image
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub label: String,
    pub confidence: f64,
    /// Probability per label
    pub distribution: BTreeMap<String, f64>,
}

impl Diagnosis {
    pub fn level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_confidence(self.confidence)
    }

    /// Highest-probability labels first
    pub fn top(&self, limit: usize) -> Vec<(&str, f64)> {
        let mut ranked: Vec<_> = self
            .distribution
            .iter()
            .map(|(label, p)| (label.as_str(), *p))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }
}

impl From<leafscan_api::Prediction> for Diagnosis {
    fn from(prediction: leafscan_api::Prediction) -> Self {
        Diagnosis {
            label: prediction.disease,
            confidence: prediction.confidence,
            distribution: prediction.all_predictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclassified_serializes_without_optional_fields() {
        let record = CaptureRecord {
            id: "1700000000000".to_string(),
            locator: "file:///leaf.jpg".to_string(),
            created_at: 1_700_000_000_000,
            analysis: Analysis::Unclassified,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"id":"1700000000000","uri":"file:///leaf.jpg","timestamp":1700000000000}"#
        );
    }

    #[test]
    fn test_classified_uses_disease_field() {
        let record = CaptureRecord {
            id: "1".to_string(),
            locator: "img1".to_string(),
            created_at: 5,
            analysis: Analysis::classified("Anthracnose", 0.92).unwrap(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["disease"], "Anthracnose");
        assert_eq!(value["confidence"], 0.92);
        assert_eq!(value["uri"], "img1");
    }

    #[test]
    fn test_partial_pair_fails_to_deserialize() {
        let json = r#"{"id":"1","uri":"a","timestamp":1,"disease":"Healthy"}"#;
        assert!(serde_json::from_str::<CaptureRecord>(json).is_err());

        let json = r#"{"id":"1","uri":"a","timestamp":1,"confidence":0.4}"#;
        assert!(serde_json::from_str::<CaptureRecord>(json).is_err());
    }

    #[test]
    fn test_null_fields_read_as_unclassified() {
        let json = r#"{"id":"1","uri":"a","timestamp":1,"disease":null,"confidence":null}"#;
        let record: CaptureRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.analysis, Analysis::Unclassified);
    }

    #[test]
    fn test_confidence_range_checked() {
        assert!(Analysis::classified("Healthy", 1.0).is_ok());
        assert!(Analysis::classified("Healthy", 0.0).is_ok());
        assert!(Analysis::classified("Healthy", 1.01).is_err());
        assert!(Analysis::classified("Healthy", -0.1).is_err());
        assert!(Analysis::classified("Healthy", f64::NAN).is_err());
    }

    #[test]
    fn test_from_parts_rejects_half_pairs() {
        assert!(Analysis::from_parts(Some("Healthy".into()), None).is_err());
        assert!(Analysis::from_parts(None, Some(0.5)).is_err());
        assert_eq!(Analysis::from_parts(None, None).unwrap(), Analysis::Unclassified);
    }

    #[test]
    fn test_confidence_levels() {
        assert_eq!(ConfidenceLevel::from_confidence(0.92), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_confidence(0.8), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_confidence(0.61), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_confidence(0.6), ConfidenceLevel::Low);
    }

    #[test]
    fn test_diagnosis_top_is_sorted() {
        let mut distribution = BTreeMap::new();
        distribution.insert("Anthracnose".to_string(), 0.7);
        distribution.insert("Healthy".to_string(), 0.05);
        distribution.insert("Die Back".to_string(), 0.2);
        distribution.insert("Sooty Mould".to_string(), 0.05);

        let diagnosis = Diagnosis {
            label: "Anthracnose".to_string(),
            confidence: 0.7,
            distribution,
        };

        let top = diagnosis.top(3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0], ("Anthracnose", 0.7));
        assert_eq!(top[1], ("Die Back", 0.2));
        assert_eq!(diagnosis.level(), ConfidenceLevel::Medium);
    }
}
