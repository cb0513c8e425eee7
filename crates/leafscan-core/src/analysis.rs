// Capture -> classify -> record flow
use async_trait::async_trait;
use leafscan_api::ClassifierClient;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{CaptureRecord, Diagnosis};
use crate::store::RecentStore;
use crate::Result;

/// Anything that can turn image bytes into a diagnosis
///
/// The remote service implements this in production, tests plug in a fake.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &[u8]) -> Result<Diagnosis>;
}

/// Bridges the HTTP client to the [`Classifier`] trait
pub struct RemoteClassifier {
    client: ClassifierClient,
}

impl RemoteClassifier {
    pub fn new(client: ClassifierClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ClassifierClient {
        &self.client
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, image: &[u8]) -> Result<Diagnosis> {
        let prediction = self.client.classify(image).await?;
        Ok(prediction.into())
    }
}

/// Outcome of one analysis
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// History entry now carrying the result
    pub record: CaptureRecord,
    pub diagnosis: Diagnosis,
}

/// Ties the history to a classifier
pub struct Analyzer<C: Classifier> {
    store: Arc<RecentStore>,
    classifier: C,
}

impl<C: Classifier> Analyzer<C> {
    pub fn new(store: Arc<RecentStore>, classifier: C) -> Self {
        Self { store, classifier }
    }

    pub fn store(&self) -> &RecentStore {
        &self.store
    }

    /// Record a fresh capture before anything is known about it
    pub async fn capture(&self, locator: &str) -> Result<CaptureRecord> {
        let record = self.store.add(locator, None, None).await?;
        info!("Captured {} as record {}", locator, record.id);
        Ok(record)
    }

    /// Classify the image behind `record` and store the result
    ///
    /// On classifier failure the record stays unclassified and the error is
    /// returned as is.
    pub async fn analyze(&self, record: &CaptureRecord, image: &[u8]) -> Result<AnalysisReport> {
        let diagnosis = match self.classifier.classify(image).await {
            Ok(diagnosis) => diagnosis,
            Err(e) => {
                warn!("Analysis of record {} failed: {}", record.id, e);
                return Err(e);
            }
        };

        let record = self.attach(record, &diagnosis).await?;
        info!(
            "Record {} classified as {} ({:.1}%)",
            record.id,
            diagnosis.label,
            diagnosis.confidence * 100.0
        );

        Ok(AnalysisReport { record, diagnosis })
    }

    /// Capture and analyze in one go
    pub async fn capture_and_analyze(&self, locator: &str, image: &[u8]) -> Result<AnalysisReport> {
        let record = self.capture(locator).await?;
        self.analyze(&record, image).await
    }

    async fn attach(&self, record: &CaptureRecord, diagnosis: &Diagnosis) -> Result<CaptureRecord> {
        self.store
            .amend_capture(record, &diagnosis.label, diagnosis.confidence)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AmendPolicy;
    use crate::Error;
    use leafscan_api::ClassifierError;
    use leafscan_cache::MemorySlots;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier {
        label: &'static str,
        confidence: f64,
        calls: AtomicUsize,
    }

    impl FixedClassifier {
        fn new(label: &'static str, confidence: f64) -> Self {
            Self {
                label,
                confidence,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, image: &[u8]) -> Result<Diagnosis> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!image.is_empty());

            let mut distribution = BTreeMap::new();
            distribution.insert(self.label.to_string(), self.confidence);
            Ok(Diagnosis {
                label: self.label.to_string(),
                confidence: self.confidence,
                distribution,
            })
        }
    }

    struct DownClassifier;

    #[async_trait]
    impl Classifier for DownClassifier {
        async fn classify(&self, _image: &[u8]) -> Result<Diagnosis> {
            Err(ClassifierError::Status {
                status: 503,
                body: "sleeping".to_string(),
            }
            .into())
        }
    }

    fn store(policy: AmendPolicy) -> Arc<RecentStore> {
        Arc::new(RecentStore::new(Arc::new(MemorySlots::new())).with_amend_policy(policy))
    }

    #[tokio::test]
    async fn test_capture_then_analyze_updates_same_record() {
        let analyzer = Analyzer::new(
            store(AmendPolicy::InPlace),
            FixedClassifier::new("Anthracnose", 0.92),
        );

        let captured = analyzer.capture("file:///leaf.jpg").await.unwrap();
        let report = analyzer.analyze(&captured, b"jpeg").await.unwrap();

        assert_eq!(report.record.id, captured.id);
        assert_eq!(report.record.label(), Some("Anthracnose"));
        assert_eq!(report.diagnosis.confidence, 0.92);

        let records = analyzer.store().list().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_classified());
    }

    #[tokio::test]
    async fn test_append_policy_leaves_unclassified_entry() {
        let analyzer = Analyzer::new(store(AmendPolicy::Append), FixedClassifier::new("Healthy", 0.97));

        analyzer
            .capture_and_analyze("file:///leaf.jpg", b"jpeg")
            .await
            .unwrap();

        let records = analyzer.store().list().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].label(), Some("Healthy"));
        assert_eq!(records[1].label(), None);
    }

    #[tokio::test]
    async fn test_failed_classification_keeps_record_unclassified() {
        let analyzer = Analyzer::new(store(AmendPolicy::InPlace), DownClassifier);

        let captured = analyzer.capture("file:///leaf.jpg").await.unwrap();
        let err = analyzer.analyze(&captured, b"jpeg").await.unwrap_err();

        assert!(matches!(err, Error::ClassifierError(_)));
        assert_eq!(analyzer.store().list().await, vec![captured]);
    }

    #[tokio::test]
    async fn test_deleted_record_gets_reinserted() {
        let analyzer = Analyzer::new(
            store(AmendPolicy::InPlace),
            FixedClassifier::new("Die Back", 0.7),
        );

        let captured = analyzer.capture("file:///leaf.jpg").await.unwrap();
        analyzer.store().delete_by_id(&captured.id).await.unwrap();

        let report = analyzer.analyze(&captured, b"jpeg").await.unwrap();
        assert_ne!(report.record.id, captured.id);
        assert_eq!(analyzer.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_reanalysis_adds_new_entry() {
        let classifier = FixedClassifier::new("Sooty Mould", 0.85);
        let analyzer = Analyzer::new(store(AmendPolicy::InPlace), classifier);

        let captured = analyzer.capture("file:///leaf.jpg").await.unwrap();
        analyzer.analyze(&captured, b"jpeg").await.unwrap();
        analyzer.analyze(&captured, b"jpeg").await.unwrap();

        let records = analyzer.store().list().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.is_classified()));
        assert_eq!(analyzer.classifier.calls.load(Ordering::SeqCst), 2);
    }
}
