// Core logic: capture history, analysis flow, prescriptions
pub mod analysis;
pub mod config;
pub mod error;
pub mod models;
pub mod prescriptions;
pub mod store;

pub use analysis::{AnalysisReport, Analyzer, Classifier, RemoteClassifier};
pub use config::Config;
pub use error::Error;
pub use models::{Analysis, CaptureRecord, ConfidenceLevel, Diagnosis, DISEASE_LABELS};
pub use prescriptions::{BookSource, PrescriptionBook, PrescriptionSource};
pub use store::{AmendPolicy, RecentStore, DEFAULT_MAX_RECORDS, DEFAULT_SLOT_KEY};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
