// HTTP clients for the services the app talks to
pub mod classifier;
pub mod prescriptions;
pub mod retry;

// Re-export common types
pub use classifier::{ClassifierClient, ClassifierError, HealthStatus, ModelInfo, Prediction, DEFAULT_CLASSIFIER_URL};
pub use prescriptions::DEFAULT_PRESCRIPTIONS_URL;
pub use prescriptions::{PrescriptionFile, PrescriptionMap, PrescriptionsClient, PrescriptionsError};
pub use retry::RetryConfig;
