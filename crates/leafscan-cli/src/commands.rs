// Command handlers - thin glue between clap and leafscan-core
use anyhow::{bail, Context, Result};
use leafscan_api::{ClassifierClient, PrescriptionsClient};
use leafscan_cache::SqliteSlots;
use leafscan_core::{
    AnalysisReport, Analyzer, BookSource, CaptureRecord, Config, ConfidenceLevel, PrescriptionBook,
    RecentStore, RemoteClassifier,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::Commands;

pub async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Add { locator } => add(config, &locator).await,
        Commands::Analyze { image, locator } => analyze(config, &image, locator).await,
        Commands::List { json } => list(config, json).await,
        Commands::Delete { id } => delete(config, &id).await,
        Commands::Clear { yes } => clear(config, yes).await,
        Commands::Prescriptions {
            label,
            add,
            edit,
            text,
            remove,
        } => {
            let edit = match (edit, text) {
                (Some(n), Some(text)) => Some(StepEdit::Replace(n, text)),
                _ => remove.map(StepEdit::Remove),
            };
            let edit = add.map(StepEdit::Add).or(edit);
            prescriptions(config, label, edit).await
        }
        Commands::Health => health(config).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<RecentStore>> {
    let path = config.database_path()?;
    let slots = SqliteSlots::open(&path)
        .with_context(|| format!("Failed to open history database {}", path.display()))?;

    let store = RecentStore::from_config(Arc::new(slots), &config.store);
    store.load().await.context("Failed to load capture history")?;
    Ok(Arc::new(store))
}

async fn add(config: &Config, locator: &str) -> Result<()> {
    let store = open_store(config).await?;
    let record = store.add(locator, None, None).await?;

    println!("Recorded {} as {}", record.locator, record.id);
    Ok(())
}

async fn analyze(config: &Config, image: &Path, locator: Option<String>) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read image {}", image.display()))?;
    let locator = match locator {
        Some(locator) => locator,
        None => file_locator(image)?,
    };

    let store = open_store(config).await?;
    let client = ClassifierClient::new(&config.classifier.base_url, config.classifier.timeout())?;
    let analyzer = Analyzer::new(store, RemoteClassifier::new(client));

    let record = analyzer.capture(&locator).await?;
    println!("Analyzing {} ...", locator);

    let report = match analyzer.analyze(&record, &bytes).await {
        Ok(report) => report,
        Err(e) => {
            println!("Capture kept as {} without a result.", record.id);
            return Err(e).context("Analysis failed");
        }
    };
    print_report(&report);

    let book = load_book(config).await?;
    print_steps(&report.diagnosis.label, book.for_label(&report.diagnosis.label));
    Ok(())
}

async fn list(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.list().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No recent items yet");
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp_millis();
    for record in &records {
        println!("{}", format_record(record, now));
    }
    println!("{} of {} slots used", records.len(), store.max_records());
    Ok(())
}

async fn delete(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;

    if store.delete_by_id(id).await? {
        println!("Deleted {}", id);
    } else {
        println!("No capture with id {}", id);
    }
    Ok(())
}

async fn clear(config: &Config, yes: bool) -> Result<()> {
    let store = open_store(config).await?;
    let count = store.len().await;

    if !yes && count > 0 {
        bail!("Refusing to delete {} captures without --yes", count);
    }

    store.clear().await?;
    info!("Removed {} captures", count);
    println!("History cleared");
    Ok(())
}

/// Change requested on a prescription list, positions as printed (1-based)
enum StepEdit {
    Add(String),
    Replace(usize, String),
    Remove(usize),
}

async fn prescriptions(config: &Config, label: Option<String>, edit: Option<StepEdit>) -> Result<()> {
    let client = prescriptions_client(config)?;
    let mut book = PrescriptionBook::load(&client, &config.prescriptions_cache_path()?).await;

    match (label, edit) {
        (Some(label), Some(edit)) => {
            if !client.has_token() {
                bail!("Publishing needs a token, set {}", leafscan_core::config::TOKEN_ENV_VAR);
            }
            match edit {
                StepEdit::Add(step) => book.add_step(&client, &label, &step).await?,
                StepEdit::Replace(n, step) => {
                    book.edit_step(&client, &label, step_index(n)?, &step).await?
                }
                StepEdit::Remove(n) => book.remove_step(&client, &label, step_index(n)?).await?,
            }
            println!("Updated {}:", label);
            print_steps(&label, book.for_label(&label));
        }
        (Some(label), None) => print_steps(&label, book.for_label(&label)),
        (None, _) => {
            for (label, steps) in book.categories() {
                print_steps(label, steps);
                println!();
            }
        }
    }

    if book.source() == BookSource::LocalCache {
        println!("(offline copy)");
    }
    Ok(())
}

/// Printed step number to list index
fn step_index(n: usize) -> Result<usize> {
    match n.checked_sub(1) {
        Some(index) => Ok(index),
        None => bail!("Steps are numbered from 1"),
    }
}

async fn health(config: &Config) -> Result<()> {
    let client = ClassifierClient::new(&config.classifier.base_url, config.classifier.timeout())?;

    let status = client
        .health()
        .await
        .with_context(|| format!("Classifier at {} is unreachable", client.base_url()))?;
    println!(
        "{}: {} (model {})",
        client.base_url(),
        status.status,
        if status.model_loaded { "loaded" } else { "not loaded" }
    );

    match client.model_info().await {
        Ok(info) => println!("{} classes: {}", info.num_classes, info.classes.join(", ")),
        Err(e) => warn!("Model info unavailable: {}", e),
    }
    Ok(())
}

fn prescriptions_client(config: &Config) -> Result<PrescriptionsClient> {
    Ok(PrescriptionsClient::new(
        &config.prescriptions.api_url,
        config.prescriptions.token.clone(),
        config.prescriptions.timeout(),
    )?)
}

async fn load_book(config: &Config) -> Result<PrescriptionBook> {
    let client = prescriptions_client(config)?;
    Ok(PrescriptionBook::load(&client, &config.prescriptions_cache_path()?).await)
}

/// `file://` URI for a local image
fn file_locator(path: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    Ok(format!("file://{}", absolute.display()))
}

fn print_report(report: &AnalysisReport) {
    let diagnosis = &report.diagnosis;
    println!(
        "{} - {:.1}% confidence ({})",
        diagnosis.label,
        diagnosis.confidence * 100.0,
        diagnosis.level().as_str()
    );
    for (label, p) in diagnosis.top(3) {
        println!("  {:<18} {:>5.1}%", label, p * 100.0);
    }
    println!("Saved as {}", report.record.id);
}

fn print_steps(label: &str, steps: &[String]) {
    println!("{}", label);
    if steps.is_empty() {
        println!("  No prescriptions available");
    }
    for (i, step) in steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step);
    }
}

fn format_record(record: &CaptureRecord, now_ms: i64) -> String {
    let result = match (record.label(), record.confidence()) {
        (Some(label), Some(confidence)) => format!(
            "{} {:.0}% [{}]",
            label,
            confidence * 100.0,
            ConfidenceLevel::from_confidence(confidence).as_str()
        ),
        _ => "not analyzed".to_string(),
    };

    format!(
        "{:<15} {:<10} {:<28} {}",
        record.id,
        format_age(record.created_at, now_ms),
        result,
        record.locator
    )
}

/// Short relative age, falling back to the calendar date after a week
fn format_age(created_at_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(created_at_ms).max(0);
    let mins = diff / 60_000;
    let hours = diff / 3_600_000;
    let days = diff / 86_400_000;

    if mins < 1 {
        "Just now".to_string()
    } else if mins < 60 {
        format!("{}m ago", mins)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else if days < 7 {
        format!("{}d ago", days)
    } else {
        chrono::DateTime::from_timestamp_millis(created_at_ms)
            .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| created_at_ms.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leafscan_core::Analysis;

    const NOW: i64 = 1_717_000_000_000;

    #[test]
    fn test_format_age_buckets() {
        assert_eq!(format_age(NOW - 30_000, NOW), "Just now");
        assert_eq!(format_age(NOW - 5 * 60_000, NOW), "5m ago");
        assert_eq!(format_age(NOW - 3 * 3_600_000, NOW), "3h ago");
        assert_eq!(format_age(NOW - 2 * 86_400_000, NOW), "2d ago");
        assert!(format_age(NOW - 30 * 86_400_000, NOW).contains('-'));
    }

    #[test]
    fn test_format_age_future_timestamp() {
        assert_eq!(format_age(NOW + 10_000, NOW), "Just now");
    }

    #[test]
    fn test_step_index_is_one_based() {
        assert_eq!(step_index(1).unwrap(), 0);
        assert_eq!(step_index(3).unwrap(), 2);
        assert!(step_index(0).is_err());
    }

    #[test]
    fn test_format_record() {
        let record = CaptureRecord {
            id: "1716999999999".to_string(),
            locator: "file:///leaf.jpg".to_string(),
            created_at: NOW - 120_000,
            analysis: Analysis::classified("Anthracnose", 0.92).unwrap(),
        };

        let line = format_record(&record, NOW);
        assert!(line.contains("Anthracnose 92% [high]"));
        assert!(line.contains("2m ago"));
        assert!(line.ends_with("file:///leaf.jpg"));

        let pending = CaptureRecord {
            analysis: Analysis::Unclassified,
            ..record
        };
        assert!(format_record(&pending, NOW).contains("not analyzed"));
    }
}
