// Treatment steps per disease, remote first with a local offline copy
use async_trait::async_trait;
use leafscan_api::{PrescriptionFile, PrescriptionMap, PrescriptionsClient};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::DISEASE_LABELS;
use crate::{Error, Result};

/// Where the prescriptions document comes from and goes to
#[async_trait]
pub trait PrescriptionSource: Send + Sync {
    async fn fetch(&self) -> Result<PrescriptionFile>;

    /// Replace the remote document, returning the new revision
    async fn publish(&self, entries: &PrescriptionMap, sha: &str, message: &str) -> Result<String>;
}

#[async_trait]
impl PrescriptionSource for PrescriptionsClient {
    async fn fetch(&self) -> Result<PrescriptionFile> {
        Ok(PrescriptionsClient::fetch(self).await?)
    }

    async fn publish(&self, entries: &PrescriptionMap, sha: &str, message: &str) -> Result<String> {
        Ok(PrescriptionsClient::publish(self, entries, sha, message).await?)
    }
}

/// Where the currently loaded entries came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSource {
    Remote,
    LocalCache,
    Empty,
}

/// Loaded prescriptions plus what is needed to publish edits
#[derive(Debug, Clone)]
pub struct PrescriptionBook {
    entries: PrescriptionMap,
    /// Remote revision, only known after a successful fetch
    sha: Option<String>,
    source: BookSource,
    cache_path: PathBuf,
}

impl PrescriptionBook {
    /// Fetch the remote document, falling back to the local copy
    ///
    /// Never fails: with neither remote nor cache available the book is empty.
    pub async fn load(source: &dyn PrescriptionSource, cache_path: &Path) -> Self {
        match source.fetch().await {
            Ok(file) => {
                info!("Loaded {} prescription categories", file.entries.len());
                if let Err(e) = write_cache(cache_path, &file.entries).await {
                    warn!("Could not cache prescriptions locally: {}", e);
                }
                return Self {
                    entries: file.entries,
                    sha: Some(file.sha),
                    source: BookSource::Remote,
                    cache_path: cache_path.to_path_buf(),
                };
            }
            Err(e) => warn!("Remote prescriptions unavailable, trying local copy: {}", e),
        }

        match read_cache(cache_path).await {
            Ok(Some(entries)) => Self {
                entries,
                sha: None,
                source: BookSource::LocalCache,
                cache_path: cache_path.to_path_buf(),
            },
            Ok(None) => Self::empty(cache_path),
            Err(e) => {
                warn!("Local prescriptions unreadable: {}", e);
                Self::empty(cache_path)
            }
        }
    }

    fn empty(cache_path: &Path) -> Self {
        Self {
            entries: PrescriptionMap::new(),
            sha: None,
            source: BookSource::Empty,
            cache_path: cache_path.to_path_buf(),
        }
    }

    pub fn source(&self) -> BookSource {
        self.source
    }

    /// Steps for a label, empty when the document has none
    pub fn for_label(&self, label: &str) -> &[String] {
        self.entries.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every known label paired with its steps, model labels first
    pub fn categories(&self) -> Vec<(&str, &[String])> {
        let mut out: Vec<(&str, &[String])> = DISEASE_LABELS
            .iter()
            .map(|label| (*label, self.for_label(label)))
            .collect();

        for (label, steps) in &self.entries {
            if !DISEASE_LABELS.contains(&label.as_str()) {
                out.push((label.as_str(), steps.as_slice()));
            }
        }
        out
    }

    /// Append a step under `label` and publish the whole document
    pub async fn add_step(&mut self, source: &dyn PrescriptionSource, label: &str, step: &str) -> Result<()> {
        let step = non_blank(step)?;

        let mut updated = self.entries.clone();
        updated
            .entry(label.to_string())
            .or_default()
            .push(step.to_string());

        self.publish(source, updated, &format!("Add prescription for {}", label))
            .await
    }

    /// Replace the step at `index` (zero-based) under `label`
    pub async fn edit_step(
        &mut self,
        source: &dyn PrescriptionSource,
        label: &str,
        index: usize,
        step: &str,
    ) -> Result<()> {
        let step = non_blank(step)?;

        let mut updated = self.entries.clone();
        let slot = updated
            .get_mut(label)
            .and_then(|steps| steps.get_mut(index))
            .ok_or_else(|| missing_step(label, index))?;
        *slot = step.to_string();

        self.publish(source, updated, &format!("Edit prescription for {}", label))
            .await
    }

    /// Drop the step at `index` (zero-based). The label stays, possibly with no steps.
    pub async fn remove_step(&mut self, source: &dyn PrescriptionSource, label: &str, index: usize) -> Result<()> {
        let mut updated = self.entries.clone();
        match updated.get_mut(label) {
            Some(steps) if index < steps.len() => {
                steps.remove(index);
            }
            _ => return Err(missing_step(label, index)),
        }

        self.publish(source, updated, &format!("Remove prescription for {}", label))
            .await
    }

    /// Push `updated` against the known revision and adopt it once accepted
    async fn publish(&mut self, source: &dyn PrescriptionSource, updated: PrescriptionMap, message: &str) -> Result<()> {
        let sha = self.sha.clone().ok_or_else(|| {
            Error::NotFound("remote revision unknown, prescriptions were not fetched".into())
        })?;

        let new_sha = source.publish(&updated, &sha, message).await?;
        debug!("Published prescriptions at revision {}", new_sha);

        self.entries = updated;
        self.sha = Some(new_sha);
        if let Err(e) = write_cache(&self.cache_path, &self.entries).await {
            warn!("Could not cache prescriptions locally: {}", e);
        }
        Ok(())
    }
}

fn non_blank(step: &str) -> Result<&str> {
    let step = step.trim();
    if step.is_empty() {
        return Err(Error::InvalidInput("prescription step is blank".into()));
    }
    Ok(step)
}

fn missing_step(label: &str, index: usize) -> Error {
    Error::NotFound(format!("no step {} under {}", index + 1, label))
}

async fn read_cache(path: &Path) -> Result<Option<PrescriptionMap>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_cache(path: &Path, entries: &PrescriptionMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
