// Recent captures: newest first, bounded, persisted as one JSON document
use leafscan_cache::SlotStorage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{Analysis, CaptureRecord};
use crate::{Error, Result};

pub const DEFAULT_MAX_RECORDS: usize = 20;
pub const DEFAULT_SLOT_KEY: &str = "@recent_images";

/// What a classification result does when it arrives for a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmendPolicy {
    /// Classify the newest unclassified record with that locator
    #[default]
    InPlace,
    /// Always insert a fresh record, leaving the unclassified one behind
    Append,
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Hands out millisecond ids that never repeat, even within one millisecond
#[derive(Debug, Default)]
struct IdGenerator {
    last: i64,
}

impl IdGenerator {
    fn next(&mut self, now_ms: i64) -> String {
        let id = now_ms.max(self.last.saturating_add(1));
        self.last = id;
        id.to_string()
    }

    /// Make sure ids already on disk are never handed out again
    fn observe(&mut self, records: &[CaptureRecord]) {
        if let Some(max) = records.iter().filter_map(|r| r.id.parse::<i64>().ok()).max() {
            self.last = self.last.max(max);
        }
    }
}

struct State {
    records: Vec<CaptureRecord>,
    ids: IdGenerator,
    /// Whether `records` reflects storage yet
    loaded: bool,
}

/// Bounded history of captures
///
/// All operations that touch the list queue up on one async lock and hold it
/// across the storage call, so back-to-back calls land in call order. Changes
/// are built on a copy and only kept once the write succeeded.
pub struct RecentStore {
    storage: Arc<dyn SlotStorage>,
    slot_key: String,
    max_records: usize,
    amend_policy: AmendPolicy,
    clock: Clock,
    state: Mutex<State>,
}

impl RecentStore {
    pub fn new(storage: Arc<dyn SlotStorage>) -> Self {
        Self {
            storage,
            slot_key: DEFAULT_SLOT_KEY.to_string(),
            max_records: DEFAULT_MAX_RECORDS,
            amend_policy: AmendPolicy::default(),
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
            state: Mutex::new(State {
                records: Vec::new(),
                ids: IdGenerator::default(),
                loaded: false,
            }),
        }
    }

    /// Build from the `[store]` config section
    pub fn from_config(storage: Arc<dyn SlotStorage>, config: &crate::config::StoreConfig) -> Self {
        Self::new(storage)
            .with_slot_key(&config.slot_key)
            .with_max_records(config.max_records)
            .with_amend_policy(config.amend_policy)
    }

    pub fn with_slot_key(mut self, key: &str) -> Self {
        self.slot_key = key.to_string();
        self
    }

    /// Bound on kept records, floored at one
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    pub fn with_amend_policy(mut self, policy: AmendPolicy) -> Self {
        self.amend_policy = policy;
        self
    }

    /// Swap the wall clock, epoch milliseconds
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub fn amend_policy(&self) -> AmendPolicy {
        self.amend_policy
    }

    /// Replace the in-memory list with what storage holds
    ///
    /// A missing slot means an empty history. Anything present but unreadable
    /// is reported rather than silently dropped.
    pub async fn load(&self) -> Result<Vec<CaptureRecord>> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state).await?;
        Ok(state.records.clone())
    }

    /// Record a new capture, optionally already classified
    ///
    /// A store that was never loaded reads storage first, so existing history
    /// is kept rather than overwritten.
    pub async fn add(
        &self,
        locator: &str,
        label: Option<&str>,
        confidence: Option<f64>,
    ) -> Result<CaptureRecord> {
        let analysis = Analysis::from_parts(label.map(str::to_string), confidence)
            .map_err(Error::InvalidRecordError)?;

        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        self.insert_locked(&mut state, locator, analysis).await
    }

    /// Attach a classification result to the capture with this locator
    ///
    /// See [`AmendPolicy`]. Falls back to inserting a new record when there is
    /// nothing unclassified to attach to.
    pub async fn amend_by_locator(
        &self,
        locator: &str,
        label: &str,
        confidence: f64,
    ) -> Result<CaptureRecord> {
        let analysis = Analysis::classified(label, confidence).map_err(Error::InvalidRecordError)?;

        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        self.amend_locator_locked(&mut state, locator, analysis).await
    }

    /// Attach a result to a capture this store handed out earlier
    ///
    /// Under [`AmendPolicy::InPlace`] the record with the capture's id is
    /// classified if it still waits for a result. Otherwise (evicted, deleted,
    /// already classified, or `Append` policy) this behaves like
    /// [`amend_by_locator`](Self::amend_by_locator). The choice and the write
    /// happen under one lock.
    pub async fn amend_capture(
        &self,
        capture: &CaptureRecord,
        label: &str,
        confidence: f64,
    ) -> Result<CaptureRecord> {
        let analysis = Analysis::classified(label, confidence).map_err(Error::InvalidRecordError)?;

        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        if self.amend_policy == AmendPolicy::InPlace {
            let pending = state
                .records
                .iter()
                .position(|r| r.id == capture.id && !r.is_classified());
            if let Some(index) = pending {
                return self.classify_locked(&mut state, index, analysis).await;
            }
            warn!(
                "Record {} no longer awaits a result, matching by locator",
                capture.id
            );
        }

        self.amend_locator_locked(&mut state, &capture.locator, analysis).await
    }

    /// Attach a classification result to the record issued at capture time
    pub async fn amend_by_id(&self, id: &str, label: &str, confidence: f64) -> Result<CaptureRecord> {
        let analysis = Analysis::classified(label, confidence).map_err(Error::InvalidRecordError)?;

        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        let index = state
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if state.records[index].is_classified() {
            return Err(Error::InvalidRecordError(format!(
                "record {} is already classified",
                id
            )));
        }

        self.classify_locked(&mut state, index, analysis).await
    }

    /// Remove one record. `false` when nothing had that id.
    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        let Some(index) = state.records.iter().position(|r| r.id == id) else {
            debug!("Delete skipped, no record {}", id);
            return Ok(false);
        };

        let mut next = state.records.clone();
        next.remove(index);
        self.persist(&next).await?;
        state.records = next;

        debug!("Deleted record {}", id);
        Ok(true)
    }

    /// Drop the whole history, slot included
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        self.storage
            .remove(&self.slot_key)
            .await
            .map_err(|e| Error::StorageWriteError(e.to_string()))?;
        state.records.clear();
        state.loaded = true;

        info!("Cleared capture history");
        Ok(())
    }

    /// Current in-memory list, newest first. Call `load` first to pick up outside changes.
    pub async fn list(&self) -> Vec<CaptureRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn get(&self, id: &str) -> Option<CaptureRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    async fn load_locked(&self, state: &mut State) -> Result<()> {
        let raw = self
            .storage
            .read(&self.slot_key)
            .await
            .map_err(|e| Error::StorageReadError(e.to_string()))?;

        let mut records = match raw {
            Some(text) => parse_records(&text)?,
            None => Vec::new(),
        };

        if records.len() > self.max_records {
            warn!(
                "Stored history has {} records, keeping the newest {}",
                records.len(),
                self.max_records
            );
            records.truncate(self.max_records);
        }

        state.ids.observe(&records);
        state.records = records;
        state.loaded = true;

        debug!("Loaded {} recent captures", state.records.len());
        Ok(())
    }

    async fn ensure_loaded(&self, state: &mut State) -> Result<()> {
        if !state.loaded {
            self.load_locked(state).await?;
        }
        Ok(())
    }

    async fn amend_locator_locked(
        &self,
        state: &mut State,
        locator: &str,
        analysis: Analysis,
    ) -> Result<CaptureRecord> {
        if self.amend_policy == AmendPolicy::InPlace {
            let newest = state.records.iter().position(|r| r.locator == locator);
            if let Some(index) = newest.filter(|&i| !state.records[i].is_classified()) {
                return self.classify_locked(state, index, analysis).await;
            }
        }

        self.insert_locked(state, locator, analysis).await
    }

    async fn insert_locked(
        &self,
        state: &mut State,
        locator: &str,
        analysis: Analysis,
    ) -> Result<CaptureRecord> {
        let now = (self.clock)();
        let record = CaptureRecord {
            id: state.ids.next(now),
            locator: locator.to_string(),
            created_at: now,
            analysis,
        };

        let mut next = Vec::with_capacity(state.records.len() + 1);
        next.push(record.clone());
        next.extend(state.records.iter().cloned());
        if next.len() > self.max_records {
            let evicted = next.len() - self.max_records;
            next.truncate(self.max_records);
            debug!("Evicted {} oldest record(s)", evicted);
        }

        self.persist(&next).await?;
        state.records = next;

        debug!("Added record {} for {}", record.id, record.locator);
        Ok(record)
    }

    async fn classify_locked(
        &self,
        state: &mut State,
        index: usize,
        analysis: Analysis,
    ) -> Result<CaptureRecord> {
        let mut next = state.records.clone();
        next[index].analysis = analysis;
        let record = next[index].clone();

        self.persist(&next).await?;
        state.records = next;

        debug!("Classified record {} in place", record.id);
        Ok(record)
    }

    async fn persist(&self, records: &[CaptureRecord]) -> Result<()> {
        let json = serde_json::to_string(records)?;

        self.storage
            .write(&self.slot_key, &json)
            .await
            .map_err(|e| Error::StorageWriteError(e.to_string()))
    }
}

fn parse_records(text: &str) -> Result<Vec<CaptureRecord>> {
    let records: Vec<CaptureRecord> =
        serde_json::from_str(text).map_err(|e| Error::StorageReadError(e.to_string()))?;

    let mut seen = HashSet::new();
    for record in &records {
        if !seen.insert(record.id.as_str()) {
            return Err(Error::StorageReadError(format!(
                "duplicate record id {}",
                record.id
            )));
        }
    }

    Ok(records)
}
