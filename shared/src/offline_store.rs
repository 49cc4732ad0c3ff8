//! Persisted state: the autosaved draft and the offline complaint queue.
//!
//! Both go through the key-value capability as CBOR inside a small
//! envelope (magic, schema version, BLAKE3 of the payload). Anything that
//! fails those checks is reported and treated as absent by the caller.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

use crate::duplicates::DuplicateCandidate;
use crate::retry::RetryPolicy;
use crate::wizard::{ComplaintDraft, ComplaintSubmission};
use crate::{
    AppError, ComplaintId, Description, ErrorKind, OfflineId, UnixTimeMs, MAX_QUEUED_COMPLAINTS,
};

const CURRENT_SCHEMA_VERSION: u32 = 1;
const MAX_STORE_BYTES: usize = 64 * 1024 * 1024;
/// Room kept free below [`MAX_STORE_BYTES`] for envelope and CBOR framing.
const QUEUE_PAYLOAD_BUDGET: usize = 48 * 1024 * 1024;
const ENTRY_OVERHEAD_BYTES: usize = 1024;
const DRAFT_MAGIC: &[u8; 4] = b"GRVD";
const QUEUE_MAGIC: &[u8; 4] = b"GRVQ";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupted store: {reason}")]
    Corrupted { reason: &'static str },

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("schema version {found} is newer than supported {max}")]
    FutureSchema { found: u32, max: u32 },

    #[error("store too large: {size} bytes, max {max}")]
    StoreTooLarge { size: usize, max: usize },

    #[error("offline queue is full ({max} complaints)")]
    QueueFull { max: usize },

    #[error("offline queue would reach {size} bytes, max {max}")]
    QueueTooLarge { size: usize, max: usize },
}

impl From<ciborium::de::Error<std::io::Error>> for StoreError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for StoreError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        let kind = match e {
            StoreError::Serialization(_) => ErrorKind::Serialization,
            StoreError::QueueFull { .. } | StoreError::QueueTooLarge { .. } => ErrorKind::Storage,
            _ => ErrorKind::Deserialization,
        };
        AppError::new(kind, "Saved data could not be used").with_internal(e.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct StoreEnvelope {
    magic: [u8; 4],
    schema_version: u32,
    checksum: [u8; 32],
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

fn seal<T: Serialize>(magic: &[u8; 4], value: &T) -> Result<Vec<u8>, StoreError> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;

    let envelope = StoreEnvelope {
        magic: *magic,
        schema_version: CURRENT_SCHEMA_VERSION,
        checksum: *blake3::hash(&payload).as_bytes(),
        payload,
    };

    let mut bytes = Vec::new();
    ciborium::into_writer(&envelope, &mut bytes)?;
    Ok(bytes)
}

fn open<T: DeserializeOwned>(magic: &[u8; 4], bytes: &[u8]) -> Result<T, StoreError> {
    if bytes.is_empty() {
        return Err(StoreError::Corrupted {
            reason: "empty value",
        });
    }
    if bytes.len() > MAX_STORE_BYTES {
        return Err(StoreError::StoreTooLarge {
            size: bytes.len(),
            max: MAX_STORE_BYTES,
        });
    }

    let envelope: StoreEnvelope = ciborium::from_reader(bytes)?;

    if envelope.magic != *magic {
        return Err(StoreError::Corrupted {
            reason: "invalid magic bytes",
        });
    }

    if envelope.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::FutureSchema {
            found: envelope.schema_version,
            max: CURRENT_SCHEMA_VERSION,
        });
    }

    let actual = blake3::hash(&envelope.payload);
    if actual.as_bytes() != &envelope.checksum {
        return Err(StoreError::IntegrityCheckFailed {
            expected: hex::encode(envelope.checksum),
            actual: hex::encode(actual.as_bytes()),
        });
    }

    Ok(ciborium::from_reader(&envelope.payload[..])?)
}

// --- Draft slot ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedDraft {
    pub draft: ComplaintDraft,
    pub description: Description,
    pub saved_at: UnixTimeMs,
}

impl SavedDraft {
    /// A draft is offered back only inside the TTL window.
    #[must_use]
    pub fn is_restorable(&self, now: UnixTimeMs, ttl_ms: u64) -> bool {
        now.elapsed_since(self.saved_at) < ttl_ms
    }

    /// Nothing worth keeping: the slot should be deleted instead.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.draft.is_empty() && self.description.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        seal(DRAFT_MAGIC, self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        open(DRAFT_MAGIC, bytes)
    }
}

// --- Offline queue ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedComplaint {
    pub offline_id: OfflineId,
    pub submission: ComplaintSubmission,
    pub sync_status: SyncStatus,
    pub queued_at: UnixTimeMs,
    pub attempts: u32,
    pub last_attempt_at: Option<UnixTimeMs>,
    pub next_retry_at: Option<UnixTimeMs>,
    pub last_error: Option<String>,
    /// Matches the server reported on create. Redelivery waits for the
    /// user while this is non-empty.
    #[serde(default)]
    pub duplicates: Vec<DuplicateCandidate>,
    pub complaint_id: Option<ComplaintId>,
}

impl QueuedComplaint {
    fn new(offline_id: OfflineId, submission: ComplaintSubmission, now: UnixTimeMs) -> Self {
        Self {
            offline_id,
            submission,
            sync_status: SyncStatus::Pending,
            queued_at: now,
            attempts: 0,
            last_attempt_at: None,
            next_retry_at: None,
            last_error: None,
            duplicates: Vec::new(),
            complaint_id: None,
        }
    }

    /// Upper estimate of what this entry adds to the sealed queue.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        let submission = &self.submission;
        submission.photo.bytes().len()
            + submission.description.as_str().len()
            + submission.address.as_ref().map_or(0, String::len)
            + self.last_error.as_ref().map_or(0, String::len)
            + self.duplicates.len() * 256
            + ENTRY_OVERHEAD_BYTES
    }

    pub fn mark_syncing(&mut self, now: UnixTimeMs) {
        self.sync_status = SyncStatus::Syncing;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
    }

    pub fn mark_synced(&mut self, complaint_id: ComplaintId) {
        self.sync_status = SyncStatus::Synced;
        self.complaint_id = Some(complaint_id);
        self.last_error = None;
        self.next_retry_at = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: UnixTimeMs, policy: &RetryPolicy) {
        self.sync_status = SyncStatus::Failed;
        self.last_error = Some(error.into());
        self.next_retry_at = Some(policy.next_retry_at(now, self.attempts.saturating_sub(1)));
    }

    pub fn mark_duplicate(&mut self, candidates: Vec<DuplicateCandidate>, message: Option<String>) {
        self.sync_status = SyncStatus::Failed;
        self.last_error =
            Some(message.unwrap_or_else(|| "A similar complaint already exists nearby".into()));
        self.duplicates = candidates;
        self.next_retry_at = None;
    }

    #[must_use]
    pub fn awaiting_confirmation(&self) -> bool {
        !self.duplicates.is_empty()
    }

    /// The user says the reported matches are a different problem. The
    /// next delivery carries the confirm flag.
    pub fn confirm_not_duplicate(&mut self) -> bool {
        if !self.awaiting_confirmation() {
            return false;
        }
        self.duplicates.clear();
        self.submission.confirm_not_duplicate = true;
        self.sync_status = SyncStatus::Pending;
        self.next_retry_at = None;
        true
    }

    /// Manual sync ignores backoff and the attempt bound, never a pending
    /// duplicate decision.
    #[must_use]
    pub fn is_due(&self, now: UnixTimeMs, policy: &RetryPolicy, manual: bool) -> bool {
        if !matches!(self.sync_status, SyncStatus::Pending | SyncStatus::Failed)
            || self.awaiting_confirmation()
        {
            return false;
        }
        if manual {
            return true;
        }
        policy.can_retry(self.attempts) && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedComplaint>,
}

impl OfflineQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered entries are dropped first when they stand in the way of
    /// the count or size limits.
    pub fn enqueue(
        &mut self,
        submission: ComplaintSubmission,
        now: UnixTimeMs,
    ) -> Result<OfflineId, StoreError> {
        let offline_id = OfflineId::generate();
        let entry = QueuedComplaint::new(offline_id.clone(), submission, now);

        if self.entries.len() >= MAX_QUEUED_COMPLAINTS
            || self.approx_size() + entry.approx_size() > QUEUE_PAYLOAD_BUDGET
        {
            self.cleanup_synced();
        }
        if self.entries.len() >= MAX_QUEUED_COMPLAINTS {
            return Err(StoreError::QueueFull {
                max: MAX_QUEUED_COMPLAINTS,
            });
        }
        let size = self.approx_size() + entry.approx_size();
        if size > QUEUE_PAYLOAD_BUDGET {
            return Err(StoreError::QueueTooLarge {
                size,
                max: QUEUE_PAYLOAD_BUDGET,
            });
        }

        self.entries.push_back(entry);
        Ok(offline_id)
    }

    #[must_use]
    pub fn approx_size(&self) -> usize {
        self.entries.iter().map(QueuedComplaint::approx_size).sum()
    }

    #[must_use]
    pub fn get(&self, id: &OfflineId) -> Option<&QueuedComplaint> {
        self.entries.iter().find(|e| &e.offline_id == id)
    }

    pub fn get_mut(&mut self, id: &OfflineId) -> Option<&mut QueuedComplaint> {
        self.entries.iter_mut().find(|e| &e.offline_id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedComplaint> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    #[must_use]
    pub fn due_for_sync(&self, now: UnixTimeMs, policy: &RetryPolicy, manual: bool) -> Vec<OfflineId> {
        self.entries
            .iter()
            .filter(|e| e.is_due(now, policy, manual))
            .map(|e| e.offline_id.clone())
            .collect()
    }

    /// Drops delivered entries. Returns how many went.
    pub fn cleanup_synced(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.sync_status != SyncStatus::Synced);
        before - self.entries.len()
    }

    /// A sync cut short by a restart leaves entries in `Syncing`; they go
    /// back to pending.
    pub fn recover_interrupted(&mut self) -> usize {
        let mut recovered = 0;
        for entry in &mut self.entries {
            if entry.sync_status == SyncStatus::Syncing {
                entry.sync_status = SyncStatus::Pending;
                recovered += 1;
            }
        }
        recovered
    }

    /// Folds in entries loaded from storage that this queue does not know.
    /// Loaded entries keep their place ahead of ones queued since. Nothing
    /// is dropped, even past the enqueue limits.
    pub fn merge(&mut self, loaded: OfflineQueue) {
        let mut merged: VecDeque<QueuedComplaint> = loaded
            .entries
            .into_iter()
            .filter(|e| self.get(&e.offline_id).is_none())
            .collect();
        merged.extend(self.entries.drain(..));
        self.entries = merged;
    }

    #[must_use]
    pub fn counts(&self) -> QueueCounts {
        self.entries
            .iter()
            .fold(QueueCounts::default(), |mut counts, e| {
                match e.sync_status {
                    SyncStatus::Pending => counts.pending += 1,
                    SyncStatus::Syncing => counts.syncing += 1,
                    SyncStatus::Synced => counts.synced += 1,
                    SyncStatus::Failed => counts.failed += 1,
                }
                counts
            })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        seal(QUEUE_MAGIC, self)
    }

    /// A stored queue past the enqueue limits still loads: those limits
    /// stop new entries, they never discard accepted ones.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        open(QUEUE_MAGIC, bytes)
    }
}
