//! Content-addressed schedule cache.
//!
//! The document is re-read on every [`ScheduleStore::refresh`], hashed with
//! SHA-256, and only reparsed when the hash differs from the last one seen.
//! A document that fails to parse never replaces a good cache.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::document::ScheduleDocument;
use crate::error::Result;
use crate::recurrence::{Occurrence, Schedule};

/// Health of the cached schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StoreStatus {
    /// Nothing loaded yet.
    Empty,
    /// The cache reflects the current document.
    Ready,
    /// The document could not be read this refresh; no occurrences are
    /// reported until it is readable again.
    Unavailable { error: String },
    /// The current document is malformed; the previous cache is still served.
    Degraded { error: String },
}

struct Inner {
    hash: Option<String>,
    /// Parse error for the document behind `hash`, if it was malformed.
    parse_error: Option<String>,
    schedule: Arc<Schedule>,
    status: StoreStatus,
}

/// Schedule document cache keyed by the SHA-256 of the file's bytes.
pub struct ScheduleStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Inner {
                hash: None,
                parse_error: None,
                schedule: Arc::new(Schedule::default()),
                status: StoreStatus::Empty,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the document. Returns `true` if the cached rules were rebuilt.
    ///
    /// Never fails: unreadable files and malformed documents are reported
    /// through [`status`](Self::status) and logged.
    pub fn refresh(&self) -> bool {
        match std::fs::read(&self.path) {
            Ok(bytes) => self.load_bytes(&bytes),
            Err(e) => {
                let mut inner = self.inner.lock().expect("schedule store lock poisoned");
                let error = e.to_string();
                if !matches!(&inner.status, StoreStatus::Unavailable { error: prev } if *prev == error)
                {
                    warn!(path = %self.path.display(), error = %error, "schedule document unreadable");
                }
                inner.status = StoreStatus::Unavailable { error };
                false
            }
        }
    }

    /// Load a document from raw bytes. Returns `true` if the rules were rebuilt.
    pub fn load_bytes(&self, bytes: &[u8]) -> bool {
        let hash = content_hash(bytes);
        let mut inner = self.inner.lock().expect("schedule store lock poisoned");

        if inner.hash.as_deref() == Some(hash.as_str()) {
            if matches!(inner.status, StoreStatus::Unavailable { .. }) {
                // Readable again with unchanged content.
                inner.status = match &inner.parse_error {
                    Some(error) => StoreStatus::Degraded {
                        error: error.clone(),
                    },
                    None => StoreStatus::Ready,
                };
            }
            debug!(hash = %hash, "schedule unchanged");
            return false;
        }

        // Stored up front so a malformed document warns once per content.
        inner.hash = Some(hash.clone());
        match parse(bytes) {
            Ok(schedule) => {
                info!(
                    hash = %hash,
                    rule_sets = schedule.rule_sets().len(),
                    timezone = %schedule.zone(),
                    "schedule rebuilt"
                );
                inner.schedule = Arc::new(schedule);
                inner.parse_error = None;
                inner.status = StoreStatus::Ready;
                true
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    hash = %hash,
                    error = %e,
                    "schedule document invalid, keeping previous rules"
                );
                inner.parse_error = Some(e.to_string());
                inner.status = StoreStatus::Degraded {
                    error: e.to_string(),
                };
                false
            }
        }
    }

    pub fn status(&self) -> StoreStatus {
        self.inner
            .lock()
            .expect("schedule store lock poisoned")
            .status
            .clone()
    }

    /// Hash of the last document seen, valid or not.
    pub fn content_hash(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("schedule store lock poisoned")
            .hash
            .clone()
    }

    /// The currently served schedule, or `None` while the document is unreadable.
    pub fn schedule(&self) -> Option<Arc<Schedule>> {
        let inner = self.inner.lock().expect("schedule store lock poisoned");
        match inner.status {
            StoreStatus::Unavailable { .. } => None,
            _ => Some(Arc::clone(&inner.schedule)),
        }
    }

    /// Earliest occurrence of each rule-set plus every inclusion at or after
    /// `threshold`, sorted ascending.
    pub fn due_candidates(&self, threshold: DateTime<Utc>) -> Vec<Occurrence> {
        self.schedule()
            .map(|s| s.due_candidates(threshold))
            .unwrap_or_default()
    }

    pub fn next_occurrence(&self, threshold: DateTime<Utc>) -> Option<Occurrence> {
        self.due_candidates(threshold).into_iter().next()
    }

    /// The next `n` occurrences at or after `threshold`.
    pub fn upcoming(&self, threshold: DateTime<Utc>, n: usize) -> Vec<Occurrence> {
        self.schedule()
            .map(|s| s.upcoming(threshold, n))
            .unwrap_or_default()
    }
}

fn parse(bytes: &[u8]) -> Result<Schedule> {
    let doc: ScheduleDocument = serde_json::from_slice(bytes)?;
    Schedule::compile(&doc)
}
