//! Content-addressed store of files already handed to the sink.
//!
//! Two fingerprints identify a file: one derived from its declared metadata
//! (known before any request) and one derived from the downloaded bytes. Both
//! are recorded on handoff. Concurrent checks are best-effort: two tasks for
//! equivalent content may both pass `check` before either records.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::model::WorkFile;

/// SHA-256 key used by the [`Deduplicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of a file's declared identity (work, page, kind).
    #[must_use]
    pub fn of_file(file: &WorkFile) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"meta\0");
        hasher.update(file.work_id.as_bytes());
        hasher.update([0]);
        hasher.update(file.index.to_le_bytes());
        hasher.update(file.kind.to_string().as_bytes());
        Self(hasher.finalize().into())
    }

    /// Fingerprint of downloaded content.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"body\0");
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Thread-safe duplicate store. Lives for the whole process.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: DashMap<Fingerprint, String>,
}

impl Deduplicator {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the file's declared identity was already saved.
    #[must_use]
    pub fn check(&self, file: &WorkFile) -> bool {
        self.contains(&Fingerprint::of_file(file))
    }

    /// Returns `true` when the fingerprint was already recorded.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        let owner = self.owner(fingerprint);
        if let Some(owner) = &owner {
            trace!(%fingerprint, owner = %owner, "duplicate fingerprint");
        }
        owner.is_some()
    }

    /// Id of the file that first recorded `fingerprint`.
    #[must_use]
    pub fn owner(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.seen.get(fingerprint).map(|owner| owner.value().clone())
    }

    /// Records a fingerprint for `id`. Returns `false` when it was already
    /// present; the first owner is kept.
    pub fn record(&self, fingerprint: Fingerprint, id: &str) -> bool {
        match self.seen.entry(fingerprint) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(id.to_string());
                debug!(%fingerprint, id, "recorded fingerprint");
                true
            }
        }
    }

    /// Number of recorded fingerprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forgets every fingerprint.
    pub fn clear(&self) {
        self.seen.clear();
    }
}
