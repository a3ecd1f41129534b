//! The bidirectional ledger mapping every captured remote identity to
//! its allocated local path. Built during phase 1, read-only during
//! phase 2, persisted as JSON next to the mirrored tree.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Duplicate remote identity: {0}")]
    DuplicateRemote(String),

    #[error("Local path already mapped: {0}")]
    DuplicateLocal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Page,
    Asset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Canonical remote URL
    pub remote: String,
    /// Path relative to the run directory
    pub local: String,
    pub kind: EntryKind,
    /// Pages carry their discovery depth so a later rewrite pass can
    /// recompute relative prefixes without re-crawling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    /// Set when the allocator moved the entry into the overflow
    /// directory because its natural path collided.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub demoted: bool,
}

/// Serialized form of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Seed URL the run was captured from
    pub seed: String,
    pub created_at: String,
    pub entries: Vec<ManifestEntry>,
    /// Alternate spellings (query-stripped asset URLs) -> canonical remote
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

/// In-memory ledger. The mapping is injective: two distinct canonical
/// URLs never resolve to the same local path. The allocator resolves
/// collisions before insertion; a duplicate here is a programming
/// error surfaced as `ManifestError`.
#[derive(Debug, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    by_remote: HashMap<String, usize>,
    locals: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ManifestEntry) -> Result<(), ManifestError> {
        if self.by_remote.contains_key(&entry.remote) {
            return Err(ManifestError::DuplicateRemote(entry.remote));
        }
        if !self.locals.insert(entry.local.clone()) {
            return Err(ManifestError::DuplicateLocal(entry.local));
        }
        self.by_remote.insert(entry.remote.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Record an alternate remote spelling for an already-inserted
    /// entry, keeping the forward mapping itself injective.
    pub fn add_alias(&mut self, alias: String, canonical: String) {
        if alias != canonical && !self.by_remote.contains_key(&alias) {
            self.aliases.insert(alias, canonical);
        }
    }

    pub fn contains(&self, remote: &str) -> bool {
        self.lookup(remote).is_some()
    }

    /// Resolve a canonical remote URL (or a recorded alias) to its
    /// local path.
    pub fn lookup(&self, remote: &str) -> Option<&str> {
        let idx = match self.by_remote.get(remote) {
            Some(idx) => *idx,
            None => {
                let canonical = self.aliases.get(remote)?;
                *self.by_remote.get(canonical)?
            }
        };
        Some(self.entries[idx].local.as_str())
    }

    pub fn get(&self, remote: &str) -> Option<&ManifestEntry> {
        self.by_remote.get(remote).map(|idx| &self.entries[*idx])
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn pages(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::Page)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P, seed: &str) -> Result<(), ManifestError> {
        let file = ManifestFile {
            seed: seed.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            entries: self.entries.clone(),
            aliases: self.aliases.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<(Self, String), ManifestError> {
        let json = std::fs::read_to_string(path)?;
        let file: ManifestFile = serde_json::from_str(&json)?;
        let mut manifest = Self::new();
        for entry in file.entries {
            manifest.insert(entry)?;
        }
        for (alias, canonical) in file.aliases {
            manifest.add_alias(alias, canonical);
        }
        Ok((manifest, file.seed))
    }
}
