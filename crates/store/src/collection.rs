//! Collection naming and the legacy-name migration ledger.
//!
//! Collection names are the join point between the registry and the vector
//! store, and the truncated-MD5 forms below are a compatibility contract:
//! changing either truncation would orphan every existing index.
//!
//! Pre-identity versions of the service named collections after a hash of
//! the absolute filesystem path. `resolve_collection_name` keeps those
//! collections reachable (and records a rename mapping) while new indices
//! get canonical-identity names that are shared across clones and worktrees.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LEDGER_FORMAT_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn prefix(hybrid: bool) -> &'static str {
    if hybrid { "hybrid_code_chunks_" } else { "code_chunks_" }
}

/// Pre-identity name: `[hybrid_]code_chunks_<md5(absolute_path)[0..8]>`.
pub fn legacy_collection_name(absolute_path: &Path, hybrid: bool) -> String {
    let digest = md5_hex(&utils::path::path_key(absolute_path));
    format!("{}{}", prefix(hybrid), &digest[..8])
}

/// Identity name: `[hybrid_]code_chunks_<md5(canonical_id)[0..12]>`.
pub fn canonical_collection_name(canonical_id: &str, hybrid: bool) -> String {
    let digest = md5_hex(canonical_id);
    format!("{}{}", prefix(hybrid), &digest[..12])
}

/// True for any name either naming scheme could have produced; used to
/// recognize our collections in a live store enumeration.
pub fn is_service_collection(name: &str) -> bool {
    name.strip_prefix("hybrid_code_chunks_")
        .or_else(|| name.strip_prefix("code_chunks_"))
        .is_some_and(|suffix| {
            (suffix.len() == 8 || suffix.len() == 12)
                && suffix.chars().all(|c| c.is_ascii_hexdigit())
        })
}

#[derive(Debug, Clone)]
pub struct CollectionNameResolution {
    pub name: String,
    pub is_legacy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationMapping {
    pub old_name: String,
    pub new_name: String,
    pub canonical_id: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub migrated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
}

/// Persisted list of legacy→canonical rename mappings, versioned like the
/// snapshot so the format can grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationLedger {
    pub format_version: String,
    pub mappings: Vec<MigrationMapping>,
    #[serde(skip)]
    path: PathBuf,
}

impl MigrationLedger {
    /// Load the ledger, or start empty when the file is missing or corrupt.
    pub fn load(path: PathBuf) -> Self {
        let mut ledger = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<MigrationLedger>(&raw).unwrap_or_else(|e| {
                tracing::warn!("Migration ledger {} is corrupt ({e}); starting empty", path.display());
                Self::empty()
            }),
            Err(_) => Self::empty(),
        };
        ledger.path = path;
        ledger
    }

    fn empty() -> Self {
        Self {
            format_version: LEDGER_FORMAT_VERSION.to_string(),
            mappings: Vec::new(),
            path: PathBuf::new(),
        }
    }

    pub fn save(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Record a pending rename; repeated observations of the same pair are
    /// collapsed onto the first.
    pub fn record(&mut self, old_name: &str, new_name: &str, canonical_id: &str, path: &Path) {
        if self
            .mappings
            .iter()
            .any(|m| m.old_name == old_name && m.new_name == new_name)
        {
            return;
        }
        self.mappings.push(MigrationMapping {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
            canonical_id: canonical_id.to_string(),
            path: utils::path::path_key(path),
            created_at: Utc::now(),
            migrated: false,
            migrated_at: None,
        });
    }

    pub fn pending(&self) -> impl Iterator<Item = &MigrationMapping> {
        self.mappings.iter().filter(|m| !m.migrated)
    }

    pub fn mark_migrated(&mut self, old_name: &str) {
        for mapping in &mut self.mappings {
            if mapping.old_name == old_name && !mapping.migrated {
                mapping.migrated = true;
                mapping.migrated_at = Some(Utc::now());
            }
        }
    }
}

/// Pick the collection name for a repository given the collections that
/// currently exist in the vector store. Legacy names win while they exist
/// so established indices keep working; everything else resolves to the
/// canonical name, which is also the name new collections are created under.
pub fn resolve_collection_name(
    absolute_path: &Path,
    canonical_id: &str,
    existing: &HashSet<String>,
    hybrid: bool,
    ledger: &mut MigrationLedger,
) -> CollectionNameResolution {
    let legacy = legacy_collection_name(absolute_path, hybrid);
    let canonical = canonical_collection_name(canonical_id, hybrid);

    if existing.contains(&legacy) {
        ledger.record(&legacy, &canonical, canonical_id, absolute_path);
        return CollectionNameResolution {
            name: legacy,
            is_legacy: true,
        };
    }

    CollectionNameResolution {
        name: canonical,
        is_legacy: false,
    }
}
