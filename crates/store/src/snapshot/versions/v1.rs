use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The original flat snapshot: two path lists and no per-repo state.
/// `indexingCodebases` shipped in two shapes over its lifetime, a bare list
/// and a path→percentage map; both must parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Snapshot {
    #[serde(default)]
    pub indexed_codebases: Vec<String>,
    #[serde(default)]
    pub indexing_codebases: V1Indexing,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum V1Indexing {
    List(Vec<String>),
    Progress(BTreeMap<String, f32>),
}

impl Default for V1Indexing {
    fn default() -> Self {
        V1Indexing::List(Vec::new())
    }
}

impl V1Indexing {
    /// Collapse both historical shapes to path→percentage.
    pub fn as_progress(&self) -> BTreeMap<String, f32> {
        match self {
            V1Indexing::List(paths) => paths.iter().map(|p| (p.clone(), 0.0)).collect(),
            V1Indexing::Progress(map) => map.clone(),
        }
    }
}
