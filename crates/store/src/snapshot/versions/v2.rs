use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: &str = "v2";

/// Per-path snapshot with a status-tagged union, the format that preceded
/// canonical repository identities. Also the shape of the backward-compatible
/// per-path view derived from v3 state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2Snapshot {
    pub format_version: String,
    #[serde(default)]
    pub codebases: BTreeMap<String, CodebaseInfo>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CodebaseInfo {
    Indexed {
        #[serde(default)]
        indexed_files: usize,
        #[serde(default)]
        total_chunks: usize,
        #[serde(default)]
        last_indexed: Option<String>,
    },
    Indexing {
        #[serde(default)]
        indexing_percentage: Option<f32>,
    },
    #[serde(rename = "indexfailed")]
    IndexFailed {
        #[serde(default)]
        error_message: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tag_dispatches_variants() {
        let raw = r#"{
            "formatVersion": "v2",
            "codebases": {
                "/tmp/a": {"status":"indexed","indexedFiles":10,"totalChunks":120},
                "/tmp/b": {"status":"indexing","indexingPercentage":55.5},
                "/tmp/c": {"status":"indexfailed","errorMessage":"boom"}
            },
            "lastUpdated": "2024-06-01T00:00:00Z"
        }"#;
        let snap: V2Snapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snap.codebases.len(), 3);
        assert!(matches!(
            snap.codebases["/tmp/a"],
            CodebaseInfo::Indexed { indexed_files: 10, total_chunks: 120, .. }
        ));
        assert!(matches!(
            snap.codebases["/tmp/b"],
            CodebaseInfo::Indexing { indexing_percentage: Some(p) } if (p - 55.5).abs() < f32::EPSILON
        ));
        assert!(matches!(
            snap.codebases["/tmp/c"],
            CodebaseInfo::IndexFailed { ref error_message } if error_message.as_deref() == Some("boom")
        ));
    }

    #[test]
    fn absent_optional_fields_default() {
        let raw = r#"{"formatVersion":"v2","codebases":{"/tmp/a":{"status":"indexed"}}}"#;
        let snap: V2Snapshot = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            snap.codebases["/tmp/a"],
            CodebaseInfo::Indexed { indexed_files: 0, total_chunks: 0, .. }
        ));
    }
}
