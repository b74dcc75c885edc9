//! Authoritative record of which repositories have an index.
//!
//! The snapshot module owns the versioned on-disk format (v1/v2 accepted,
//! v3 written); the registry is the in-memory index rebuilt from it at
//! startup; collection naming is the compatibility layer that keeps
//! pre-identity path-hash collections reachable.

pub mod collection;
pub mod registry;
pub mod snapshot;

pub use registry::{RegisterOptions, Registry, RegistryError, ResolveOutcome};
pub use snapshot::versions::v3::{BranchState, BranchStatus, RepoRecord, V3Snapshot};
pub use snapshot::{SnapshotError, SnapshotStore};
