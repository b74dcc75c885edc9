//! One-shot migration of legacy path-hash collections to canonical names.

use tracing::{info, warn};

use super::{context::AppContext, vector_store::VectorStoreError};

/// Walk unmigrated ledger mappings and rename the collections in the vector
/// store. Idempotent: a mapping whose old collection is already gone is
/// stamped migrated, and failures leave it pending for the next run.
pub async fn run_pending_migrations(ctx: &AppContext) {
    let mut ledger = ctx.migration_ledger().lock().await;
    let pending: Vec<(String, String)> = ledger
        .pending()
        .map(|m| (m.old_name.clone(), m.new_name.clone()))
        .collect();
    if pending.is_empty() {
        return;
    }

    let store = ctx.vector_store();
    let mut migrated_any = false;
    for (old, new) in pending {
        match store.has_collection(&old).await {
            Ok(false) => {
                // Already renamed (or dropped) by a previous run.
                ledger.mark_migrated(&old);
                migrated_any = true;
            }
            Ok(true) => match store.rename_collection(&old, &new).await {
                Ok(()) => {
                    info!(old = %old, new = %new, "Migrated collection to canonical name");
                    ledger.mark_migrated(&old);
                    migrated_any = true;
                }
                Err(VectorStoreError::Unsupported(op)) => {
                    warn!(old = %old, "Store does not support {op}; leaving mapping pending");
                }
                Err(e) => {
                    warn!(old = %old, "Collection migration failed: {e}");
                }
            },
            Err(e) => {
                warn!(old = %old, "Could not check collection existence: {e}");
            }
        }
    }

    if migrated_any && let Err(e) = ledger.save() {
        warn!("Failed to persist migration ledger: {e}");
    }
}
