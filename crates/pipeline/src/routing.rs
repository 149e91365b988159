//! Shared routing table, published as whole snapshots.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use fogpdm_core::error::CoreError;
use fogpdm_core::routing::RoutingTable;

/// Holder of the current [`RoutingTable`].
///
/// Readers take one snapshot at dispatch start and route the whole reading
/// with it. Writers clone the current table, mutate the clone and publish it
/// in a single swap; a failed update publishes nothing.
pub struct RoutingHandle {
    table: ArcSwap<RoutingTable>,
    writer: Mutex<()>,
}

impl RoutingHandle {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    /// Apply `f` to a copy of the current table and publish the copy if `f`
    /// succeeds. Concurrent writers are serialised.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut RoutingTable) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = RoutingTable::clone(&self.table.load());
        let out = f(&mut next)?;
        self.table.store(Arc::new(next));
        Ok(out)
    }
}

impl Default for RoutingHandle {
    fn default() -> Self {
        Self::new(RoutingTable::new())
    }
}
