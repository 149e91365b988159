//! Runtime state of each edge node: its model slot and its load gauge.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use arc_swap::ArcSwap;

use fogpdm_core::types::{EdgeNodeId, ModelVersion};
use fogpdm_inference::model::{ModelSlot, VersionedModel};

/// One edge node as seen by the dispatcher.
#[derive(Debug)]
pub struct EdgeRuntime {
    pub id: EdgeNodeId,
    pub model: ModelSlot,
    in_flight: AtomicUsize,
    /// Highest `in_flight` since the last load sample.
    peak_in_flight: AtomicUsize,
    handled: AtomicU64,
}

impl EdgeRuntime {
    fn new(id: EdgeNodeId, model: VersionedModel) -> Self {
        Self {
            id,
            model: ModelSlot::new(model),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            handled: AtomicU64::new(0),
        }
    }

    /// Mark one dispatch as running on this node until the guard drops.
    pub fn begin(self: &Arc<Self>) -> InFlightGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            node: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Dispatches started on this node so far.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Peak concurrency since the previous call, then restart the window at
    /// the current level.
    fn take_peak(&self) -> usize {
        let current = self.in_flight.load(Ordering::SeqCst);
        self.peak_in_flight.swap(current, Ordering::SeqCst).max(current)
    }
}

pub struct InFlightGuard {
    node: Arc<EdgeRuntime>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.node.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// EdgeFleet
// ---------------------------------------------------------------------------

/// All edge nodes that exist at runtime.
///
/// Nodes added after start receive the newest edge model seen by
/// [`EdgeFleet::install_model`].
pub struct EdgeFleet {
    nodes: RwLock<BTreeMap<EdgeNodeId, Arc<EdgeRuntime>>>,
    latest_model: ArcSwap<VersionedModel>,
    capacity: u32,
}

impl EdgeFleet {
    /// `capacity` is the concurrent dispatch count that means full load.
    pub fn new(capacity: u32) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            latest_model: ArcSwap::from_pointee(VersionedModel::initial()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Register `id`, or return it if already present.
    pub fn add_node(&self, id: EdgeNodeId) -> Arc<EdgeRuntime> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let latest = VersionedModel::clone(&self.latest_model.load());
        Arc::clone(
            nodes
                .entry(id)
                .or_insert_with(|| Arc::new(EdgeRuntime::new(id, latest))),
        )
    }

    pub fn node(&self, id: EdgeNodeId) -> Option<Arc<EdgeRuntime>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn node_ids(&self) -> Vec<EdgeNodeId> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Remember `model` as the newest edge model (if it is newer) so that
    /// nodes provisioned later start with it.
    pub fn record_latest(&self, model: &VersionedModel) {
        let model = Arc::new(model.clone());
        self.latest_model.rcu(|current| {
            if model.version > current.version {
                Arc::clone(&model)
            } else {
                Arc::clone(current)
            }
        });
    }

    pub fn latest_version(&self) -> ModelVersion {
        self.latest_model.load().version
    }

    /// Install `model` on node `id`. Returns whether the node took it.
    pub fn install_model(&self, id: EdgeNodeId, model: VersionedModel) -> bool {
        self.record_latest(&model);
        self.node(id).is_some_and(|node| node.model.replace(model))
    }
}

// ---------------------------------------------------------------------------
// Load measurement
// ---------------------------------------------------------------------------

/// Supplies the 0..1 load figure the scaling controller samples.
pub trait LoadProbe: Send + Sync {
    fn sample(&self, node: EdgeNodeId) -> f64;
}

/// Load as peak concurrent dispatches over node capacity since the last
/// sample, capped at 1.
pub struct InFlightLoadProbe {
    fleet: Arc<EdgeFleet>,
}

impl InFlightLoadProbe {
    pub fn new(fleet: Arc<EdgeFleet>) -> Self {
        Self { fleet }
    }
}

impl LoadProbe for InFlightLoadProbe {
    fn sample(&self, node: EdgeNodeId) -> f64 {
        let Some(runtime) = self.fleet.node(node) else {
            return 0.0;
        };
        let peak = runtime.take_peak() as f64;
        (peak / f64::from(self.fleet.capacity())).min(1.0)
    }
}
