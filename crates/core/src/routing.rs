//! Sensor/actuator to edge-node routing table and migration planning.
//!
//! The table is a plain value. Shared holders publish a new table as a whole
//! (clone, mutate, swap) so readers never see a half-applied migration.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{ActuatorId, EdgeNodeId, ModelVersion, SensorId, SimTime};

// ---------------------------------------------------------------------------
// EdgeNode
// ---------------------------------------------------------------------------

/// An edge node and the devices routed through it.
///
/// Attachment sets keep insertion order; migration picks sensors in that
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeNode {
    pub id: EdgeNodeId,
    pub attached_sensor_ids: IndexSet<SensorId>,
    pub attached_actuator_ids: IndexSet<ActuatorId>,
    /// Last sampled load figure in `[0, 1]`.
    pub utilization: f64,
    pub model_version: ModelVersion,
}

impl EdgeNode {
    pub fn new(id: EdgeNodeId) -> Self {
        Self {
            id,
            attached_sensor_ids: IndexSet::new(),
            attached_actuator_ids: IndexSet::new(),
            utilization: 0.0,
            model_version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Migration and scaling records
// ---------------------------------------------------------------------------

/// Sensors (and their paired actuators) to move between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub source_node: EdgeNodeId,
    pub dest_node: EdgeNodeId,
    pub moved_sensor_ids: IndexSet<SensorId>,
    pub moved_actuator_ids: IndexSet<ActuatorId>,
}

/// The overload observation that caused a scale-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingTrigger {
    pub edge_node: EdgeNodeId,
    pub utilization: f64,
    pub timestamp: SimTime,
}

/// One scale-out: the trigger and the migration it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub trigger: ScalingTrigger,
    pub plan: MigrationPlan,
}

// ---------------------------------------------------------------------------
// RoutingTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingTable {
    nodes: BTreeMap<EdgeNodeId, EdgeNode>,
    sensor_gateway: HashMap<SensorId, EdgeNodeId>,
    actuator_gateway: HashMap<ActuatorId, EdgeNodeId>,
    actuator_for_sensor: HashMap<SensorId, ActuatorId>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty edge node.
    pub fn add_edge_node(&mut self, id: EdgeNodeId) -> Result<(), CoreError> {
        if self.nodes.contains_key(&id) {
            return Err(CoreError::Conflict(format!("edge node {id} already registered")));
        }
        self.nodes.insert(id, EdgeNode::new(id));
        Ok(())
    }

    /// Route a machine's sensor and actuator through `node`.
    pub fn attach_machine(
        &mut self,
        node: EdgeNodeId,
        sensor: SensorId,
        actuator: ActuatorId,
    ) -> Result<(), CoreError> {
        if self.sensor_gateway.contains_key(&sensor) {
            return Err(CoreError::Conflict(format!("sensor {sensor} already attached")));
        }
        let edge = self.nodes.get_mut(&node).ok_or(CoreError::NotFound {
            entity: "edge_node",
            id: node,
        })?;

        edge.attached_sensor_ids.insert(sensor);
        edge.attached_actuator_ids.insert(actuator);
        self.sensor_gateway.insert(sensor, node);
        self.actuator_gateway.insert(actuator, node);
        self.actuator_for_sensor.insert(sensor, actuator);
        Ok(())
    }

    pub fn node(&self, id: EdgeNodeId) -> Option<&EdgeNode> {
        self.nodes.get(&id)
    }

    /// Node ids in ascending order.
    pub fn node_ids(&self) -> Vec<EdgeNodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edge node a sensor currently reports through.
    pub fn gateway_of(&self, sensor: SensorId) -> Option<EdgeNodeId> {
        self.sensor_gateway.get(&sensor).copied()
    }

    /// Edge node an actuator currently receives commands through.
    pub fn actuator_gateway_of(&self, actuator: ActuatorId) -> Option<EdgeNodeId> {
        self.actuator_gateway.get(&actuator).copied()
    }

    /// Actuator paired with a sensor.
    pub fn actuator_for(&self, sensor: SensorId) -> Option<ActuatorId> {
        self.actuator_for_sensor.get(&sensor).copied()
    }

    /// Sum of attached sensors over every node.
    pub fn total_sensor_count(&self) -> usize {
        self.nodes.values().map(|n| n.attached_sensor_ids.len()).sum()
    }

    pub fn set_utilization(&mut self, id: EdgeNodeId, utilization: f64) -> Result<(), CoreError> {
        self.node_mut(id)?.utilization = utilization;
        Ok(())
    }

    pub fn set_model_version(
        &mut self,
        id: EdgeNodeId,
        version: ModelVersion,
    ) -> Result<(), CoreError> {
        self.node_mut(id)?.model_version = version;
        Ok(())
    }

    /// Pick the first half (rounded down) of `source`'s sensors, in
    /// insertion order, to move to `dest`.
    pub fn plan_migration(
        &self,
        source: EdgeNodeId,
        dest: EdgeNodeId,
    ) -> Result<MigrationPlan, CoreError> {
        if source == dest {
            return Err(CoreError::Validation(format!(
                "cannot migrate edge node {source} onto itself"
            )));
        }
        let node = self.nodes.get(&source).ok_or(CoreError::NotFound {
            entity: "edge_node",
            id: source,
        })?;

        let count = node.attached_sensor_ids.len() / 2;
        let moved_sensor_ids: IndexSet<SensorId> =
            node.attached_sensor_ids.iter().take(count).copied().collect();
        let moved_actuator_ids = moved_sensor_ids
            .iter()
            .filter_map(|s| self.actuator_for(*s))
            .filter(|a| node.attached_actuator_ids.contains(a))
            .collect();

        Ok(MigrationPlan {
            source_node: source,
            dest_node: dest,
            moved_sensor_ids,
            moved_actuator_ids,
        })
    }

    /// Move every device in `plan` from its source to its destination.
    ///
    /// Both nodes must exist and the plan's devices must still be attached
    /// to the source; nothing is changed otherwise.
    pub fn apply_migration(&mut self, plan: &MigrationPlan) -> Result<(), CoreError> {
        self.node(plan.dest_node).ok_or(CoreError::NotFound {
            entity: "edge_node",
            id: plan.dest_node,
        })?;
        let source = self.node(plan.source_node).ok_or(CoreError::NotFound {
            entity: "edge_node",
            id: plan.source_node,
        })?;
        if let Some(stray) = plan
            .moved_sensor_ids
            .iter()
            .find(|s| !source.attached_sensor_ids.contains(*s))
        {
            return Err(CoreError::Validation(format!(
                "sensor {stray} is not attached to edge node {}",
                plan.source_node
            )));
        }

        let source = self.node_mut(plan.source_node)?;
        for sensor in &plan.moved_sensor_ids {
            source.attached_sensor_ids.shift_remove(sensor);
        }
        for actuator in &plan.moved_actuator_ids {
            source.attached_actuator_ids.shift_remove(actuator);
        }

        let dest = self.node_mut(plan.dest_node)?;
        dest.attached_sensor_ids.extend(plan.moved_sensor_ids.iter().copied());
        dest.attached_actuator_ids.extend(plan.moved_actuator_ids.iter().copied());

        for sensor in &plan.moved_sensor_ids {
            self.sensor_gateway.insert(*sensor, plan.dest_node);
        }
        for actuator in &plan.moved_actuator_ids {
            self.actuator_gateway.insert(*actuator, plan.dest_node);
        }
        Ok(())
    }

    fn node_mut(&mut self, id: EdgeNodeId) -> Result<&mut EdgeNode, CoreError> {
        self.nodes.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "edge_node",
            id,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    /// One node carrying machines `1..=n`.
    fn table_with_machines(n: u32) -> RoutingTable {
        let mut table = RoutingTable::new();
        table.add_edge_node(1).unwrap();
        for m in 1..=n {
            table.attach_machine(1, m, m).unwrap();
        }
        table
    }

    // -- registration ---------------------------------------------------------

    #[test]
    fn attach_sets_both_gateways() {
        let table = table_with_machines(2);
        assert_eq!(table.gateway_of(2), Some(1));
        assert_eq!(table.actuator_gateway_of(2), Some(1));
        assert_eq!(table.actuator_for(2), Some(2));
        assert_eq!(table.total_sensor_count(), 2);
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let mut table = table_with_machines(1);
        assert_matches!(table.add_edge_node(1), Err(CoreError::Conflict(_)));
        assert_matches!(table.attach_machine(1, 1, 1), Err(CoreError::Conflict(_)));
    }

    #[test]
    fn attach_to_unknown_node_fails() {
        let mut table = RoutingTable::new();
        assert_matches!(
            table.attach_machine(9, 1, 1),
            Err(CoreError::NotFound { id: 9, .. })
        );
    }

    // -- migration ------------------------------------------------------------

    #[test]
    fn plan_takes_first_half_in_insertion_order() {
        let mut table = RoutingTable::new();
        table.add_edge_node(1).unwrap();
        for m in [5, 3, 9, 1, 7] {
            table.attach_machine(1, m, m).unwrap();
        }
        let plan = table.plan_migration(1, 2).unwrap();
        assert_eq!(plan.moved_sensor_ids.iter().copied().collect::<Vec<_>>(), vec![5, 3]);
        assert_eq!(plan.moved_actuator_ids.iter().copied().collect::<Vec<_>>(), vec![5, 3]);
    }

    #[test]
    fn single_sensor_node_moves_nothing() {
        let table = table_with_machines(1);
        let plan = table.plan_migration(1, 2).unwrap();
        assert!(plan.moved_sensor_ids.is_empty());
    }

    #[test]
    fn apply_moves_sensors_and_actuators_together() {
        let mut table = table_with_machines(4);
        table.add_edge_node(2).unwrap();
        let plan = table.plan_migration(1, 2).unwrap();
        table.apply_migration(&plan).unwrap();

        for m in [1, 2] {
            assert_eq!(table.gateway_of(m), Some(2));
            assert_eq!(table.actuator_gateway_of(m), Some(2));
        }
        for m in [3, 4] {
            assert_eq!(table.gateway_of(m), Some(1));
        }
        let source = table.node(1).unwrap();
        assert_eq!(source.attached_sensor_ids.len(), 2);
        assert_eq!(source.attached_actuator_ids.len(), 2);
    }

    #[test]
    fn migration_preserves_total_sensor_count() {
        for n in 0..9 {
            let mut table = table_with_machines(n);
            table.add_edge_node(2).unwrap();
            let before = table.total_sensor_count();

            let plan = table.plan_migration(1, 2).unwrap();
            table.apply_migration(&plan).unwrap();

            assert_eq!(table.total_sensor_count(), before);
            assert_eq!(table.node(2).unwrap().attached_sensor_ids.len(), (n / 2) as usize);
        }
    }

    #[test]
    fn apply_to_missing_destination_changes_nothing() {
        let mut table = table_with_machines(4);
        let before = table.clone();
        let plan = table.plan_migration(1, 2).unwrap();
        assert_matches!(
            table.apply_migration(&plan),
            Err(CoreError::NotFound { id: 2, .. })
        );
        assert_eq!(table, before);
    }

    #[test]
    fn stale_plan_is_rejected() {
        let mut table = table_with_machines(4);
        table.add_edge_node(2).unwrap();
        let plan = table.plan_migration(1, 2).unwrap();
        table.apply_migration(&plan).unwrap();
        assert_matches!(table.apply_migration(&plan), Err(CoreError::Validation(_)));
    }

    #[test]
    fn self_migration_is_invalid() {
        let table = table_with_machines(2);
        assert_matches!(table.plan_migration(1, 1), Err(CoreError::Validation(_)));
    }
}
