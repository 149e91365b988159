/// Machines are numbered from 1. A machine's sensor and actuator carry the
/// machine's number, so `SensorId`, `ActuatorId` and `MachineId` coincide.
pub type MachineId = u32;

pub type SensorId = u32;

pub type ActuatorId = u32;

/// Edge nodes are numbered from 1 in provisioning order.
pub type EdgeNodeId = u32;

/// Simulated time in seconds since the run started.
pub type SimTime = f64;

/// Model versions grow monotonically across the run; 0 means "initial model".
pub type ModelVersion = u64;
