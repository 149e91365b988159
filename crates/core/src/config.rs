//! Run configuration.
//!
//! Values are layered: built-in defaults, then a `key=value` properties
//! file, then environment variables. A bad value at any layer is logged and
//! the value from the layer below is kept, so loading never fails.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the properties file.
pub const CONFIG_PATH_VAR: &str = "FOGPDM_CONFIG";

/// Properties file used when [`CONFIG_PATH_VAR`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.properties";

// ---------------------------------------------------------------------------
// ModelSyncMode
// ---------------------------------------------------------------------------

/// What triggers a retrain-and-broadcast cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSyncMode {
    /// After `retrain_sample_count` new labeled cloud-side samples.
    Samples,
    /// Every `model_update_interval`, provided at least one sample arrived.
    Interval,
}

impl FromStr for ModelSyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "samples" => Ok(Self::Samples),
            "interval" => Ok(Self::Interval),
            other => Err(format!("unknown model sync mode '{other}'")),
        }
    }
}

impl fmt::Display for ModelSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Samples => f.write_str("samples"),
            Self::Interval => f.write_str("interval"),
        }
    }
}

// ---------------------------------------------------------------------------
// FogConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FogConfig {
    pub num_machines: u32,
    pub initial_edge_count: u32,
    pub simulation_duration: Duration,
    /// Edge confidence at or above which the edge verdict is final.
    pub confidence_threshold: f64,
    /// Period of the scaling controller.
    pub monitor_interval: Duration,
    /// Utilization strictly above which an edge node scales out.
    pub load_threshold: f64,
    pub retrain_sample_count: usize,
    pub model_update_interval: Duration,
    pub sensor_interval: Duration,
    /// Concurrent dispatches an edge node handles at full load.
    pub edge_node_capacity: u32,
    pub inference_timeout: Duration,
    pub model_sync_mode: ModelSyncMode,
    pub edge_predictor_url: Option<String>,
    pub cloud_predictor_url: Option<String>,
    pub trainer_url: Option<String>,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            num_machines: 5,
            initial_edge_count: 1,
            simulation_duration: Duration::from_secs(100),
            confidence_threshold: 0.7,
            monitor_interval: Duration::from_secs(10),
            load_threshold: 0.8,
            retrain_sample_count: 50,
            model_update_interval: Duration::from_secs(30),
            sensor_interval: Duration::from_secs(1),
            edge_node_capacity: 4,
            inference_timeout: Duration::from_millis(5000),
            model_sync_mode: ModelSyncMode::Samples,
            edge_predictor_url: None,
            cloud_predictor_url: None,
            trainer_url: None,
        }
    }
}

impl FogConfig {
    /// Load from the properties file and the process environment.
    ///
    /// | Env Var                      | Properties key        | Default   |
    /// |------------------------------|-----------------------|-----------|
    /// | `NUM_MACHINES`               | `numMachines`         | `5`       |
    /// | `INITIAL_EDGE_COUNT`         | `initialNumEdges`     | `1`       |
    /// | `SIMULATION_DURATION_SECS`   | `simDuration`         | `100`     |
    /// | `CONFIDENCE_THRESHOLD`       | `confidenceThreshold` | `0.7`     |
    /// | `MONITOR_INTERVAL_SECS`      | `monitorInterval`     | `10`      |
    /// | `LOAD_THRESHOLD`             | `loadThreshold`       | `0.8`     |
    /// | `RETRAIN_SAMPLE_COUNT`       | `retrainSampleCount`  | `50`      |
    /// | `MODEL_UPDATE_INTERVAL_SECS` | `modelUpdateInterval` | `30`      |
    /// | `SENSOR_INTERVAL_SECS`       | `sensorInterval`      | `1`       |
    /// | `EDGE_NODE_CAPACITY`         | `edgeNodeCapacity`    | `4`       |
    /// | `INFERENCE_TIMEOUT_MS`       | `inferenceTimeoutMs`  | `5000`    |
    /// | `MODEL_SYNC_MODE`            | `modelSyncMode`       | `samples` |
    /// | `EDGE_PREDICTOR_URL`         | `edgePredictorUrl`    | unset     |
    /// | `CLOUD_PREDICTOR_URL`        | `cloudPredictorUrl`   | unset     |
    /// | `TRAINER_URL`                | `trainerUrl`          | unset     |
    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let props = read_properties_file(Path::new(&path));
        Self::from_sources(&props, |var| std::env::var(var).ok())
    }

    /// Resolve every option from parsed properties and an environment lookup.
    pub fn from_sources(
        props: &HashMap<String, String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let d = Self::default();
        let layers = Layers { props, env: &env };

        Self {
            num_machines: layers.resolve("numMachines", "NUM_MACHINES", d.num_machines, |v| *v > 0),
            initial_edge_count: layers.resolve(
                "initialNumEdges",
                "INITIAL_EDGE_COUNT",
                d.initial_edge_count,
                |v| *v > 0,
            ),
            simulation_duration: layers.resolve_secs(
                "simDuration",
                "SIMULATION_DURATION_SECS",
                d.simulation_duration,
            ),
            confidence_threshold: layers.resolve(
                "confidenceThreshold",
                "CONFIDENCE_THRESHOLD",
                d.confidence_threshold,
                is_unit_interval,
            ),
            monitor_interval: layers.resolve_secs(
                "monitorInterval",
                "MONITOR_INTERVAL_SECS",
                d.monitor_interval,
            ),
            load_threshold: layers.resolve(
                "loadThreshold",
                "LOAD_THRESHOLD",
                d.load_threshold,
                is_unit_interval,
            ),
            retrain_sample_count: layers.resolve(
                "retrainSampleCount",
                "RETRAIN_SAMPLE_COUNT",
                d.retrain_sample_count,
                |v| *v > 0,
            ),
            model_update_interval: layers.resolve_secs(
                "modelUpdateInterval",
                "MODEL_UPDATE_INTERVAL_SECS",
                d.model_update_interval,
            ),
            sensor_interval: layers.resolve_secs(
                "sensorInterval",
                "SENSOR_INTERVAL_SECS",
                d.sensor_interval,
            ),
            edge_node_capacity: layers.resolve(
                "edgeNodeCapacity",
                "EDGE_NODE_CAPACITY",
                d.edge_node_capacity,
                |v| *v > 0,
            ),
            inference_timeout: Duration::from_millis(layers.resolve(
                "inferenceTimeoutMs",
                "INFERENCE_TIMEOUT_MS",
                d.inference_timeout.as_millis() as u64,
                |v| *v > 0,
            )),
            model_sync_mode: layers.resolve(
                "modelSyncMode",
                "MODEL_SYNC_MODE",
                d.model_sync_mode,
                |_| true,
            ),
            edge_predictor_url: layers.resolve_url("edgePredictorUrl", "EDGE_PREDICTOR_URL"),
            cloud_predictor_url: layers.resolve_url("cloudPredictorUrl", "CLOUD_PREDICTOR_URL"),
            trainer_url: layers.resolve_url("trainerUrl", "TRAINER_URL"),
        }
    }
}

fn is_unit_interval(v: &f64) -> bool {
    (0.0..=1.0).contains(v)
}

// ---------------------------------------------------------------------------
// Properties files
// ---------------------------------------------------------------------------

/// Parse `key=value` (or `key: value`) lines. Blank lines and lines starting
/// with `#` or `!` are ignored; later keys win.
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            let key = line[..split].trim();
            let value = line[split + 1..].trim();
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Read and parse a properties file. An unreadable file yields no
/// overrides.
pub fn read_properties_file(path: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let props = parse_properties(&text);
            tracing::info!(path = %path.display(), keys = props.len(), "Loaded configuration file");
            props
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Configuration file unavailable, using defaults and environment",
            );
            HashMap::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Layered lookup
// ---------------------------------------------------------------------------

struct Layers<'a, E: Fn(&str) -> Option<String>> {
    props: &'a HashMap<String, String>,
    env: &'a E,
}

impl<E: Fn(&str) -> Option<String>> Layers<'_, E> {
    fn resolve<T>(&self, key: &str, var: &str, default: T, valid: impl Fn(&T) -> bool) -> T
    where
        T: FromStr + fmt::Debug,
    {
        let mut value = default;
        let sources = [
            (key, self.props.get(key).cloned()),
            (var, (self.env)(var)),
        ];

        for (name, raw) in sources {
            let Some(raw) = raw else { continue };
            match raw.trim().parse::<T>() {
                Ok(parsed) if valid(&parsed) => value = parsed,
                _ => tracing::warn!(
                    option = name,
                    value = %raw,
                    keeping = ?value,
                    "Invalid configuration value ignored",
                ),
            }
        }
        value
    }

    fn resolve_secs(&self, key: &str, var: &str, default: Duration) -> Duration {
        let secs = self.resolve(key, var, default.as_secs_f64(), |v| {
            *v > 0.0 && Duration::try_from_secs_f64(*v).is_ok()
        });
        Duration::try_from_secs_f64(secs).unwrap_or(default)
    }

    fn resolve_url(&self, key: &str, var: &str) -> Option<String> {
        (self.env)(var)
            .or_else(|| self.props.get(key).cloned())
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
