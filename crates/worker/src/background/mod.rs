//! Periodic control loops.
//!
//! Each controller exposes a deterministic `tick()` for tests and a
//! `run(cancel)` loop intended to be spawned via `tokio::spawn`. Both loops
//! accept a [`CancellationToken`](tokio_util::sync::CancellationToken) for
//! graceful shutdown and log, rather than propagate, per-tick failures.

pub mod model_sync;
pub mod scaling;
