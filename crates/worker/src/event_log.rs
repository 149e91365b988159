//! Event log subscriber.
//!
//! Logs every [`FogEvent`] published during a run and tallies them by type
//! for the final report. It runs outside the task tracker so that it can
//! drain whatever the other tasks published before they finished.

use std::collections::BTreeMap;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;

use fogpdm_events::FogEvent;

/// Events seen per event type.
pub type EventCounts = BTreeMap<String, u64>;

/// Log events until the bus closes or `cancel` fires. On cancel, events
/// already buffered are still logged.
pub async fn run(mut receiver: broadcast::Receiver<FogEvent>, cancel: CancellationToken) -> EventCounts {
    let mut counts = EventCounts::new();

    loop {
        tokio::select! {
            biased;
            received = receiver.recv() => match received {
                Ok(event) => record(&mut counts, &event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log lagged, some events were not logged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = cancel.cancelled() => {
                drain(&mut receiver, &mut counts);
                break;
            }
        }
    }

    counts
}

fn drain(receiver: &mut broadcast::Receiver<FogEvent>, counts: &mut EventCounts) {
    loop {
        match receiver.try_recv() {
            Ok(event) => record(counts, &event),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagged, some events were not logged");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn record(counts: &mut EventCounts, event: &FogEvent) {
    tracing::info!(
        event_type = %event.event_type,
        source = ?event.source_entity_type,
        source_id = ?event.source_entity_id,
        sim_time = ?event.sim_time,
        payload = %event.payload,
        "Event",
    );
    *counts.entry(event.event_type.clone()).or_insert(0) += 1;
}
