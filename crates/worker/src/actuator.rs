//! Machine-side actuator endpoint.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fogpdm_core::types::ActuatorId;
use fogpdm_pipeline::transport::ACTION_STOP;
use fogpdm_pipeline::FogMessage;

/// Receive commands for `actuator` until cancelled. Returns how many stop
/// commands arrived.
pub async fn run(
    actuator: ActuatorId,
    mut inbox: mpsc::Receiver<FogMessage>,
    cancel: CancellationToken,
) -> usize {
    let mut stops = 0;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = inbox.recv() => message,
        };
        match message {
            Some(FogMessage::Actuate(command)) if command.action == ACTION_STOP => {
                stops += 1;
                tracing::info!(actuator, machine_id = command.machine_id, "Stop command executed");
            }
            Some(FogMessage::Actuate(command)) => {
                tracing::warn!(actuator, action = %command.action, "Unknown actuation command");
            }
            Some(_) => {
                tracing::warn!(actuator, "Non-actuation message delivered to actuator, ignored");
            }
            None => break,
        }
    }

    stops
}

#[cfg(test)]
mod tests {
    use fogpdm_pipeline::transport::ActuationCommand;

    use super::*;

    #[tokio::test]
    async fn counts_stop_commands_until_inbox_closes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(FogMessage::Actuate(ActuationCommand::stop(2))).await.unwrap();
        tx.send(FogMessage::Actuate(ActuationCommand {
            machine_id: 2,
            action: "SPIN".into(),
        }))
        .await
        .unwrap();
        drop(tx);

        assert_eq!(run(2, rx, CancellationToken::new()).await, 1);
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(run(1, rx, cancel).await, 0);
    }
}
