use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::stock_movement::MovementKind;

/// Handle used by services to publish events to the consumer loop.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Events emitted by the ledger and transfer workflow.
///
/// Services publish these after their transaction commits; a rolled-back
/// unit of work never announces itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    MovementRecorded {
        movement_id: Uuid,
        account_id: Uuid,
        shop_id: Uuid,
        article_id: Uuid,
        kind: MovementKind,
        qty: i32,
        old_value: i32,
        new_value: i32,
    },
    /// A movement left the article under its configured minimum threshold.
    LowStock {
        account_id: Uuid,
        shop_id: Uuid,
        article_id: Uuid,
        quantity: i32,
        min_threshold: i32,
    },
    TransferInitiated {
        transfer_id: Uuid,
        account_id: Uuid,
        from_shop_id: Uuid,
        to_shop_id: Uuid,
        article_id: Uuid,
        qty: i32,
    },
    TransferReceived {
        transfer_id: Uuid,
        account_id: Uuid,
        to_shop_id: Uuid,
        article_id: Uuid,
        qty: i32,
    },
    TransferCancelled {
        transfer_id: Uuid,
        account_id: Uuid,
        from_shop_id: Uuid,
        article_id: Uuid,
        qty: i32,
    },
}

/// Consumer loop draining the event channel. Spawned by the host.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::MovementRecorded {
                movement_id,
                account_id,
                shop_id,
                article_id,
                kind,
                old_value,
                new_value,
                ..
            } => {
                info!(
                    %movement_id, %account_id, %shop_id, %article_id,
                    kind = kind.as_str(), old_value, new_value,
                    "stock movement recorded"
                );
            }
            Event::LowStock {
                account_id,
                shop_id,
                article_id,
                quantity,
                min_threshold,
            } => {
                warn!(
                    %account_id, %shop_id, %article_id, quantity, min_threshold,
                    "article under minimum stock threshold"
                );
            }
            Event::TransferInitiated {
                transfer_id,
                account_id,
                from_shop_id,
                to_shop_id,
                qty,
                ..
            } => {
                info!(
                    %transfer_id, %account_id, %from_shop_id, %to_shop_id, qty,
                    "transfer initiated"
                );
            }
            Event::TransferReceived {
                transfer_id,
                account_id,
                to_shop_id,
                qty,
                ..
            } => {
                info!(%transfer_id, %account_id, %to_shop_id, qty, "transfer received");
            }
            Event::TransferCancelled {
                transfer_id,
                account_id,
                from_shop_id,
                qty,
                ..
            } => {
                info!(%transfer_id, %account_id, %from_shop_id, qty, "transfer cancelled");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumer_loop_drains_the_channel_and_stops() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handle = tokio::spawn(process_events(rx));

        sender
            .send(Event::LowStock {
                account_id: Uuid::new_v4(),
                shop_id: Uuid::new_v4(),
                article_id: Uuid::new_v4(),
                quantity: 1,
                min_threshold: 5,
            })
            .await
            .expect("send failed");

        // Dropping the last sender ends the loop.
        drop(sender);
        handle.await.expect("event loop panicked");
    }

    #[tokio::test]
    async fn send_fails_once_the_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        drop(rx);

        let result = sender
            .send(Event::TransferInitiated {
                transfer_id: Uuid::new_v4(),
                account_id: Uuid::new_v4(),
                from_shop_id: Uuid::new_v4(),
                to_shop_id: Uuid::new_v4(),
                article_id: Uuid::new_v4(),
                qty: 3,
            })
            .await;
        assert!(result.is_err());
    }
}
