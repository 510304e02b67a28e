//! Direct-message routing: best-effort live delivery plus unconditional
//! persistence.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::ServerMetrics;
use crate::repository::{MessageStore, StoreError};

use super::protocol::{DirectFrame, ServerMessage};
use super::registry::{ChannelKey, ConnectionRegistry};

/// Routes one-to-one messages. The recipient's live sessions get the
/// message if any are open; the store gets it regardless.
pub struct DirectRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
    metrics: Arc<ServerMetrics>,
}

impl DirectRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn MessageStore>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            metrics,
        }
    }

    /// Stamp the payload, deliver to every open session of the recipient,
    /// and hand it to the store. Persistence runs asynchronously; the
    /// returned handle resolves to its result so callers can await it or
    /// drop it. A persistence failure is logged here and never reported
    /// back over the sender's connection.
    pub fn route(&self, sender_id: &str, frame: DirectFrame) -> JoinHandle<Result<(), StoreError>> {
        let message_id = Uuid::new_v4();
        let timestamp = Utc::now();
        let recipient_id = frame.to;
        let text = frame.text;

        let message = ServerMessage::Direct {
            message_id,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.clone(),
            sender_name: frame.sender_name,
            avatar: frame.avatar,
            text: text.clone(),
            timestamp,
        };
        let delivered = self
            .registry
            .fan_out(&ChannelKey::Direct(recipient_id.clone()), &message);
        self.metrics.direct_message();
        debug!(sender = %sender_id, recipient = %recipient_id, delivered, "direct message routed");

        let store = Arc::clone(&self.store);
        let sender_id = sender_id.to_string();
        tokio::spawn(async move {
            let result = store
                .append(&sender_id, &recipient_id, &text, timestamp, message_id)
                .await;
            if let Err(ref e) = result {
                warn!(
                    sender = %sender_id,
                    recipient = %recipient_id,
                    error = %e,
                    "failed to persist direct message"
                );
            }
            result
        })
    }
}
