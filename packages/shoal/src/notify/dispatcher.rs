//! Notification dispatch: durable record first, then live and push
//! delivery.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::metrics::ServerMetrics;
use crate::models::{NotificationRecord, PushEndpoint};
use crate::repository::{NotificationStore, PushEndpointStore, StoreError};
use crate::ws::protocol::ServerMessage;
use crate::ws::registry::{ChannelKey, ConnectionRegistry};

use super::web_push::{PushError, PushProvider};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The durable record could not be written; nothing was delivered.
    #[error("failed to persist notification: {0}")]
    Store(#[from] StoreError),
}

/// Delivers notifications: one durable record, best-effort live fan-out,
/// and one independent push attempt per active endpoint.
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    notifications: Arc<dyn NotificationStore>,
    endpoints: Arc<dyn PushEndpointStore>,
    /// None when push delivery is disabled by configuration.
    push: Option<Arc<dyn PushProvider>>,
    metrics: Arc<ServerMetrics>,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        notifications: Arc<dyn NotificationStore>,
        endpoints: Arc<dyn PushEndpointStore>,
        push: Option<Arc<dyn PushProvider>>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            registry,
            notifications,
            endpoints,
            push,
            metrics,
        }
    }

    /// Dispatch one notification to a user. The record must persist before
    /// any delivery is attempted; a store failure aborts the dispatch and
    /// is returned to the caller. Live and push delivery are best-effort.
    pub async fn dispatch(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> Result<NotificationRecord, DispatchError> {
        let record = self.notifications.create(user_id, title, body, url).await?;
        self.metrics.notification_dispatched();

        let message = ServerMessage::Notification {
            id: record.id,
            title: record.title.clone(),
            body: record.body.clone(),
            url: record.url.clone(),
            timestamp: record.created_at,
        };
        let delivered = self
            .registry
            .fan_out(&ChannelKey::Notify(user_id.to_string()), &message);
        debug!(user_id = %user_id, delivered, "notification live delivery");

        if let Some(push) = &self.push {
            let endpoints = match self.endpoints.list_active(user_id).await {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "failed to list push endpoints");
                    Vec::new()
                }
            };
            join_all(
                endpoints
                    .iter()
                    .map(|endpoint| self.push_one(push, endpoint)),
            )
            .await;
        }

        Ok(record)
    }

    /// One push attempt. A "gone" outcome retires the endpoint; any other
    /// failure is logged and swallowed.
    async fn push_one(&self, push: &Arc<dyn PushProvider>, endpoint: &PushEndpoint) {
        match push.send(endpoint).await {
            Ok(()) => {
                self.metrics.push_sent();
            }
            Err(PushError::EndpointGone { status }) => {
                info!(user_id = %endpoint.user_id, status, "retiring gone push endpoint");
                self.metrics.push_endpoint_retired();
                if let Err(e) = self
                    .endpoints
                    .delete(&endpoint.user_id, &endpoint.endpoint)
                    .await
                {
                    warn!(user_id = %endpoint.user_id, error = %e, "failed to delete retired endpoint");
                }
            }
            Err(e) => {
                self.metrics.push_failed();
                warn!(user_id = %endpoint.user_id, error = %e, "push delivery failed");
            }
        }
    }
}
