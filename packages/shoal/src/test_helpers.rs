//! Shared fakes for exercising routers, sessions, and the dispatcher
//! without sockets or SQLite.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use futures::channel::mpsc as futures_mpsc;
use futures::{Sink, Stream};
use uuid::Uuid;

use crate::metrics::ServerMetrics;
use crate::models::{NotificationRecord, PushEndpoint, StoredMessage};
use crate::notify::web_push::{PushError, PushProvider};
use crate::repository::{MessageStore, NotificationStore, PushEndpointStore, StoreError};
use crate::ws::broadcast::RoomRouter;
use crate::ws::direct::DirectRouter;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::session::SessionContext;

// --- FakeSocket ---

/// Channel-backed stand-in for an upgraded WebSocket: the test drives the
/// inbound side and observes the outbound side.
pub(crate) struct FakeSocket {
    incoming: futures_mpsc::UnboundedReceiver<Result<Message, axum::Error>>,
    outgoing: futures_mpsc::UnboundedSender<Message>,
}

impl FakeSocket {
    #[allow(clippy::type_complexity)]
    pub(crate) fn pair() -> (
        Self,
        futures_mpsc::UnboundedSender<Result<Message, axum::Error>>,
        futures_mpsc::UnboundedReceiver<Message>,
    ) {
        let (in_tx, in_rx) = futures_mpsc::unbounded();
        let (out_tx, out_rx) = futures_mpsc::unbounded();
        (
            Self {
                incoming: in_rx,
                outgoing: out_tx,
            },
            in_tx,
            out_rx,
        )
    }
}

impl Stream for FakeSocket {
    type Item = Result<Message, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.incoming).poll_next(cx)
    }
}

impl Sink<Message> for FakeSocket {
    type Error = futures_mpsc::SendError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing).poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        Pin::new(&mut self.outgoing).start_send(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing).poll_close(cx)
    }
}

// --- Stores ---

/// MessageStore that records appends; can fail the next call on demand.
#[derive(Default)]
pub(crate) struct RecordingMessageStore {
    appended: Mutex<Vec<StoredMessage>>,
    fail_next: AtomicBool,
}

impl RecordingMessageStore {
    pub(crate) fn appended(&self) -> Vec<StoredMessage> {
        self.appended.lock().unwrap().clone()
    }

    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for RecordingMessageStore {
    async fn append(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
        timestamp: DateTime<Utc>,
        message_id: Uuid,
    ) -> Result<(), StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.appended.lock().unwrap().push(StoredMessage {
            id: message_id,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            body: body.to_string(),
            created_at: timestamp,
        });
        Ok(())
    }
}

/// NotificationStore over a Vec; can fail the next create on demand.
#[derive(Default)]
pub(crate) struct InMemoryNotificationStore {
    next_id: AtomicI64,
    records: Mutex<Vec<NotificationRecord>>,
    fail_create: AtomicBool,
}

impl InMemoryNotificationStore {
    pub(crate) fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }

    pub(crate) fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> Result<NotificationRecord, StoreError> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let record = NotificationRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            url: url.map(str::to_string),
            is_read: false,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list_unread(&self, user_id: &str) -> Result<Vec<NotificationRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id && !r.is_read)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: i64, user_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.user_id == user_id)
        {
            Some(record) => {
                record.is_read = true;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<(), StoreError> {
        for record in self
            .records
            .lock()
            .unwrap()
            .iter_mut()
            .filter(|r| r.user_id == user_id)
        {
            record.is_read = true;
        }
        Ok(())
    }
}

/// PushEndpointStore over a Vec.
#[derive(Default)]
pub(crate) struct InMemoryPushEndpointStore {
    endpoints: Mutex<Vec<PushEndpoint>>,
}

impl InMemoryPushEndpointStore {
    pub(crate) fn endpoints(&self) -> Vec<PushEndpoint> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushEndpointStore for InMemoryPushEndpointStore {
    async fn upsert(&self, endpoint: &PushEndpoint) -> Result<(), StoreError> {
        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints.retain(|e| !(e.user_id == endpoint.user_id && e.endpoint == endpoint.endpoint));
        endpoints.push(endpoint.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str, endpoint: &str) -> Result<(), StoreError> {
        self.endpoints
            .lock()
            .unwrap()
            .retain(|e| !(e.user_id == user_id && e.endpoint == endpoint));
        Ok(())
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<PushEndpoint>, StoreError> {
        let now = Utc::now();
        Ok(self
            .endpoints
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id && !e.is_expired(now))
            .cloned()
            .collect())
    }
}

// --- Push provider ---

/// Push provider with per-endpoint scripted outcomes.
#[derive(Default)]
pub(crate) struct ScriptedPushProvider {
    gone: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedPushProvider {
    /// The push service will report this endpoint permanently gone.
    pub(crate) fn mark_gone(&self, endpoint: &str) {
        self.gone.lock().unwrap().insert(endpoint.to_string());
    }

    /// The push service will fail transiently for this endpoint.
    pub(crate) fn mark_failing(&self, endpoint: &str) {
        self.failing.lock().unwrap().insert(endpoint.to_string());
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushProvider for ScriptedPushProvider {
    async fn send(&self, endpoint: &PushEndpoint) -> Result<(), PushError> {
        if self.gone.lock().unwrap().contains(&endpoint.endpoint) {
            return Err(PushError::EndpointGone { status: 410 });
        }
        if self.failing.lock().unwrap().contains(&endpoint.endpoint) {
            return Err(PushError::Provider {
                reason: "scripted failure".into(),
            });
        }
        self.sent.lock().unwrap().push(endpoint.endpoint.clone());
        Ok(())
    }
}

// --- Session wiring ---

/// A full session context over fresh registries, routers, and a recording
/// message store.
pub(crate) fn session_context(
    heartbeat: Duration,
) -> (SessionContext, Arc<RecordingMessageStore>) {
    let registry = Arc::new(ConnectionRegistry::new());
    let metrics = Arc::new(ServerMetrics::new());
    let store = Arc::new(RecordingMessageStore::default());
    let rooms = Arc::new(RoomRouter::new(
        Arc::clone(&registry),
        Arc::clone(&metrics),
    ));
    let direct = Arc::new(DirectRouter::new(
        Arc::clone(&registry),
        Arc::clone(&store) as Arc<dyn MessageStore>,
        Arc::clone(&metrics),
    ));
    (
        SessionContext {
            registry,
            rooms,
            direct,
            metrics,
            heartbeat,
            send_buffer: 16,
        },
        store,
    )
}
