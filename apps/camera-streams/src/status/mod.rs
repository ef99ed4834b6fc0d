//! Best-effort fan-out of session state changes.
//!
//! Every subscriber owns an unbounded queue, so a slow or vanished subscriber never blocks
//! `publish`. Events published before a subscriber joined are not replayed.

use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::session::{Purpose, SessionState};

/// Wire shape pushed to status subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub camera_id: String,
    pub purpose: Purpose,
    pub status: SessionState,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub const STREAM_STATUS: &str = "stream_status";

impl StatusEvent {
    pub fn new(
        camera_id: impl Into<String>,
        purpose: Purpose,
        status: SessionState,
        error: Option<String>,
    ) -> Self {
        Self {
            event_type: STREAM_STATUS.to_string(),
            camera_id: camera_id.into(),
            purpose,
            status,
            error,
            timestamp: Utc::now(),
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<StatusEvent>,
}

#[derive(Default)]
struct PublisherInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Explicitly constructed and handed to whoever needs to publish or subscribe.
#[derive(Clone, Default)]
pub struct StatusPublisher {
    inner: Arc<PublisherInner>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every connected subscriber. Never blocks.
    pub fn publish(&self, event: StatusEvent) {
        trace!(
            camera_id = %event.camera_id,
            purpose = %event.purpose,
            status = %event.status,
            "Publishing status event"
        );

        let mut saw_closed = false;
        {
            let subscribers = self.inner.subscribers.read();
            for subscriber in subscribers.iter() {
                if subscriber.tx.send(event.clone()).is_err() {
                    trace!(subscriber = subscriber.id, "Status subscriber gone");
                    saw_closed = true;
                }
            }
        }

        if saw_closed {
            let mut subscribers = self.inner.subscribers.write();
            subscribers.retain(|s| !s.tx.is_closed());
            debug!("Pruned closed status subscribers, remaining: {}", subscribers.len());
        }
    }

    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.inner.subscribers.write();
        subscribers.push(Subscriber { id, tx });
        debug!(subscriber = id, "Status subscriber added, total: {}", subscribers.len());
        StatusSubscription { id, rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

/// A live feed of status events. Dropping it unsubscribes.
pub struct StatusSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<StatusEvent>,
}

impl StatusSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for StatusSubscription {
    type Item = StatusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
