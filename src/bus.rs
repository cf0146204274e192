// ABOUTME: Core message types and the in-process pub/sub bus between adapters and the agent.
// ABOUTME: Three bounded queues (inbound, outbound text, outbound media) with one-shot close and drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::identity;

/// Default bounded capacity of each bus queue.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Routing descriptor for where a message belongs on its platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerKind {
    Direct,
    Group,
    Channel,
    #[default]
    Unset,
}

/// `(kind, id)` pair letting the agent decide routing policy without parsing
/// platform metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Peer {
    pub kind: PeerKind,
    pub id: String,
}

impl Peer {
    pub fn direct(id: impl Into<String>) -> Self {
        Self { kind: PeerKind::Direct, id: id.into() }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self { kind: PeerKind::Group, id: id.into() }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self { kind: PeerKind::Channel, id: id.into() }
    }
}

/// Structured identity of the user who sent an inbound message.
///
/// Produced by adapters, consumed by allow-list matching. `canonical_id` is
/// `lower(platform):platform_id` when both parts are non-empty, else empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderInfo {
    pub platform: String,
    pub platform_id: String,
    pub canonical_id: String,
    pub username: String,
    pub display_name: String,
}

impl SenderInfo {
    pub fn new(platform: impl Into<String>, platform_id: impl Into<String>) -> Self {
        let platform = platform.into();
        let platform_id = platform_id.into();
        let canonical_id = identity::build_canonical(&platform, &platform_id);
        Self {
            platform,
            platform_id,
            canonical_id,
            username: String::new(),
            display_name: String::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

/// A user message entering the bus from an adapter.
///
/// Routing fields are first-class; `metadata` is reserved for
/// platform-specific extensions only.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Adapter name the message arrived on.
    pub channel: String,
    /// Canonical sender id when available, else the raw platform id.
    pub sender_id: String,
    /// Structured sender identity, when the adapter produced one.
    pub sender: Option<SenderInfo>,
    /// Platform-native chat/room identifier.
    pub chat_id: String,
    /// Message text.
    pub content: String,
    /// Media-store references (`media://<uuid>`) for attachments.
    pub media: Vec<String>,
    pub peer: Peer,
    /// Platform-native message id, empty if the platform has none.
    pub message_id: String,
    /// Media-store lifetime key, unique per inbound event.
    pub media_scope: String,
    /// `channel:chat_id` session routing key.
    pub session_key: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Default for InboundMessage {
    fn default() -> Self {
        Self {
            channel: String::new(),
            sender_id: String::new(),
            sender: None,
            chat_id: String::new(),
            content: String::new(),
            media: Vec::new(),
            peer: Peer::default(),
            message_id: String::new(),
            media_scope: String::new(),
            session_key: String::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// An agent text reply addressed to one chat on one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundText {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
}

/// Media attachment kinds an adapter may be asked to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    File,
}

/// One attachment of an outbound media message.
#[derive(Debug, Clone)]
pub struct MediaPart {
    pub kind: MediaKind,
    /// Media-store reference (`media://<uuid>`).
    pub media_ref: String,
    pub caption: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// An agent media reply addressed to one chat on one adapter.
#[derive(Debug, Clone)]
pub struct OutboundMedia {
    pub channel: String,
    pub chat_id: String,
    pub parts: Vec<MediaPart>,
}

/// Bus operation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// The bus was closed before or during the operation.
    #[error("message bus closed")]
    Closed,
    /// The caller's cancellation token fired while waiting for queue space.
    #[error("publish cancelled")]
    Cancelled,
}

struct Queue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
}

impl<T> Queue<T> {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: Mutex::new(rx) }
    }
}

/// In-process bus with three independent bounded FIFO queues: inbound user
/// messages, outbound text replies, and outbound media replies.
///
/// Publishing applies backpressure once a queue is full. Close is idempotent:
/// it flips the closed flag, cancels the shared `done` token so every waiter
/// unblocks, then drains buffered messages. The receivers themselves are kept
/// alive so publishers racing with `close` observe a clean [`BusError::Closed`]
/// instead of a closed-channel fault.
pub struct MessageBus {
    inbound: Queue<InboundMessage>,
    outbound_text: Queue<OutboundText>,
    outbound_media: Queue<OutboundMedia>,
    closed: AtomicBool,
    done: CancellationToken,
}

impl MessageBus {
    /// Create a bus whose three queues each hold up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inbound: Queue::new(capacity),
            outbound_text: Queue::new(capacity),
            outbound_media: Queue::new(capacity),
            closed: AtomicBool::new(false),
            done: CancellationToken::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn publish<T>(
        &self,
        queue: &Queue<T>,
        msg: T,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        tokio::select! {
            res = queue.tx.send(msg) => res.map_err(|_| BusError::Closed),
            _ = self.done.cancelled() => Err(BusError::Closed),
            _ = cancel.cancelled() => Err(BusError::Cancelled),
        }
    }

    async fn receive<T>(&self, queue: &Queue<T>, cancel: &CancellationToken) -> Option<T> {
        if self.is_closed() {
            return None;
        }
        let mut rx = queue.rx.lock().await;
        tokio::select! {
            msg = rx.recv() => msg,
            _ = self.done.cancelled() => None,
            _ = cancel.cancelled() => None,
        }
    }

    /// Publish an inbound user message. Blocks while the queue is full.
    pub async fn publish_inbound(
        &self,
        msg: InboundMessage,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        self.publish(&self.inbound, msg, cancel).await
    }

    /// Receive the next inbound message, or `None` on close/cancellation.
    pub async fn consume_inbound(&self, cancel: &CancellationToken) -> Option<InboundMessage> {
        self.receive(&self.inbound, cancel).await
    }

    /// Publish an outbound text reply. Blocks while the queue is full.
    pub async fn publish_outbound_text(
        &self,
        msg: OutboundText,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        self.publish(&self.outbound_text, msg, cancel).await
    }

    /// Receive the next outbound text reply, or `None` on close/cancellation.
    pub async fn subscribe_outbound_text(&self, cancel: &CancellationToken) -> Option<OutboundText> {
        self.receive(&self.outbound_text, cancel).await
    }

    /// Publish an outbound media reply. Blocks while the queue is full.
    pub async fn publish_outbound_media(
        &self,
        msg: OutboundMedia,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        self.publish(&self.outbound_media, msg, cancel).await
    }

    /// Receive the next outbound media reply, or `None` on close/cancellation.
    pub async fn subscribe_outbound_media(
        &self,
        cancel: &CancellationToken,
    ) -> Option<OutboundMedia> {
        self.receive(&self.outbound_media, cancel).await
    }

    /// Close the bus and discard anything still buffered. Safe to call from
    /// multiple tasks; only the first call does the work.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.done.cancel();

        let mut discarded = 0usize;
        {
            let mut rx = self.inbound.rx.lock().await;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
        }
        {
            let mut rx = self.outbound_text.rx.lock().await;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
        }
        {
            let mut rx = self.outbound_media.rx.lock().await;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
        }
        if discarded > 0 {
            tracing::debug!(discarded, "message bus closed with buffered messages");
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
