// ABOUTME: Shared adapter state and the single inbound entry point every adapter funnels through.
// ABOUTME: Runs allow-list checks, group triggers, indicator auto-orchestration, and bus publishing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use tokio_util::sync::CancellationToken;

use crate::adapter::{ChannelAdapter, IndicatorRecorder};
use crate::bus::{InboundMessage, MessageBus, Peer, SenderInfo};
use crate::config::GroupTriggerConfig;
use crate::identity;
use crate::media::MediaStore;

/// Process-wide counter for media scopes of messages without a platform id.
static SCOPE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One inbound platform event, as handed to [`AdapterBase::handle_message`].
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    pub peer: Peer,
    /// Platform-native message id, empty if the platform has none.
    pub message_id: String,
    /// Raw platform sender id, used when no structured sender is available.
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    /// Media-store references for attachments already stored by the adapter.
    pub media: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Structured sender identity, preferred over `sender_id` when present.
    pub sender: Option<SenderInfo>,
}

/// Shared state embedded by every adapter.
///
/// The owner back-reference points at the concrete adapter so the base can
/// probe its optional capabilities; it is set once by the orchestrator after
/// construction and held weakly (the orchestrator owns the adapter).
pub struct AdapterBase {
    name: String,
    config: serde_json::Value,
    bus: Arc<MessageBus>,
    allow_list: Vec<String>,
    running: AtomicBool,
    max_message_length: usize,
    group_trigger: Option<GroupTriggerConfig>,
    media: OnceLock<Arc<MediaStore>>,
    recorder: OnceLock<Arc<dyn IndicatorRecorder>>,
    owner: OnceLock<Weak<dyn ChannelAdapter>>,
}

impl AdapterBase {
    pub fn new(
        name: impl Into<String>,
        config: serde_json::Value,
        bus: Arc<MessageBus>,
        allow_list: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            bus,
            allow_list,
            running: AtomicBool::new(false),
            max_message_length: 0,
            group_trigger: None,
            media: OnceLock::new(),
            recorder: OnceLock::new(),
            owner: OnceLock::new(),
        }
    }

    /// Cap outbound messages at `n` code points; 0 disables splitting.
    pub fn with_max_message_length(mut self, n: usize) -> Self {
        self.max_message_length = n;
        self
    }

    pub fn with_group_trigger(mut self, cfg: GroupTriggerConfig) -> Self {
        self.group_trigger = Some(cfg);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw platform-specific configuration blob handed to the factory.
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub fn media_store(&self) -> Option<&Arc<MediaStore>> {
        self.media.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Inject the shared media store. Called once by the orchestrator.
    pub fn attach_media_store(&self, store: Arc<MediaStore>) {
        let _ = self.media.set(store);
    }

    /// Inject the indicator recorder. Called once by the orchestrator.
    pub fn attach_recorder(&self, recorder: Arc<dyn IndicatorRecorder>) {
        let _ = self.recorder.set(recorder);
    }

    /// Set the owner back-reference. Called once by the orchestrator after
    /// the concrete adapter is constructed.
    pub fn bind_owner(&self, owner: Weak<dyn ChannelAdapter>) {
        let _ = self.owner.set(owner);
    }

    fn owner(&self) -> Option<Arc<dyn ChannelAdapter>> {
        self.owner.get().and_then(Weak::upgrade)
    }

    /// Legacy string-only allow-list check.
    ///
    /// Entries may be a bare id, `@username`, or a compound `id|username`;
    /// the sender id itself may be compound. An empty allow-list admits
    /// everyone.
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allow_list.is_empty() {
            return true;
        }
        let sender_parts: Vec<&str> = sender_id.split('|').filter(|p| !p.is_empty()).collect();
        self.allow_list.iter().any(|entry| {
            entry
                .split('|')
                .filter(|p| !p.is_empty())
                .any(|part| {
                    sender_parts
                        .iter()
                        .any(|s| *s == part || part.strip_prefix('@') == Some(s))
                })
        })
    }

    /// Structured allow-list check; delegates per-entry to the identity
    /// helper. An empty allow-list admits everyone.
    pub fn is_allowed_sender(&self, sender: &SenderInfo) -> bool {
        if self.allow_list.is_empty() {
            return true;
        }
        self.allow_list
            .iter()
            .any(|entry| identity::match_allowed(sender, entry))
    }

    /// Decide whether a group-chat message should get a response, and with
    /// what content (trigger prefixes are stripped).
    pub fn should_respond_in_group(&self, is_mentioned: bool, content: &str) -> (bool, String) {
        if is_mentioned {
            return (true, content.trim().to_string());
        }
        let Some(cfg) = &self.group_trigger else {
            return (true, content.to_string());
        };
        if cfg.mention_only {
            return (false, String::new());
        }
        for prefix in &cfg.prefixes {
            if !prefix.is_empty() {
                if let Some(stripped) = content.strip_prefix(prefix.as_str()) {
                    return (true, stripped.trim().to_string());
                }
            }
        }
        if cfg.prefixes.iter().any(|p| !p.is_empty()) {
            return (false, String::new());
        }
        (true, content.to_string())
    }

    /// The single inbound entry point: every adapter funnels received
    /// platform messages through here.
    ///
    /// Applies the allow-list, derives the canonical sender id and media
    /// scope, fires best-effort typing/reaction/placeholder orchestration on
    /// the owning adapter, and publishes the inbound record on the bus.
    pub async fn handle_message(&self, cancel: &CancellationToken, event: InboundEvent) {
        let allowed = match &event.sender {
            Some(sender) if !sender.platform_id.is_empty() || !sender.canonical_id.is_empty() => {
                self.is_allowed_sender(sender)
            }
            _ => self.is_allowed(&event.sender_id),
        };
        if !allowed {
            tracing::debug!(
                channel = %self.name,
                sender_id = %event.sender_id,
                "dropping message from sender not on allow-list"
            );
            return;
        }

        let resolved_sender_id = event
            .sender
            .as_ref()
            .filter(|s| !s.canonical_id.is_empty())
            .map(|s| s.canonical_id.clone())
            .unwrap_or_else(|| event.sender_id.clone());

        let media_scope = if event.message_id.is_empty() {
            let seq = SCOPE_SEQ.fetch_add(1, Ordering::Relaxed);
            format!("{}:{}:local-{}", self.name, event.chat_id, seq)
        } else {
            format!("{}:{}:{}", self.name, event.chat_id, event.message_id)
        };

        self.auto_orchestrate(&event).await;

        let msg = InboundMessage {
            channel: self.name.clone(),
            sender_id: resolved_sender_id,
            sender: event.sender,
            chat_id: event.chat_id.clone(),
            content: event.content,
            media: event.media,
            peer: event.peer,
            message_id: event.message_id,
            media_scope,
            session_key: format!("{}:{}", self.name, event.chat_id),
            metadata: event.metadata,
            timestamp: chrono::Utc::now(),
        };
        if let Err(e) = self.bus.publish_inbound(msg, cancel).await {
            tracing::warn!(channel = %self.name, error = %e, "failed to publish inbound message");
        }
    }

    /// Fire the optional typing/reaction/placeholder capabilities on the
    /// owning adapter. The three are independent; a failure in one is logged
    /// and never blocks the others or the publish.
    async fn auto_orchestrate(&self, event: &InboundEvent) {
        let (Some(owner), Some(recorder)) = (self.owner(), self.recorder.get()) else {
            return;
        };

        if let Some(typing) = owner.typing() {
            match typing.start_typing(&event.chat_id).await {
                Ok(stop) => recorder.record_typing_stop(&self.name, &event.chat_id, stop),
                Err(e) => {
                    tracing::debug!(channel = %self.name, error = %e, "typing indicator failed")
                }
            }
        }

        if !event.message_id.is_empty() {
            if let Some(reactions) = owner.reactions() {
                match reactions.react_to_message(&event.chat_id, &event.message_id).await {
                    Ok(undo) => recorder.record_reaction_undo(&self.name, &event.chat_id, undo),
                    Err(e) => {
                        tracing::debug!(channel = %self.name, error = %e, "reaction failed")
                    }
                }
            }
        }

        if let Some(placeholders) = owner.placeholders() {
            match placeholders.send_placeholder(&event.chat_id).await {
                Ok(id) if !id.is_empty() => {
                    recorder.record_placeholder(&self.name, &event.chat_id, &id)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(channel = %self.name, error = %e, "placeholder send failed")
                }
            }
        }
    }
}
