// ABOUTME: Adapter contract for chat platforms: the mandatory trait plus optional capabilities.
// ABOUTME: Capabilities are discovered at runtime through accessor methods returning Option<&dyn _>.

pub mod base;
pub mod registry;

pub use base::{AdapterBase, InboundEvent};
pub use registry::{create_adapter, register_factory, registered_factories, AdapterFactory};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::bus::{OutboundMedia, OutboundText};
use crate::error::SendError;

/// Closure that stops a typing indicator or removes a reaction.
///
/// Stored by the orchestrator and invoked either on the next outbound send or
/// by the TTL janitor. Implementations MUST be idempotent: calling the closure
/// twice has the same observable effect as calling it once.
pub type IndicatorStop = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A chat-platform adapter.
///
/// Adapters embed an [`AdapterBase`] (exposed through [`base`]) for the shared
/// inbound path, allow-list checks, and the running flag. Everything beyond
/// `start`/`stop`/`send` is an optional capability: the default accessors
/// return `None` and the orchestrator probes them per adapter.
///
/// [`base`]: ChannelAdapter::base
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Shared state embedded by this adapter.
    fn base(&self) -> &AdapterBase;

    /// Unique adapter name ("telegram", "discord", ...). Used as the outbound
    /// routing key.
    fn name(&self) -> &str {
        self.base().name()
    }

    /// Connect to the platform and begin delivering inbound messages.
    async fn start(&self, cancel: &CancellationToken) -> anyhow::Result<()>;

    /// Disconnect from the platform.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver one text message. Errors must be classified (see
    /// [`SendError`]); the orchestrator's retry policy is driven by the kind.
    async fn send(&self, msg: &OutboundText) -> Result<(), SendError>;

    /// Largest message this platform accepts, in code points. 0 disables
    /// splitting. Defaults to the base's configured value.
    fn max_message_length(&self) -> usize {
        self.base().max_message_length()
    }

    fn media_sender(&self) -> Option<&dyn MediaSender> {
        None
    }

    fn typing(&self) -> Option<&dyn TypingCapable> {
        None
    }

    fn reactions(&self) -> Option<&dyn ReactionCapable> {
        None
    }

    fn placeholders(&self) -> Option<&dyn PlaceholderCapable> {
        None
    }

    fn editor(&self) -> Option<&dyn MessageEditor> {
        None
    }

    fn webhook(&self) -> Option<&dyn WebhookHandler> {
        None
    }

    fn health(&self) -> Option<&dyn HealthChecker> {
        None
    }
}

/// Media delivery capability.
#[async_trait]
pub trait MediaSender: Send + Sync {
    async fn send_media(&self, msg: &OutboundMedia) -> Result<(), SendError>;
}

/// Typing-indicator capability.
#[async_trait]
pub trait TypingCapable: Send + Sync {
    /// Start a typing indicator for a chat and return the stop closure.
    async fn start_typing(&self, chat_id: &str) -> anyhow::Result<IndicatorStop>;
}

/// Reaction capability (acknowledge receipt with an emoji).
#[async_trait]
pub trait ReactionCapable: Send + Sync {
    /// React to an inbound message and return the undo closure.
    async fn react_to_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> anyhow::Result<IndicatorStop>;
}

/// Placeholder capability: send a short "thinking" message that the final
/// reply later edits in place.
#[async_trait]
pub trait PlaceholderCapable: Send + Sync {
    /// Send the placeholder and return its platform message id. Returning an
    /// empty string means "nothing to register" (e.g. disabled by config).
    async fn send_placeholder(&self, chat_id: &str) -> anyhow::Result<String>;
}

/// In-place message editing. Required to benefit from placeholder absorption.
#[async_trait]
pub trait MessageEditor: Send + Sync {
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), SendError>;
}

/// Webhook-style inbound delivery. The handler is mounted on the shared HTTP
/// server under [`webhook_path`].
///
/// [`webhook_path`]: WebhookHandler::webhook_path
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    fn webhook_path(&self) -> String;

    async fn handle_webhook(&self, request: axum::extract::Request) -> axum::response::Response;
}

/// Per-adapter liveness endpoint, mounted on the shared HTTP server.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    fn health_path(&self) -> String;

    async fn handle_health(&self, request: axum::extract::Request) -> axum::response::Response;
}

/// Sink for typing/reaction/placeholder registrations, implemented by the
/// orchestrator and injected into each adapter's base.
pub trait IndicatorRecorder: Send + Sync {
    fn record_typing_stop(&self, adapter: &str, chat_id: &str, stop: IndicatorStop);

    fn record_reaction_undo(&self, adapter: &str, chat_id: &str, undo: IndicatorStop);

    fn record_placeholder(&self, adapter: &str, chat_id: &str, platform_message_id: &str);
}
