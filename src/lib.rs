// ABOUTME: Root library module for the channel dispatch and orchestration core.
// ABOUTME: Re-exports the bus, adapter contract, manager, and supporting helpers.

pub mod adapter;
pub mod bus;
pub mod config;
pub mod error;
pub mod identity;
pub mod media;
pub mod manager;
pub mod splitter;

// Re-export the types most embedders need.
pub use adapter::{
    AdapterBase, ChannelAdapter, HealthChecker, InboundEvent, IndicatorRecorder, IndicatorStop,
    MediaSender, MessageEditor, PlaceholderCapable, ReactionCapable, TypingCapable,
    WebhookHandler,
};
pub use bus::{
    InboundMessage, MediaKind, MediaPart, MessageBus, OutboundMedia, OutboundText, Peer, PeerKind,
    SenderInfo,
};
pub use config::{ChannelsConfig, GroupTriggerConfig};
pub use error::SendError;
pub use manager::ChannelManager;
pub use media::{MediaMeta, MediaStore};
