// ABOUTME: End-to-end dispatch scenarios through the public API with a recording mock adapter.
// ABOUTME: Covers routing, retry policy, placeholder absorption, splitting, and shutdown ordering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use skiff::adapter::{AdapterBase, InboundEvent};
use skiff::bus::BusError;
use skiff::{
    ChannelAdapter, ChannelsConfig, ChannelManager, IndicatorStop, MediaStore, MessageBus,
    MessageEditor, OutboundText, PlaceholderCapable, SendError, TypingCapable,
};

/// Recording adapter with script-driven send failures and optional
/// typing/placeholder/editor capabilities.
struct MockAdapter {
    base: AdapterBase,
    sent: Mutex<Vec<OutboundText>>,
    sent_at: Mutex<Vec<tokio::time::Instant>>,
    send_errors: Mutex<VecDeque<SendError>>,
    edits: Mutex<Vec<(String, String, String)>>,
    typing_stop_calls: Arc<AtomicU32>,
    with_typing: bool,
    placeholder_id: Option<String>,
    with_editor: bool,
}

impl MockAdapter {
    fn new(name: &str, bus: Arc<MessageBus>) -> Self {
        Self::with_base(AdapterBase::new(name, serde_json::Value::Null, bus, vec![]))
    }

    fn with_base(base: AdapterBase) -> Self {
        Self {
            base,
            sent: Mutex::new(Vec::new()),
            sent_at: Mutex::new(Vec::new()),
            send_errors: Mutex::new(VecDeque::new()),
            edits: Mutex::new(Vec::new()),
            typing_stop_calls: Arc::new(AtomicU32::new(0)),
            with_typing: false,
            placeholder_id: None,
            with_editor: false,
        }
    }

    fn script_error(&self, err: SendError) {
        self.send_errors.lock().unwrap().push_back(err);
    }

    fn sent(&self) -> Vec<OutboundText> {
        self.sent.lock().unwrap().clone()
    }

    fn edits(&self) -> Vec<(String, String, String)> {
        self.edits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn base(&self) -> &AdapterBase {
        &self.base
    }

    async fn start(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.base.set_running(true);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.base.set_running(false);
        Ok(())
    }

    async fn send(&self, msg: &OutboundText) -> Result<(), SendError> {
        if !self.base.is_running() {
            return Err(SendError::NotRunning);
        }
        if let Some(err) = self.send_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(msg.clone());
        self.sent_at.lock().unwrap().push(tokio::time::Instant::now());
        Ok(())
    }

    fn typing(&self) -> Option<&dyn TypingCapable> {
        self.with_typing.then_some(self as &dyn TypingCapable)
    }

    fn placeholders(&self) -> Option<&dyn PlaceholderCapable> {
        self.placeholder_id.is_some().then_some(self as &dyn PlaceholderCapable)
    }

    fn editor(&self) -> Option<&dyn MessageEditor> {
        self.with_editor.then_some(self as &dyn MessageEditor)
    }
}

#[async_trait]
impl TypingCapable for MockAdapter {
    async fn start_typing(&self, _chat_id: &str) -> anyhow::Result<IndicatorStop> {
        let calls = Arc::clone(&self.typing_stop_calls);
        let fired = Arc::new(AtomicBool::new(false));
        Ok(Box::new(move || {
            let calls = Arc::clone(&calls);
            let fired = Arc::clone(&fired);
            Box::pin(async move {
                if !fired.swap(true, Ordering::SeqCst) {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            })
        }))
    }
}

#[async_trait]
impl PlaceholderCapable for MockAdapter {
    async fn send_placeholder(&self, _chat_id: &str) -> anyhow::Result<String> {
        Ok(self.placeholder_id.clone().unwrap_or_default())
    }
}

#[async_trait]
impl MessageEditor for MockAdapter {
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), SendError> {
        self.edits.lock().unwrap().push((
            chat_id.to_string(),
            message_id.to_string(),
            content.to_string(),
        ));
        Ok(())
    }
}

fn outbound(channel: &str, chat_id: &str, content: &str) -> OutboundText {
    OutboundText {
        channel: channel.to_string(),
        chat_id: chat_id.to_string(),
        content: content.to_string(),
    }
}

/// Poll until `check` passes or the deadline elapses.
async fn wait_until(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached before deadline");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_happy_path_reply() {
    let mut config = ChannelsConfig::default();
    config.rates.insert("x".to_string(), 10.0);
    let manager = ChannelManager::new(config, Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let adapter = Arc::new(MockAdapter::new("x", bus.clone()));
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let cancel = CancellationToken::new();
    adapter
        .base()
        .handle_message(
            &cancel,
            InboundEvent {
                chat_id: "c".to_string(),
                content: "hi".to_string(),
                sender_id: "u".to_string(),
                ..Default::default()
            },
        )
        .await;

    // Agent stub: consume the inbound message, publish the reply.
    let inbound = bus.consume_inbound(&cancel).await.expect("inbound delivered");
    assert_eq!(inbound.channel, "x");
    assert_eq!(inbound.chat_id, "c");
    assert_eq!(inbound.content, "hi");

    bus.publish_outbound_text(outbound("x", "c", "hello"), &cancel)
        .await
        .unwrap();

    wait_until(|| adapter.sent().len() == 1).await;
    let sent = adapter.sent();
    assert_eq!(sent[0].chat_id, "c");
    assert_eq!(sent[0].content, "hello");

    manager.stop_all().await;
    bus.close().await;
    assert_eq!(adapter.sent().len(), 1, "no extra sends after shutdown");
}

#[tokio::test]
async fn test_allow_list_rejection_blocks_inbound() {
    let bus = Arc::new(MessageBus::new(8));
    let base = AdapterBase::new(
        "x",
        serde_json::Value::Null,
        bus.clone(),
        vec!["@alice".to_string()],
    );
    let cancel = CancellationToken::new();

    base.handle_message(
        &cancel,
        InboundEvent {
            chat_id: "c".to_string(),
            content: "hi".to_string(),
            sender_id: "1".to_string(),
            sender: Some(skiff::SenderInfo::new("tg", "1").with_username("bob")),
            ..Default::default()
        },
    )
    .await;

    let probe = CancellationToken::new();
    probe.cancel();
    assert!(bus.consume_inbound(&probe).await.is_none(), "bus must stay empty");
}

#[tokio::test]
async fn test_bus_capacity_comes_from_config() {
    let config = ChannelsConfig {
        bus_capacity: 2,
        ..Default::default()
    };
    let manager = ChannelManager::new(config, Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    // No dispatcher is running, so the queue fills at the configured size.
    let cancel = CancellationToken::new();
    bus.publish_outbound_text(outbound("x", "c", "1"), &cancel)
        .await
        .unwrap();
    bus.publish_outbound_text(outbound("x", "c", "2"), &cancel)
        .await
        .unwrap();

    let full = CancellationToken::new();
    full.cancel();
    let err = bus
        .publish_outbound_text(outbound("x", "c", "3"), &full)
        .await
        .unwrap_err();
    assert_eq!(err, BusError::Cancelled, "third publish must hit backpressure");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_send_retries_after_delay() {
    let mut config = ChannelsConfig::default();
    config.rates.insert("x".to_string(), 10.0);
    let manager = ChannelManager::new(config, Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let adapter = Arc::new(MockAdapter::new("x", bus.clone()));
    adapter.script_error(SendError::RateLimited("429".to_string()));
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let cancel = CancellationToken::new();
    let enqueued = tokio::time::Instant::now();
    bus.publish_outbound_text(outbound("x", "c", "hello"), &cancel)
        .await
        .unwrap();

    wait_until(|| adapter.sent().len() == 1).await;
    let delivered_at = adapter.sent_at.lock().unwrap()[0];
    assert!(
        delivered_at.duration_since(enqueued) >= Duration::from_secs(1),
        "second attempt must wait out the rate-limit delay"
    );

    manager.stop_all().await;
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let manager = ChannelManager::new(ChannelsConfig::default(), Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let adapter = Arc::new(MockAdapter::new("x", bus.clone()));
    adapter.script_error(SendError::Failed("bad chat id".to_string()));
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let cancel = CancellationToken::new();
    bus.publish_outbound_text(outbound("x", "bad", "hello"), &cancel)
        .await
        .unwrap();
    bus.publish_outbound_text(outbound("x", "c", "next"), &cancel)
        .await
        .unwrap();

    // The failed message is dropped without retry; the next one delivers.
    wait_until(|| adapter.sent().len() == 1).await;
    assert_eq!(adapter.sent()[0].content, "next");

    manager.stop_all().await;
}

#[tokio::test]
async fn test_placeholder_edit_absorbs_send() {
    let manager = ChannelManager::new(ChannelsConfig::default(), Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let mut mock = MockAdapter::new("x", bus.clone());
    mock.placeholder_id = Some("p1".to_string());
    mock.with_editor = true;
    let adapter = Arc::new(mock);
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let cancel = CancellationToken::new();
    adapter
        .base()
        .handle_message(
            &cancel,
            InboundEvent {
                chat_id: "c".to_string(),
                content: "question".to_string(),
                ..Default::default()
            },
        )
        .await;
    // Drain the inbound side like the agent would.
    bus.consume_inbound(&cancel).await.unwrap();

    bus.publish_outbound_text(outbound("x", "c", "done"), &cancel)
        .await
        .unwrap();

    wait_until(|| !adapter.edits().is_empty()).await;
    assert_eq!(
        adapter.edits(),
        vec![("c".to_string(), "p1".to_string(), "done".to_string())]
    );
    assert!(adapter.sent().is_empty(), "edit must absorb the send");

    // The placeholder is consumed: a second reply goes through send.
    bus.publish_outbound_text(outbound("x", "c", "follow-up"), &cancel)
        .await
        .unwrap();
    wait_until(|| adapter.sent().len() == 1).await;
    assert_eq!(adapter.edits().len(), 1);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_long_message_split_preserves_code_block() {
    let manager = ChannelManager::new(ChannelsConfig::default(), Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let base = AdapterBase::new("x", serde_json::Value::Null, bus.clone(), vec![])
        .with_max_message_length(40);
    let adapter = Arc::new(MockAdapter::with_base(base));
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let content = "```go\npackage main\n\nfunc main() {\n\tprintln(\"Hello\")\n}\n```";
    let cancel = CancellationToken::new();
    bus.publish_outbound_text(outbound("x", "c", content), &cancel)
        .await
        .unwrap();

    wait_until(|| adapter.sent().len() == 2).await;
    let sent = adapter.sent();
    assert!(sent[0].content.ends_with("\n```"), "chunk 1: {:?}", sent[0].content);
    assert!(sent[1].content.starts_with("```go"), "chunk 2: {:?}", sent[1].content);
    for msg in &sent {
        assert!(msg.content.chars().count() <= 40);
        assert_eq!(msg.chat_id, "c");
    }

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_typing_stop_evicted_once_after_ttl() {
    let manager = ChannelManager::new(ChannelsConfig::default(), Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let mut mock = MockAdapter::new("x", bus.clone());
    mock.with_typing = true;
    let adapter = Arc::new(mock);
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let cancel = CancellationToken::new();
    adapter
        .base()
        .handle_message(
            &cancel,
            InboundEvent {
                chat_id: "c".to_string(),
                content: "question".to_string(),
                ..Default::default()
            },
        )
        .await;
    bus.consume_inbound(&cancel).await.unwrap();

    // No reply ever arrives; the janitor must stop the typing indicator.
    tokio::time::sleep(Duration::from_secs(6 * 60)).await;
    wait_until(|| adapter.typing_stop_calls.load(Ordering::SeqCst) == 1).await;

    // Another sweep must not fire it again.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(adapter.typing_stop_calls.load(Ordering::SeqCst), 1);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_internal_channel_is_silently_discarded() {
    let config = ChannelsConfig {
        internal_channels: vec!["system".to_string()],
        ..Default::default()
    };
    let manager = ChannelManager::new(config, Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let adapter = Arc::new(MockAdapter::new("system", bus.clone()));
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let cancel = CancellationToken::new();
    bus.publish_outbound_text(outbound("system", "c", "internal"), &cancel)
        .await
        .unwrap();
    bus.publish_outbound_text(outbound("system", "c", "internal 2"), &cancel)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(adapter.sent().is_empty(), "reserved channels never reach workers");

    manager.stop_all().await;
}

#[tokio::test]
async fn test_unknown_channel_is_dropped_without_panic() {
    let manager = ChannelManager::new(ChannelsConfig::default(), Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let adapter = Arc::new(MockAdapter::new("x", bus.clone()));
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let cancel = CancellationToken::new();
    bus.publish_outbound_text(outbound("ghost", "c", "lost"), &cancel)
        .await
        .unwrap();
    bus.publish_outbound_text(outbound("x", "c", "kept"), &cancel)
        .await
        .unwrap();

    wait_until(|| adapter.sent().len() == 1).await;
    assert_eq!(adapter.sent()[0].content, "kept");

    manager.stop_all().await;
}

#[tokio::test]
async fn test_stop_all_halts_delivery_and_stops_adapters() {
    let manager = ChannelManager::new(ChannelsConfig::default(), Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let adapter = Arc::new(MockAdapter::new("x", bus.clone()));
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();
    assert!(adapter.base().is_running());

    manager.stop_all().await;
    assert!(!adapter.base().is_running());

    // Outbound published after shutdown is never delivered.
    let cancel = CancellationToken::new();
    bus.publish_outbound_text(outbound("x", "c", "late"), &cancel)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(adapter.sent().is_empty());

    bus.close().await;
}

#[tokio::test]
async fn test_per_chat_fifo_order_is_preserved() {
    let mut config = ChannelsConfig::default();
    config.rates.insert("x".to_string(), 100.0);
    let manager = ChannelManager::new(config, Arc::new(MediaStore::new()));
    let bus = manager.bus().clone();

    let adapter = Arc::new(MockAdapter::new("x", bus.clone()));
    manager.register_adapter(adapter.clone()).await;
    manager.start_all().await.unwrap();

    let cancel = CancellationToken::new();
    for i in 0..10 {
        bus.publish_outbound_text(outbound("x", "c", &format!("msg-{}", i)), &cancel)
            .await
            .unwrap();
    }

    wait_until(|| adapter.sent().len() == 10).await;
    let contents: Vec<String> = adapter.sent().into_iter().map(|m| m.content).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("msg-{}", i)).collect();
    assert_eq!(contents, expected);

    manager.stop_all().await;
}
