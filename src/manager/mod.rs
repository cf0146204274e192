// ABOUTME: Orchestrator owning adapter lifecycle, per-adapter workers, dispatchers, and the TTL janitor.
// ABOUTME: Also implements IndicatorRecorder and the pre-send reconciliation of typing/reaction/placeholder state.

pub mod http;
pub mod ratelimit;
pub mod worker;

pub use ratelimit::RateLimiter;
pub use worker::{BASE_BACKOFF, MAX_BACKOFF, MAX_RETRIES, RATE_LIMIT_DELAY};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapter::{registry, ChannelAdapter, IndicatorRecorder, IndicatorStop};
use crate::bus::MessageBus;
use crate::config::ChannelsConfig;
use crate::media::MediaStore;
use worker::Worker;

/// How often the janitor scans the orchestration maps.
pub const JANITOR_INTERVAL: Duration = Duration::from_secs(10);
/// Lifetime of unconsumed typing stops and reaction undos.
pub const INDICATOR_TTL: Duration = Duration::from_secs(5 * 60);
/// Lifetime of unconsumed placeholder registrations.
pub const PLACEHOLDER_TTL: Duration = Duration::from_secs(10 * 60);

struct TimedIndicator {
    stop: IndicatorStop,
    created_at: Instant,
}

struct TimedPlaceholder {
    message_id: String,
    created_at: Instant,
}

/// State shared between the manager, its workers, and its dispatchers.
pub(crate) struct Shared {
    pub bus: Arc<MessageBus>,
    pub config: ChannelsConfig,
    pub media: Arc<MediaStore>,
    /// Dispatch cancellation token: the universal stop signal for workers,
    /// dispatchers, and the janitor.
    pub cancel: CancellationToken,
    pub adapters: RwLock<HashMap<String, Arc<dyn ChannelAdapter>>>,
    pub workers: RwLock<HashMap<String, Worker>>,
    typing_stops: DashMap<String, TimedIndicator>,
    reaction_undos: DashMap<String, TimedIndicator>,
    placeholders: DashMap<String, TimedPlaceholder>,
}

impl Shared {
    fn key(adapter: &str, chat_id: &str) -> String {
        format!("{}:{}", adapter, chat_id)
    }

    /// Reconcile per-chat indicator state before an outbound send.
    ///
    /// Stops the typing indicator, undoes the reaction, and, for text sends,
    /// tries to edit the recorded placeholder in place. Returns `true` when
    /// the placeholder edit succeeded and absorbed the outbound message.
    /// The three pipelines are independent; failures never block each other.
    pub(crate) async fn pre_send(
        &self,
        adapter: &dyn ChannelAdapter,
        channel: &str,
        chat_id: &str,
        content: Option<&str>,
    ) -> bool {
        let key = Self::key(channel, chat_id);

        if let Some((_, entry)) = self.typing_stops.remove(&key) {
            (entry.stop)().await;
        }
        if let Some((_, entry)) = self.reaction_undos.remove(&key) {
            (entry.stop)().await;
        }

        // Media sends leave the placeholder in place for the text reply.
        let Some(content) = content else {
            return false;
        };
        let Some((_, placeholder)) = self.placeholders.remove(&key) else {
            return false;
        };
        let Some(editor) = adapter.editor() else {
            return false;
        };
        match editor
            .edit_message(chat_id, &placeholder.message_id, content)
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    channel = %channel,
                    chat_id = %chat_id,
                    message_id = %placeholder.message_id,
                    "reply absorbed by placeholder edit"
                );
                true
            }
            Err(e) => {
                tracing::debug!(
                    channel = %channel,
                    chat_id = %chat_id,
                    error = %e,
                    "placeholder edit failed, falling back to a fresh send"
                );
                false
            }
        }
    }

    /// One janitor sweep: evict expired indicators (invoking their closures)
    /// and drop expired placeholders.
    async fn janitor_pass(&self) {
        let now = Instant::now();

        for map in [&self.typing_stops, &self.reaction_undos] {
            let expired: Vec<String> = map
                .iter()
                .filter(|entry| now.duration_since(entry.created_at) >= INDICATOR_TTL)
                .map(|entry| entry.key().clone())
                .collect();
            for key in expired {
                if let Some((key, entry)) = map.remove(&key) {
                    (entry.stop)().await;
                    tracing::debug!(key = %key, "evicted expired indicator");
                }
            }
        }

        self.placeholders
            .retain(|_, ph| now.duration_since(ph.created_at) < PLACEHOLDER_TTL);
    }
}

impl IndicatorRecorder for Shared {
    fn record_typing_stop(&self, adapter: &str, chat_id: &str, stop: IndicatorStop) {
        self.typing_stops.insert(
            Self::key(adapter, chat_id),
            TimedIndicator { stop, created_at: Instant::now() },
        );
    }

    fn record_reaction_undo(&self, adapter: &str, chat_id: &str, undo: IndicatorStop) {
        self.reaction_undos.insert(
            Self::key(adapter, chat_id),
            TimedIndicator { stop: undo, created_at: Instant::now() },
        );
    }

    fn record_placeholder(&self, adapter: &str, chat_id: &str, platform_message_id: &str) {
        self.placeholders.insert(
            Self::key(adapter, chat_id),
            TimedPlaceholder {
                message_id: platform_message_id.to_string(),
                created_at: Instant::now(),
            },
        );
    }
}

/// Orchestrator for all chat adapters.
///
/// Owns the message bus (sized from `bus_capacity` in the config), the
/// adapter set, one worker pair per started adapter, the two outbound
/// dispatchers, the TTL janitor, and the optional shared HTTP server.
/// Drives startup and the ordered shutdown sequence.
pub struct ChannelManager {
    shared: Arc<Shared>,
    health_router: std::sync::Mutex<Option<axum::Router>>,
    http_cancel: CancellationToken,
    http_task: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn new(config: ChannelsConfig, media: Arc<MediaStore>) -> Self {
        let bus = Arc::new(MessageBus::new(config.bus_capacity.max(1)));
        Self {
            shared: Arc::new(Shared {
                bus,
                config,
                media,
                cancel: CancellationToken::new(),
                adapters: RwLock::new(HashMap::new()),
                workers: RwLock::new(HashMap::new()),
                typing_stops: DashMap::new(),
                reaction_undos: DashMap::new(),
                placeholders: DashMap::new(),
            }),
            health_router: std::sync::Mutex::new(None),
            http_cancel: CancellationToken::new(),
            http_task: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach the global health mux served alongside adapter webhook routes.
    pub fn with_health_router(self, router: axum::Router) -> Self {
        *self.health_router.lock().expect("health router lock poisoned") = Some(router);
        self
    }

    /// The manager-owned bus. Adapters publish inbound messages here and the
    /// agent loop consumes from it and publishes replies back.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.shared.bus
    }

    pub fn media_store(&self) -> &Arc<MediaStore> {
        &self.shared.media
    }

    /// Token cancelled when dispatch shuts down. The agent consumer can use
    /// it to stop alongside the core.
    pub fn dispatch_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Register an adapter instance directly, ahead of `start_all`. Adapters
    /// named in the config are built through the factory table instead.
    pub async fn register_adapter(&self, adapter: Arc<dyn ChannelAdapter>) {
        let name = adapter.name().to_string();
        self.shared.adapters.write().await.insert(name, adapter);
    }

    pub async fn adapter_names(&self) -> Vec<String> {
        self.shared.adapters.read().await.keys().cloned().collect()
    }

    /// Start everything: build configured adapters, start each one, spawn its
    /// worker pair, then the dispatchers, the janitor, and the HTTP server.
    ///
    /// An adapter whose factory is missing or whose `start` fails is logged
    /// and skipped; the rest proceed.
    pub async fn start_all(&self) -> Result<()> {
        let shared = &self.shared;

        for (name, raw) in &shared.config.adapters {
            if shared.adapters.read().await.contains_key(name) {
                continue;
            }
            match registry::create_adapter(name, raw.clone(), shared.bus.clone()) {
                None => {
                    tracing::warn!(channel = %name, "no adapter factory registered, skipping")
                }
                Some(Err(e)) => {
                    tracing::warn!(channel = %name, error = %e, "adapter construction failed, skipping")
                }
                Some(Ok(adapter)) => {
                    shared.adapters.write().await.insert(name.clone(), adapter);
                }
            }
        }

        let adapters: Vec<(String, Arc<dyn ChannelAdapter>)> = shared
            .adapters
            .read()
            .await
            .iter()
            .map(|(name, adapter)| (name.clone(), Arc::clone(adapter)))
            .collect();

        for (name, adapter) in &adapters {
            if let Err(e) = adapter.start(&shared.cancel).await {
                tracing::warn!(channel = %name, error = %e, "adapter failed to start, skipping");
                continue;
            }
            adapter.base().attach_media_store(Arc::clone(&shared.media));
            adapter.base().attach_recorder(Arc::clone(shared) as Arc<dyn IndicatorRecorder>);
            adapter.base().bind_owner(Arc::downgrade(adapter));

            let rate = shared.config.rate_for(name);
            let limiter = Arc::new(RateLimiter::new(rate));
            let queue_size = shared.config.worker_queue_size.max(1);
            let (text_tx, text_rx) = mpsc::channel(queue_size);
            let (media_tx, media_rx) = mpsc::channel(queue_size);
            let text_task = tokio::spawn(worker::run_text_worker(
                Arc::clone(shared),
                Arc::clone(adapter),
                Arc::clone(&limiter),
                text_rx,
            ));
            let media_task = tokio::spawn(worker::run_media_worker(
                Arc::clone(shared),
                Arc::clone(adapter),
                limiter,
                media_rx,
            ));
            shared.workers.write().await.insert(
                name.clone(),
                Worker { text_tx, media_tx, text_task, media_task },
            );
            tracing::info!(channel = %name, rate, "adapter started");
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(run_text_dispatcher(Arc::clone(shared))));
        tasks.push(tokio::spawn(run_media_dispatcher(Arc::clone(shared))));
        tasks.push(tokio::spawn(run_janitor(Arc::clone(shared))));
        drop(tasks);

        if let Some(addr) = shared.config.http_addr.clone() {
            let health = self
                .health_router
                .lock()
                .expect("health router lock poisoned")
                .take();
            let adapter_map = shared.adapters.read().await.clone();
            let router = http::build_router(health, &adapter_map);
            let handle = http::start_server(&addr, router, self.http_cancel.clone()).await?;
            *self.http_task.lock().await = Some(handle);
        }

        Ok(())
    }

    /// Ordered shutdown: HTTP server (5 s budget), dispatch cancellation,
    /// text queues, media queues, then adapter `stop`.
    pub async fn stop_all(&self) {
        self.http_cancel.cancel();
        if let Some(handle) = self.http_task.lock().await.take() {
            if tokio::time::timeout(http::HTTP_SHUTDOWN, handle).await.is_err() {
                tracing::warn!("shared HTTP server did not shut down within budget");
            }
        }

        self.shared.cancel.cancel();
        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }

        let drained: Vec<(String, Worker)> =
            self.shared.workers.write().await.drain().collect();
        let mut media_halves = Vec::with_capacity(drained.len());
        for (name, worker) in drained {
            let Worker { text_tx, media_tx, text_task, media_task } = worker;
            drop(text_tx);
            let _ = text_task.await;
            media_halves.push((name, media_tx, media_task));
        }
        for (name, media_tx, media_task) in media_halves {
            drop(media_tx);
            let _ = media_task.await;
            tracing::debug!(channel = %name, "worker stopped");
        }

        let adapters: Vec<(String, Arc<dyn ChannelAdapter>)> =
            self.shared.adapters.write().await.drain().collect();
        for (name, adapter) in adapters {
            if let Err(e) = adapter.stop().await {
                tracing::warn!(channel = %name, error = %e, "adapter stop failed");
            }
        }
        tracing::info!("channel manager stopped");
    }
}

/// Route outbound text from the bus to the owning adapter's worker queue
/// until the bus closes or dispatch is cancelled.
async fn run_text_dispatcher(shared: Arc<Shared>) {
    loop {
        let Some(msg) = shared.bus.subscribe_outbound_text(&shared.cancel).await else {
            break;
        };
        if shared.config.is_internal_channel(&msg.channel) {
            continue;
        }
        let tx = shared
            .workers
            .read()
            .await
            .get(&msg.channel)
            .map(|w| w.text_tx.clone());
        match tx {
            Some(tx) => {
                tokio::select! {
                    res = tx.send(msg) => {
                        if res.is_err() {
                            tracing::warn!("text worker queue closed during dispatch");
                        }
                    }
                    _ = shared.cancel.cancelled() => break,
                }
            }
            None => warn_unroutable(&shared, &msg.channel).await,
        }
    }
    tracing::debug!("text dispatcher stopped");
}

/// Media twin of [`run_text_dispatcher`].
async fn run_media_dispatcher(shared: Arc<Shared>) {
    loop {
        let Some(msg) = shared.bus.subscribe_outbound_media(&shared.cancel).await else {
            break;
        };
        if shared.config.is_internal_channel(&msg.channel) {
            continue;
        }
        let tx = shared
            .workers
            .read()
            .await
            .get(&msg.channel)
            .map(|w| w.media_tx.clone());
        match tx {
            Some(tx) => {
                tokio::select! {
                    res = tx.send(msg) => {
                        if res.is_err() {
                            tracing::warn!("media worker queue closed during dispatch");
                        }
                    }
                    _ = shared.cancel.cancelled() => break,
                }
            }
            None => warn_unroutable(&shared, &msg.channel).await,
        }
    }
    tracing::debug!("media dispatcher stopped");
}

async fn warn_unroutable(shared: &Shared, channel: &str) {
    if shared.adapters.read().await.contains_key(channel) {
        tracing::warn!(channel = %channel, "no active worker for channel, dropping outbound message");
    } else {
        tracing::warn!(channel = %channel, "outbound message for unregistered channel, dropping");
    }
}

/// Periodically evict stale typing/reaction/placeholder registrations so the
/// maps stay bounded when the agent drops messages without replying.
async fn run_janitor(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => shared.janitor_pass().await,
            _ = shared.cancel.cancelled() => break,
        }
    }
    tracing::debug!("janitor stopped");
}
