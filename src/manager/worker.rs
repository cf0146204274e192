// ABOUTME: Per-adapter worker tasks draining the text and media queues.
// ABOUTME: Applies splitting, rate limiting, pre-send orchestration, and classified retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapter::ChannelAdapter;
use crate::bus::{OutboundMedia, OutboundText};
use crate::error::SendError;
use crate::manager::ratelimit::RateLimiter;
use crate::manager::Shared;
use crate::splitter;

/// Retries after the initial attempt.
pub const MAX_RETRIES: u32 = 3;
/// Fixed wait after a platform rate-limit signal.
pub const RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);
/// First backoff step for transient failures; doubles per attempt.
pub const BASE_BACKOFF: Duration = Duration::from_millis(500);
/// Backoff ceiling.
pub const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Handle to one adapter's pair of worker tasks.
pub(crate) struct Worker {
    pub text_tx: mpsc::Sender<OutboundText>,
    pub media_tx: mpsc::Sender<OutboundMedia>,
    pub text_task: JoinHandle<()>,
    pub media_task: JoinHandle<()>,
}

/// Drain the text queue: split over-long content, then deliver each chunk
/// with retry. Exits when the queue closes.
pub(crate) async fn run_text_worker(
    shared: Arc<Shared>,
    adapter: Arc<dyn ChannelAdapter>,
    limiter: Arc<RateLimiter>,
    mut rx: mpsc::Receiver<OutboundText>,
) {
    while let Some(msg) = rx.recv().await {
        let max_len = adapter.max_message_length();
        if max_len > 0 && msg.content.chars().count() > max_len {
            let chunks = splitter::split_message(&msg.content, max_len);
            tracing::debug!(
                channel = %msg.channel,
                chat_id = %msg.chat_id,
                chunks = chunks.len(),
                "splitting over-long message"
            );
            for content in chunks {
                let chunk = OutboundText {
                    channel: msg.channel.clone(),
                    chat_id: msg.chat_id.clone(),
                    content,
                };
                send_with_retry(&shared, adapter.as_ref(), &limiter, &chunk).await;
            }
        } else {
            send_with_retry(&shared, adapter.as_ref(), &limiter, &msg).await;
        }
    }
    tracing::debug!(channel = %adapter.name(), "text worker stopped");
}

/// Drain the media queue. Adapters without the media capability skip
/// silently. Exits when the queue closes.
pub(crate) async fn run_media_worker(
    shared: Arc<Shared>,
    adapter: Arc<dyn ChannelAdapter>,
    limiter: Arc<RateLimiter>,
    mut rx: mpsc::Receiver<OutboundMedia>,
) {
    while let Some(msg) = rx.recv().await {
        if adapter.media_sender().is_none() {
            tracing::debug!(
                channel = %msg.channel,
                "adapter cannot send media, dropping outbound media message"
            );
            continue;
        }
        send_media_with_retry(&shared, adapter.as_ref(), &limiter, &msg).await;
    }
    tracing::debug!(channel = %adapter.name(), "media worker stopped");
}

/// Deliver one text message: rate-limit token, pre-send orchestration
/// (a successful placeholder edit absorbs the send), then the adapter call
/// with classified retry.
async fn send_with_retry(
    shared: &Shared,
    adapter: &dyn ChannelAdapter,
    limiter: &RateLimiter,
    msg: &OutboundText,
) {
    let cancel = &shared.cancel;
    let max_attempts = 1 + MAX_RETRIES;

    for attempt in 0..max_attempts {
        if !limiter.acquire(cancel).await {
            return;
        }
        if shared
            .pre_send(adapter, &msg.channel, &msg.chat_id, Some(&msg.content))
            .await
        {
            return;
        }

        let delay = match adapter.send(msg).await {
            Ok(()) => return,
            Err(e) => match classify_for_retry(&e, attempt, &msg.channel, &msg.chat_id) {
                Some(delay) => delay,
                None => return,
            },
        };

        if attempt + 1 == max_attempts {
            tracing::error!(
                channel = %msg.channel,
                chat_id = %msg.chat_id,
                retries = MAX_RETRIES,
                "giving up on outbound message after retries"
            );
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

/// Media variant of [`send_with_retry`]: no splitting, and pre-send clears
/// typing/reaction state but leaves any placeholder for the text reply.
async fn send_media_with_retry(
    shared: &Shared,
    adapter: &dyn ChannelAdapter,
    limiter: &RateLimiter,
    msg: &OutboundMedia,
) {
    let cancel = &shared.cancel;
    let max_attempts = 1 + MAX_RETRIES;

    for attempt in 0..max_attempts {
        if !limiter.acquire(cancel).await {
            return;
        }
        shared.pre_send(adapter, &msg.channel, &msg.chat_id, None).await;

        let Some(sender) = adapter.media_sender() else {
            return;
        };
        let delay = match sender.send_media(msg).await {
            Ok(()) => return,
            Err(e) => match classify_for_retry(&e, attempt, &msg.channel, &msg.chat_id) {
                Some(delay) => delay,
                None => return,
            },
        };

        if attempt + 1 == max_attempts {
            tracing::error!(
                channel = %msg.channel,
                chat_id = %msg.chat_id,
                retries = MAX_RETRIES,
                "giving up on outbound media after retries"
            );
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

/// Map a classified send failure to the delay before the next attempt, or
/// `None` when the failure is permanent.
fn classify_for_retry(
    err: &SendError,
    attempt: u32,
    channel: &str,
    chat_id: &str,
) -> Option<Duration> {
    if err.is_permanent() {
        tracing::error!(
            channel = %channel,
            chat_id = %chat_id,
            error = %err,
            "permanent send failure, not retrying"
        );
        return None;
    }
    if err.is_rate_limited() {
        tracing::warn!(
            channel = %channel,
            chat_id = %chat_id,
            "platform rate limit, delaying retry"
        );
        return Some(RATE_LIMIT_DELAY);
    }
    tracing::warn!(
        channel = %channel,
        chat_id = %chat_id,
        error = %err,
        attempt,
        "transient send failure, backing off"
    );
    Some(backoff_delay(attempt))
}

/// Exponential backoff: `BASE_BACKOFF * 2^attempt`, capped at `MAX_BACKOFF`.
fn backoff_delay(attempt: u32) -> Duration {
    BASE_BACKOFF
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_BACKOFF)
}
