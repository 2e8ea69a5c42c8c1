use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{CommitMode, Config};
use crate::error::FetchError;
use crate::llm::Completer;
use crate::platform::{ChatId, ChatPlatform, InboundUpdate};

/// What one pass over a fetched batch did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub fetched: usize,
    /// Replies delivered, fallback replies included
    pub replied: usize,
    /// Replies that carried the fallback text because the completion failed
    pub fallbacks: usize,
    /// Replies the platform refused; these are not retried
    pub dropped: usize,
    /// Updates without text
    pub skipped: usize,
    /// Offset after the batch
    pub offset: u32,
}

enum Delivery {
    Sent { fallback: bool },
    Dropped,
}

/// Polls the platform, answers each text message with a completion and
/// advances the update offset.
///
/// The offset lives only in memory and starts at 0. After a restart
/// Telegram re-delivers every update it still retains that was not
/// confirmed by a previous offset, so a restart can repeat replies but
/// never skips messages.
pub struct Relay<P, C> {
    platform: P,
    completer: C,
    fallback_reply: String,
    poll_interval: Duration,
    error_backoff: Duration,
    commit: CommitMode,
    clear_commands_on_start: bool,
    offset: u32,
}

impl<P: ChatPlatform, C: Completer> Relay<P, C> {
    pub fn new(platform: P, completer: C, config: &Config) -> Self {
        Self {
            platform,
            completer,
            fallback_reply: config.llm.fallback_reply.clone(),
            poll_interval: config.relay.poll_interval(),
            error_backoff: config.relay.error_backoff(),
            commit: config.relay.commit,
            clear_commands_on_start: config.telegram.delete_commands_on_start,
            offset: 0,
        }
    }

    /// The smallest update id not yet confirmed.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// One-time setup before polling. Failures are logged and ignored.
    pub async fn startup(&self) {
        if !self.clear_commands_on_start {
            return;
        }
        match self.platform.clear_commands().await {
            Ok(()) => info!("Cleared bot command menu"),
            Err(e) => warn!("Failed to clear bot command menu: {}", e),
        }
    }

    /// Fetch one batch and handle it in `update_id` order.
    ///
    /// A failed fetch leaves the offset untouched so the same range is
    /// requested again next time.
    pub async fn tick(&mut self) -> Result<TickOutcome, FetchError> {
        let updates = self.platform.fetch_updates(self.offset).await?;

        let mut outcome = TickOutcome {
            fetched: updates.len(),
            ..TickOutcome::default()
        };
        let mut pending = self.offset;

        for update in &updates {
            match self.handle_update(update).await {
                Some(Delivery::Sent { fallback }) => {
                    outcome.replied += 1;
                    if fallback {
                        outcome.fallbacks += 1;
                    }
                }
                Some(Delivery::Dropped) => outcome.dropped += 1,
                None => outcome.skipped += 1,
            }

            pending = pending.max(update.update_id.saturating_add(1));
            if self.commit == CommitMode::Update {
                self.offset = pending;
            }
        }

        self.offset = pending;
        outcome.offset = pending;
        Ok(outcome)
    }

    async fn handle_update(&self, update: &InboundUpdate) -> Option<Delivery> {
        let Some((chat_id, text)) = update.text_message() else {
            debug!("Skipping update {} without text", update.update_id);
            return None;
        };

        let sender = update
            .message
            .as_ref()
            .and_then(|m| m.sender.as_deref())
            .unwrap_or("unknown");
        info!(
            "Update {} from {} in chat {}",
            update.update_id, sender, chat_id
        );
        debug!("Message text: {}", text);

        Some(self.reply(chat_id, text).await)
    }

    async fn reply(&self, chat_id: ChatId, text: &str) -> Delivery {
        let (reply, fallback) = match self.completer.complete(text).await {
            Ok(reply) => (reply, false),
            Err(e) => {
                error!("Completion failed for chat {}: {}", chat_id, e);
                (self.fallback_reply.clone(), true)
            }
        };

        match self.platform.send_message(chat_id, &reply).await {
            Ok(()) => Delivery::Sent { fallback },
            Err(e) => {
                error!("Failed to send reply to chat {}: {}", chat_id, e);
                Delivery::Dropped
            }
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Every iteration runs to completion; cancellation is only observed
    /// while sleeping between iterations. A panic inside an iteration is
    /// caught here, and the loop resumes from the last committed offset
    /// after the error backoff.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            "Polling for updates (interval {:?}, commit per {})",
            self.poll_interval, self.commit
        );

        loop {
            let result = AssertUnwindSafe(self.tick()).catch_unwind().await;
            let pause = match result {
                Ok(Ok(outcome)) => {
                    if outcome.fetched > 0 {
                        info!(
                            "Handled {} update(s): {} replied ({} fallback), {} dropped, {} skipped; offset now {}",
                            outcome.fetched,
                            outcome.replied,
                            outcome.fallbacks,
                            outcome.dropped,
                            outcome.skipped,
                            outcome.offset
                        );
                    }
                    self.poll_interval
                }
                Ok(Err(e)) => {
                    warn!("Failed to fetch updates at offset {}: {}", self.offset, e);
                    self.poll_interval
                }
                Err(panic) => {
                    error!(
                        "Iteration aborted: {}; resuming at offset {}",
                        panic_message(panic.as_ref()),
                        self.offset
                    );
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
