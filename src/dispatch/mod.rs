//! Bounded-concurrency event dispatcher.
//!
//! Every inbound event becomes one task on a [`TaskTracker`]. A task holds a
//! [`ConcurrencySlot`] for its whole lifetime, so at most `max_in_flight`
//! events are handled at once; the rest wait at the gate. Shutdown stops
//! accepting events, drains the tracker and then disconnects the messenger.

mod command;
mod gate;
mod stats;

pub use command::{Command, parse_command};
pub use gate::{ConcurrencyGate, ConcurrencySlot};
pub use stats::{DispatcherStats, StatsSnapshot};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::media::{MediaBlob, StickerEncoder, TargetKind};
use crate::messaging::{
    InboundEvent, MediaCategory, MediaKind, MessageBody, Messenger, OutgoingMessage, ReplyContext,
};

const STICKER_USAGE: &str = "Send or quote an image, GIF or video with /sticker.";
const TOIMG_USAGE: &str = "Send or quote a sticker or image with /toimg.";
const TAGALL_GROUPS_ONLY: &str = "/tagall only works in groups.";
const FROM_STICKER_CAPTION: &str = "Converted from sticker";
const HELP: &str = "Commands:\n\
    /sticker or /s - image, GIF or video to sticker\n\
    /toimg - sticker to image\n\
    /tagall - mention everyone (groups only)\n\
    /stats - bot statistics\n\
    /help or /hi - this list";

/// Spawns and tracks one task per inbound event.
pub struct Dispatcher {
    inner: Arc<Inner>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

struct Inner {
    messenger: Arc<dyn Messenger>,
    encoder: StickerEncoder,
    gate: ConcurrencyGate,
    stats: DispatcherStats,
    task_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        config: &DispatchConfig,
        encoder: StickerEncoder,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                messenger,
                encoder,
                gate: ConcurrencyGate::new(config.max_in_flight),
                stats: DispatcherStats::new(),
                task_timeout: config.task_timeout,
            }),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    /// Tasks spawned and not yet finished, including those waiting for a slot.
    pub fn pending_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Token that stops [`Dispatcher::run`] when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a task for `event`.
    pub fn dispatch(&self, event: InboundEvent) -> Result<(), DispatchError> {
        if self.cancel.is_cancelled() || self.tracker.is_closed() {
            return Err(DispatchError::ShuttingDown);
        }
        let span = tracing::info_span!("event", id = %event.id, chat = %event.chat);
        let inner = Arc::clone(&self.inner);
        self.tracker
            .spawn(async move { inner.handle_event(event).await }.instrument(span));
        Ok(())
    }

    /// Accept events until the channel closes or the token is cancelled.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Dispatcher accept loop cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.dispatch(event) {
                            tracing::warn!(error = %e, "Dropping event");
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Event source closed");
                        break;
                    }
                },
            }
        }
    }

    /// Stop accepting events, wait for in-flight tasks, then disconnect.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        tracing::info!(pending = self.tracker.len(), "Draining in-flight tasks");
        self.tracker.wait().await;
        self.inner.messenger.disconnect().await;
        let stats = self.stats();
        tracing::info!(
            processed = stats.processed_messages,
            failed = stats.failed_tasks,
            timed_out = stats.timed_out_tasks,
            "Dispatcher stopped"
        );
    }
}

impl Inner {
    async fn handle_event(&self, event: InboundEvent) {
        if event.is_from_me {
            tracing::debug!("Ignoring own message");
            return;
        }

        let slot = match self.gate.acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(error = %e, "No slot for event");
                return;
            }
        };
        self.stats.record_processed();

        let Some(command) = event.text.as_deref().and_then(parse_command) else {
            slot.release();
            return;
        };
        tracing::info!(command = command.name(), sender = %event.sender, "Handling command");

        match tokio::time::timeout(self.task_timeout, self.run_command(command, &event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.record_failure();
                tracing::warn!(command = command.name(), error = %e, "Command failed");
                self.reply_text(&event, e.user_message()).await;
            }
            Err(_) => {
                self.stats.record_failure();
                self.stats.record_timeout();
                let e = DispatchError::TaskTimeout {
                    timeout: self.task_timeout,
                };
                tracing::warn!(command = command.name(), error = %e, "Command timed out");
                self.reply_text(&event, e.user_message()).await;
            }
        }
        slot.release();
    }

    async fn run_command(
        &self,
        command: Command,
        event: &InboundEvent,
    ) -> Result<(), DispatchError> {
        match command {
            Command::Stats => {
                let text = self.stats.snapshot().render();
                self.send(event, OutgoingMessage::text(text)).await
            }
            Command::Help => self.send(event, OutgoingMessage::text(HELP)).await,
            Command::TagAll => self.tag_all(event).await,
            Command::Sticker | Command::ToImage => self.convert(command, event).await,
        }
    }

    async fn tag_all(&self, event: &InboundEvent) -> Result<(), DispatchError> {
        if !event.is_group {
            return self.send(event, OutgoingMessage::text(TAGALL_GROUPS_ONLY)).await;
        }
        let participants = self.messenger.group_participants(&event.chat).await?;
        let handles: Vec<String> = participants
            .iter()
            .map(|jid| format!("@{}", jid.split('@').next().unwrap_or(jid)))
            .collect();
        let text = format!("Attention everyone!\n\n{}", handles.join(" "));
        let count = participants.len();

        let message = OutgoingMessage::text(text).in_reply_to(ReplyContext {
            quoted_id: event.id.clone(),
            mentions: participants,
        });
        self.messenger.send(&event.chat, message).await?;
        tracing::info!(members = count, "Tagged group members");
        Ok(())
    }

    async fn convert(&self, command: Command, event: &InboundEvent) -> Result<(), DispatchError> {
        let wants_image = command == Command::ToImage;
        let media = event.find_media(|kind| match kind {
            MediaKind::Sticker | MediaKind::Image => true,
            MediaKind::Video => !wants_image,
            MediaKind::Document => false,
        });
        let Some(media) = media else {
            let usage = if wants_image { TOIMG_USAGE } else { STICKER_USAGE };
            return self.send(event, OutgoingMessage::text(usage)).await;
        };

        let data = self.messenger.download(&media.reference).await?;
        let blob = MediaBlob::sniff(data, media.mimetype.as_deref());
        let target = if wants_image {
            TargetKind::Image
        } else {
            TargetKind::sticker_for(&blob)
        };

        let result = self.encoder.encode(self.encoder.request(blob, target)).await?;
        let (width, height) = result.dimensions;
        let mime_type = result.mime_type.to_string();
        let is_animated = result.is_animated;
        let tool = result.tool;
        let caption = (media.kind == MediaKind::Sticker).then(|| FROM_STICKER_CAPTION.to_string());

        let body = if target.is_sticker() {
            let upload = self
                .messenger
                .upload(result.data, MediaCategory::Sticker)
                .await?;
            MessageBody::Sticker {
                upload,
                mime_type,
                is_animated,
                width,
                height,
            }
        } else {
            let upload = self
                .messenger
                .upload(result.data, MediaCategory::Image)
                .await?;
            MessageBody::Image {
                upload,
                mime_type,
                caption,
                width,
                height,
            }
        };
        self.send(event, OutgoingMessage::new(body)).await?;
        self.stats.record_conversion();
        tracing::info!(%tool, %target, "Conversion delivered");
        Ok(())
    }

    async fn send(
        &self,
        event: &InboundEvent,
        message: OutgoingMessage,
    ) -> Result<(), DispatchError> {
        self.messenger
            .send(&event.chat, message.in_reply_to(event.reply_context()))
            .await?;
        Ok(())
    }

    async fn reply_text(&self, event: &InboundEvent, text: &str) {
        if let Err(e) = self.send(event, OutgoingMessage::text(text)).await {
            tracing::warn!(error = %e, "Failed to send error reply");
        }
    }
}
