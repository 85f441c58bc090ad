//! `run`: dispatch JSON-lines events from stdin through the local messenger.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::media::{StickerEncoder, ToolchainRunner};
use crate::messaging::{InboundEvent, LocalMessenger};

/// Run the dispatcher until stdin closes or Ctrl-C.
pub async fn run_bot_command(config: &Config) -> anyhow::Result<()> {
    let runner = ToolchainRunner::from_registry(config.encode.tool_timeout);
    let encoder = StickerEncoder::new(config.encode.clone(), runner);
    let messenger = Arc::new(LocalMessenger::new(&config.outbox));
    let dispatcher = Dispatcher::new(&config.dispatch, encoder, messenger);
    let token = dispatcher.cancellation_token();

    tracing::info!(
        max_in_flight = config.dispatch.max_in_flight,
        outbox = %config.outbox.display(),
        "Dispatcher ready, reading events from stdin"
    );

    let (tx, rx) = mpsc::channel(config.dispatch.max_in_flight.max(1) * 2);
    let reader = tokio::spawn(read_events(tokio::io::stdin(), tx, token.clone()));
    let signal = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, shutting down");
                token.cancel();
            }
        })
    };

    dispatcher.run(rx).await;
    dispatcher.shutdown().await;

    signal.abort();
    reader.abort();
    Ok(())
}

/// Parse one event per line and forward it. Blank and malformed lines are skipped.
///
/// Returns the number of events forwarded.
pub async fn read_events<R>(
    input: R,
    events: mpsc::Sender<InboundEvent>,
    cancel: CancellationToken,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut forwarded = 0;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read event stream");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(&line) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Err(e) => tracing::warn!(error = %e, "Skipping malformed event"),
        }
    }
    forwarded
}
