//! Message event feed
//!
//! The message service announces each stored message as one JSON line
//! (`MessageCreated`) on a plain TCP connection. Every valid line is fanned
//! out through the broker; malformed lines are logged and skipped.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::broker::message::MessageCreated;
use crate::utils::error::Result;

pub async fn start_event_feed(addr: String, broker: Arc<Broker>) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Event feed listening on tcp://{addr}");
    serve_event_feed(listener, broker).await
}

pub async fn serve_event_feed(listener: TcpListener, broker: Arc<Broker>) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept event feed connection");
                continue;
            }
        };
        let broker = broker.clone();
        tokio::spawn(async move {
            match ingest(stream, &broker).await {
                Ok(count) => debug!(%peer, count, "event feed closed"),
                Err(e) => warn!(%peer, error = %e, "event feed failed"),
            }
        });
    }
}

/// Reads newline-delimited events from `reader` until EOF and returns how
/// many were published.
pub async fn ingest<R: AsyncRead + Unpin>(reader: R, broker: &Broker) -> Result<usize> {
    let mut lines = BufReader::new(reader).lines();
    let mut published = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<MessageCreated>(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Invalid event: {e} | {}",
                    line.chars().take(100).collect::<String>()
                );
                continue;
            }
        };
        let (id, chat_id) = (message.id, message.chat_id);
        match broker.publish_message(message) {
            Ok(report) => {
                published += 1;
                debug!(
                    message_id = id,
                    chat_id,
                    delivered = report.delivered,
                    "message fanned out"
                );
            }
            Err(e) => warn!(message_id = id, error = %e, "failed to publish message"),
        }
    }
    Ok(published)
}
