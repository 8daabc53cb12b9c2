use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub channel: String,
    pub payload: String,
}

/// Best-effort fan-out to every viewer connected to this process.
///
/// The process running the wheel is its only authority, so messages never
/// leave it. Nothing is retried.
#[derive(Clone)]
pub struct ResultBroadcaster {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl ResultBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many receivers got the message.
    pub fn publish(&self, channel: &str, payload: String) -> usize {
        self.sender
            .send(BroadcastMessage {
                channel: channel.to_string(),
                payload,
            })
            .unwrap_or(0)
    }

    pub fn publish_json<T: Serialize>(&self, channel: &str, message: &T) -> usize {
        match serde_json::to_string(message) {
            Ok(payload) => self.publish(channel, payload),
            Err(e) => {
                error!("Failed to serialize broadcast for {}: {}", channel, e);
                0
            }
        }
    }

    /// Receiver limited to the given channels.
    pub fn on_message(&self, channels: &[&str]) -> ChannelReceiver {
        ChannelReceiver {
            inner: self.sender.subscribe(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
        }
    }
}

pub struct ChannelReceiver {
    inner: broadcast::Receiver<BroadcastMessage>,
    channels: Vec<String>,
}

impl ChannelReceiver {
    /// Next message on one of our channels. `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        loop {
            match self.inner.recv().await {
                Ok(message) if self.channels.iter().any(|c| *c == message.channel) => {
                    return Some(message)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Viewer fell behind, skipped {} broadcast messages", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
