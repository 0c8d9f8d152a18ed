use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{ChannelEvent, ChannelName, Filter};

/// Disposable handle on a channel. Row events that do not match the
/// subscription filter are skipped; broadcast events always pass.
///
/// The listener is released on [`Subscription::unsubscribe`] or on drop.
pub struct Subscription {
    channel: ChannelName,
    filter: Filter,
    receiver: Option<broadcast::Receiver<ChannelEvent>>,
}

impl Subscription {
    pub fn new(
        channel: ChannelName,
        filter: Filter,
        receiver: broadcast::Receiver<ChannelEvent>,
    ) -> Self {
        Self {
            channel,
            filter,
            receiver: Some(receiver),
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Waits for the next matching event. Returns `None` once the
    /// subscription has been released or the channel closed.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => {
                    let wanted = event.row().is_none_or(|row| self.filter.matches(row));
                    if wanted {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => {
                    debug!(channel = %self.channel, "channel closed");
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            debug!(channel = %self.channel, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
