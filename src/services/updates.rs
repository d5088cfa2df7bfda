use futures::stream::{self, Stream};
use tokio::sync::broadcast;

const UPDATE_BUFFER_SIZE: usize = 64;

/// Tells open station and guest pages that the building state changed.
///
/// Payloads only name what changed; pages reload their own data.
#[derive(Clone)]
pub struct UpdateBroadcaster {
    tx: broadcast::Sender<String>,
}

impl UpdateBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(UPDATE_BUFFER_SIZE);
        Self { tx }
    }

    /// Publishes to every subscriber. Dropped silently when nobody listens.
    pub fn publish(&self, what: &str) {
        match self.tx.send(what.to_string()) {
            Ok(receivers) => tracing::debug!(what = %what, receivers, "Update published"),
            Err(_) => tracing::debug!(what = %what, "No listeners for update"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// All future updates as a stream. Lagging listeners skip what they
    /// missed; the stream ends when the broadcaster is dropped.
    pub fn stream(&self) -> impl Stream<Item = String> + Send + 'static {
        stream::unfold(self.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(what) => return Some((what, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Update listener fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl Default for UpdateBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_publish_without_listeners() {
        UpdateBroadcaster::new().publish("station");
    }

    #[tokio::test]
    async fn test_subscribers_receive_updates() {
        let updates = UpdateBroadcaster::new();
        let mut rx = updates.subscribe();

        updates.publish("guests");

        assert_eq!(rx.recv().await.unwrap(), "guests");
    }

    #[tokio::test]
    async fn test_stream_yields_published_updates() {
        let updates = UpdateBroadcaster::new();
        let stream = updates.stream();
        futures::pin_mut!(stream);

        updates.publish("keyholder");
        updates.publish("teams");

        assert_eq!(stream.next().await.unwrap(), "keyholder");
        assert_eq!(stream.next().await.unwrap(), "teams");
    }
}
