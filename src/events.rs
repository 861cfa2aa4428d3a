//! Lifecycle events published by the engine.

use tokio::sync::broadcast;

use crate::error::HostsError;

/// What a reconciliation cycle reports to subscribers.
///
/// `WriteFailed` is fatal for that cycle only; the engine keeps running
/// and retries on the next triggered cycle.
#[derive(Debug, Clone)]
pub enum HostsEvent {
    WriteStarted,
    WriteSucceeded,
    WriteFailed { error: HostsError },
}

/// Broadcast fan-out to any number of subscribers. Sending with no
/// subscribers is fine; the event is simply dropped.
#[derive(Clone)]
pub(crate) struct EventChannel {
    sender: broadcast::Sender<HostsEvent>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: HostsEvent) {
        match self.sender.send(event.clone()) {
            Ok(count) => tracing::debug!("event {event:?} sent to {count} subscribers"),
            Err(_) => tracing::debug!("event {event:?} dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostsEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let channel = EventChannel::new(8);
        let mut rx = channel.subscribe();

        channel.send(HostsEvent::WriteStarted);
        channel.send(HostsEvent::WriteSucceeded);

        assert!(matches!(rx.recv().await, Ok(HostsEvent::WriteStarted)));
        assert!(matches!(rx.recv().await, Ok(HostsEvent::WriteSucceeded)));
    }

    #[tokio::test]
    async fn send_without_subscribers_is_a_no_op() {
        let channel = EventChannel::new(8);
        channel.send(HostsEvent::WriteStarted);

        // A later subscriber only sees events sent after subscribing.
        let mut rx = channel.subscribe();
        channel.send(HostsEvent::WriteSucceeded);
        assert!(matches!(rx.recv().await, Ok(HostsEvent::WriteSucceeded)));
    }

    #[tokio::test]
    async fn failure_event_carries_the_error() {
        let channel = EventChannel::new(8);
        let mut rx = channel.subscribe();

        channel.send(HostsEvent::WriteFailed {
            error: HostsError::Closed,
        });
        match rx.recv().await {
            Ok(HostsEvent::WriteFailed { error }) => {
                assert!(matches!(error, HostsError::Closed));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
