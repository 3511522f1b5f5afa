//! Live subscriptions with explicit cancellation.
//!
//! A [`LiveQuery`] delivers the current snapshot first and then one item per
//! committed change, in commit order. Its [`Subscription`] handle tears the
//! stream down; unsubscribing is idempotent and dropping the handle
//! unsubscribes, so a subscription lives exactly as long as the component
//! that owns it.

use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cancellation handle for one live subscription.
#[derive(Debug, Default)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by the producer side.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop deliveries. Calling this more than once has no further effect.
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Consumer side of a live subscription.
#[derive(Debug)]
pub struct LiveQuery<T> {
    rx: mpsc::UnboundedReceiver<T>,
    subscription: Subscription,
}

/// Producer side of a live subscription.
#[derive(Debug)]
pub struct Feed<T> {
    tx: mpsc::UnboundedSender<T>,
    token: CancellationToken,
}

impl<T> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            token: self.token.clone(),
        }
    }
}

/// Create a connected producer/consumer pair.
pub fn channel<T>() -> (Feed<T>, LiveQuery<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = Subscription::new();
    let feed = Feed {
        tx,
        token: subscription.token(),
    };
    (feed, LiveQuery { rx, subscription })
}

impl<T> LiveQuery<T> {
    /// Wait for the next delivery. Returns `None` once unsubscribed or once
    /// the producer has gone away.
    pub async fn next(&mut self) -> Option<T> {
        if !self.subscription.is_active() {
            return None;
        }
        let token = self.subscription.token();
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Drain everything delivered so far without waiting and return the
    /// newest item, if any.
    pub fn latest(&mut self) -> Option<T> {
        if !self.subscription.is_active() {
            return None;
        }
        let mut newest = None;
        while let Ok(item) = self.rx.try_recv() {
            newest = Some(item);
        }
        newest
    }

    pub fn unsubscribe(&mut self) {
        self.subscription.unsubscribe();
        self.rx.close();
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }
}

impl<T> Feed<T> {
    /// Deliver one item. Returns `false` when the consumer is gone and the
    /// feed should be discarded.
    pub fn send(&self, item: T) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx.send(item).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the consumer unsubscribes or drops its query.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {},
            _ = self.tx.closed() => {},
        }
    }
}

/// Fan-out registry for in-process producers.
#[derive(Debug)]
pub struct Publisher<T> {
    feeds: Mutex<Vec<Feed<T>>>,
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self {
            feeds: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Publisher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and hand it `snapshot` as its first delivery.
    pub fn subscribe(&self, snapshot: T) -> LiveQuery<T> {
        let (feed, query) = channel();
        feed.send(snapshot);
        self.feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(feed);
        query
    }

    /// Deliver `item` to every live subscriber, pruning the ones that have
    /// gone away. Returns the number of subscribers reached.
    pub fn publish(&self, item: &T) -> usize {
        let mut feeds = self
            .feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        feeds.retain(|feed| feed.send(item.clone()));
        feeds.len()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut feeds = self
            .feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        feeds.retain(|feed| !feed.is_closed());
        feeds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_is_first_delivery() {
        let publisher = Publisher::new();
        let mut query = publisher.subscribe(1);
        publisher.publish(&2);

        assert_eq!(query.next().await, Some(1));
        assert_eq!(query.next().await, Some(2));
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_is_harmless() {
        let publisher = Publisher::new();
        let mut query = publisher.subscribe("a".to_string());

        query.unsubscribe();
        query.unsubscribe();

        assert!(!query.is_active());
        assert_eq!(query.next().await, None);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_query_prunes_subscriber() {
        let publisher = Publisher::new();
        let query = publisher.subscribe(0u32);
        assert_eq!(publisher.subscriber_count(), 1);

        drop(query);

        assert_eq!(publisher.publish(&1), 0);
    }

    #[test]
    fn test_latest_returns_newest_pending_item() {
        let publisher = Publisher::new();
        let mut query = publisher.subscribe(1);
        publisher.publish(&2);
        publisher.publish(&3);

        assert_eq!(query.latest(), Some(3));
        assert_eq!(query.latest(), None);
    }

    #[tokio::test]
    async fn test_feed_closed_resolves_on_unsubscribe() {
        let (feed, mut query) = channel::<u8>();
        query.unsubscribe();

        feed.closed().await;
        assert!(feed.is_closed());
        assert!(!feed.send(1));
    }
}
