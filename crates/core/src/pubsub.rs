//! Generic typed pub/sub hub.
//!
//! `publish` snapshots the current subscribers under a read lock, runs each
//! one on its own task and waits for all of them. A subscriber that panics is
//! contained by its task and does not affect its siblings or the publisher.
//! Subscribers added while an event is being delivered only see later events.
//!
//! Unsubscribing tombstones the subscriber's slot and compacts the slot list;
//! slots are matched by a stable id, never by position.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::{BoxFuture, join_all};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

type SubscriberFn<T> = Arc<dyn Fn(CancellationToken, T) -> BoxFuture<'static, ()> + Send + Sync>;

struct Slot<T> {
    id: u64,
    subscriber: SubscriberFn<T>,
}

struct HubState<T> {
    slots: Vec<Option<Slot<T>>>,
    closed: bool,
}

impl<T> HubState<T> {
    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
    }
}

/// A pub/sub hub for events of type `T`. Cloning yields another handle to the
/// same hub.
pub struct Hub<T> {
    state: Arc<RwLock<HubState<T>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Hub<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Hub::subscribe`]. Dropping it keeps the subscription.
#[must_use = "dropping an Unsubscribe handle makes the subscription permanent"]
pub struct Unsubscribe {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscribe {
    fn noop() -> Self {
        Self { remove: None }
    }

    /// Remove the subscriber. Safe to call while an event is being delivered.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl<T: Clone + Send + 'static> Hub<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HubState {
                slots: Vec::new(),
                closed: false,
            })),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HubState<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HubState<T>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber for every subsequently published event.
    ///
    /// On a closed hub this registers nothing and returns a no-op handle.
    pub fn subscribe<F, Fut>(&self, subscriber: F) -> Unsubscribe
    where
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let subscriber: SubscriberFn<T> =
            Arc::new(move |cancel, event| Box::pin(subscriber(cancel, event)));

        let mut state = self.write();
        if state.closed {
            return Unsubscribe::noop();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.slots.push(Some(Slot { id, subscriber }));

        let weak = Arc::downgrade(&self.state);
        Unsubscribe {
            remove: Some(Box::new(move || {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
                if let Some(slot) = state
                    .slots
                    .iter_mut()
                    .find(|slot| slot.as_ref().is_some_and(|s| s.id == id))
                {
                    *slot = None;
                }
                state.compact();
            })),
        }
    }

    /// Deliver `event` to every current subscriber concurrently and wait for
    /// all of them. The token is forwarded; the hub itself imposes no timeout.
    pub async fn publish(&self, cancel: &CancellationToken, event: T) {
        let snapshot: Vec<SubscriberFn<T>> = {
            let state = self.read();
            if state.closed {
                return;
            }
            state
                .slots
                .iter()
                .flatten()
                .map(|slot| Arc::clone(&slot.subscriber))
                .collect()
        };

        let tasks: Vec<JoinHandle<()>> = snapshot
            .into_iter()
            .map(|subscriber| {
                let cancel = cancel.clone();
                let event = event.clone();
                tokio::spawn(async move { subscriber(cancel, event).await })
            })
            .collect();

        for result in join_all(tasks).await {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!("Event subscriber panicked; continuing");
                } else {
                    warn!(error = %e, "Event subscriber task failed");
                }
            }
        }
    }

    /// Run [`Hub::publish`] on a background task and return immediately.
    /// Two async publishes are not ordered relative to each other.
    pub fn publish_async(&self, cancel: CancellationToken, event: T) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move { hub.publish(&cancel, event).await })
    }

    /// Permanently disable the hub. Idempotent.
    pub fn close(&self) {
        let mut state = self.write();
        state.closed = true;
        state.slots.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.read().slots.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting(hub: &Hub<u32>, count: &Arc<AtomicUsize>) -> Unsubscribe {
        let count = Arc::clone(count);
        hub.subscribe(move |_, _| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let hub = Hub::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            let _sub = hub.subscribe(move |_, event| {
                let seen = Arc::clone(&seen);
                async move { seen.lock().unwrap().push(event) }
            });
        }

        hub.publish(&CancellationToken::new(), 7).await;
        assert_eq!(*seen.lock().unwrap(), vec![7, 7, 7]);
    }

    #[tokio::test]
    async fn panicking_subscriber_is_isolated() {
        let hub = Hub::<u32>::new();
        let count = counter();
        let _a = counting(&hub, &count);
        let _b = hub.subscribe(|_, _| async { panic!("subscriber blew up") });
        let _c = counting(&hub, &count);

        hub.publish(&CancellationToken::new(), 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // The hub keeps working after the panic.
        hub.publish(&CancellationToken::new(), 2).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unsubscribed_subscriber_stops_receiving() {
        let hub = Hub::<u32>::new();
        let kept = counter();
        let removed = counter();
        let _keep = counting(&hub, &kept);
        let sub = counting(&hub, &removed);
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(&CancellationToken::new(), 1).await;
        sub.unsubscribe();
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(&CancellationToken::new(), 2).await;
        assert_eq!(kept.load(Ordering::SeqCst), 2);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_after_compaction_removes_the_right_slot() {
        let hub = Hub::<u32>::new();
        let counts: Vec<_> = (0..3).map(|_| counter()).collect();
        let mut subs: Vec<_> = counts.iter().map(|c| Some(counting(&hub, c))).collect();

        subs[0].take().unwrap().unsubscribe();
        subs[2].take().unwrap().unsubscribe();
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(&CancellationToken::new(), 1).await;
        assert_eq!(counts[0].load(Ordering::SeqCst), 0);
        assert_eq!(counts[1].load(Ordering::SeqCst), 1);
        assert_eq!(counts[2].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscriber_can_unsubscribe_itself_during_delivery() {
        let hub = Hub::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));

        let sub = {
            let seen = Arc::clone(&seen);
            let handle = Arc::clone(&handle);
            hub.subscribe(move |_, event| {
                let seen = Arc::clone(&seen);
                let handle = Arc::clone(&handle);
                async move {
                    seen.lock().unwrap().push(event);
                    let own = handle.lock().unwrap().take();
                    if let Some(own) = own {
                        own.unsubscribe();
                    }
                }
            })
        };
        *handle.lock().unwrap() = Some(sub);
        let other = counter();
        let _other = counting(&hub, &other);

        hub.publish(&CancellationToken::new(), 1).await;
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(&CancellationToken::new(), 2).await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(other.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn late_subscriber_misses_the_current_event() {
        let hub = Hub::<u32>::new();
        let late = counter();
        {
            let hub_handle = hub.clone();
            let late = Arc::clone(&late);
            let _sub = hub.subscribe(move |_, event| {
                let hub_handle = hub_handle.clone();
                let late = Arc::clone(&late);
                async move {
                    if event == 1 {
                        let _late = counting(&hub_handle, &late);
                    }
                }
            });
        }

        hub.publish(&CancellationToken::new(), 1).await;
        assert_eq!(late.load(Ordering::SeqCst), 0);
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(&CancellationToken::new(), 2).await;
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_the_forwarded_token() {
        let hub = Hub::<u32>::new();
        let saw_cancelled = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&saw_cancelled);
        let _sub = hub.subscribe(move |cancel, _| {
            let flag = Arc::clone(&flag);
            async move {
                if cancel.is_cancelled() {
                    flag.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        hub.publish(&cancel, 1).await;
        assert_eq!(saw_cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_async_delivers_in_background() {
        let hub = Hub::<u32>::new();
        let count = counter();
        let _sub = counting(&hub, &count);

        hub.publish_async(CancellationToken::new(), 9).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_hub_ignores_subscribe_and_publish() {
        let hub = Hub::<u32>::new();
        let count = counter();
        let _before = counting(&hub, &count);

        hub.close();
        hub.close();
        assert!(hub.is_closed());
        assert_eq!(hub.subscriber_count(), 0);

        let after = counting(&hub, &count);
        assert_eq!(hub.subscriber_count(), 0);
        after.unsubscribe();

        hub.publish(&CancellationToken::new(), 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
