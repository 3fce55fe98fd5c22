//! Publications, subscriptions and messages
//!
//! The process-wide subscription store indexes subscriptions both by the
//! transient id of their publisher and by the transient id of their
//! subscriber. Both indices are updated under a single lock.
//!
//! A subscription keeps a weak handle on its publisher: the publisher's id
//! stays reserved while the subscription exists, and subscriptions of
//! dropped publishers are pruned.
//!
//! Publishing only delivers immutable data. Delivery happens on the
//! publishing thread, outside of the store's lock, in subscription order.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{after, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use ulid::Ulid;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::value::{TransientId, Value, WeakValue};
use crate::watch::{GenericWatcher, Watcher};

// ═══════════════════════════════════════════════════════════════════════
// Publications and messages
// ═══════════════════════════════════════════════════════════════════════

/// Immutable data published by a publisher.
#[derive(Clone)]
pub struct Publication {
    data: Value,
    publisher: Value,
    date: SystemTime,
}

impl Publication {
    fn new(data: Value, publisher: Value) -> Result<Self> {
        if data.is_mutable() {
            return Err(RuntimeError::MutablePublicationData);
        }
        Ok(Self {
            data,
            publisher,
            date: SystemTime::now(),
        })
    }

    /// The published data.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// The publisher.
    pub fn publisher(&self) -> &Value {
        &self.publisher
    }

    /// Publication date.
    pub fn date(&self) -> SystemTime {
        self.date
    }
}

/// Immutable data sent to a recipient.
#[derive(Clone)]
pub struct Message {
    data: Value,
    sender: Option<Value>,
    date: SystemTime,
}

impl Message {
    /// Create a message; `data` must be immutable.
    pub fn new(data: Value, sender: Option<Value>) -> Result<Self> {
        if data.is_mutable() {
            return Err(RuntimeError::MutableMessageData);
        }
        Ok(Self {
            data,
            sender,
            date: SystemTime::now(),
        })
    }

    /// The message's data.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// The sender, if known.
    pub fn sender(&self) -> Option<&Value> {
        self.sender.as_ref()
    }

    /// Creation date.
    pub fn date(&self) -> SystemTime {
        self.date
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Subscribers
// ═══════════════════════════════════════════════════════════════════════

/// Receives publications.
pub trait Subscriber: Send + Sync {
    /// Handle a publication. Called on the publishing thread.
    fn receive_publication(&self, ctx: &Context, publication: &Arc<Publication>);

    /// Identity of the subscriber, `None` if it cannot be identified.
    fn subscriber_id(&self) -> Option<TransientId>;
}

fn address_of<T>(subscriber: &T) -> TransientId {
    TransientId(subscriber as *const T as usize)
}

/// Subscriber buffering the publications it receives.
pub struct Inbox {
    sender: Sender<Arc<Publication>>,
    receiver: Receiver<Arc<Publication>>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    /// Create an empty inbox.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Number of buffered publications.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check whether the inbox is empty.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Take the buffered publications.
    pub fn drain(&self) -> Vec<Arc<Publication>> {
        self.receiver.try_iter().collect()
    }

    /// Wait for the next publication.
    pub fn wait_next(&self, ctx: &Context, timeout: Duration) -> Result<Arc<Publication>> {
        let done = ctx.done();
        select! {
            recv(self.receiver) -> p => p.map_err(|_| RuntimeError::WatchTimeout),
            recv(done) -> _ => Err(RuntimeError::DoneContext),
            recv(after(timeout)) -> _ => Err(RuntimeError::WatchTimeout),
        }
    }
}

impl Subscriber for Inbox {
    fn receive_publication(&self, _ctx: &Context, publication: &Arc<Publication>) {
        let _ = self.sender.send(publication.clone());
    }

    fn subscriber_id(&self) -> Option<TransientId> {
        Some(address_of(self))
    }
}

/// Handler called with every publication.
pub type PublicationHandler = Box<dyn Fn(&Context, &Arc<Publication>) + Send + Sync>;

/// Subscriber calling a handler on behalf of an owner value. The owner's
/// transient id identifies the subscriber.
pub struct FnSubscriber {
    owner: Value,
    handler: PublicationHandler,
}

impl FnSubscriber {
    /// Subscriber acting for `owner`.
    pub fn new(owner: Value, handler: PublicationHandler) -> Self {
        Self { owner, handler }
    }

    /// The owner.
    pub fn owner(&self) -> &Value {
        &self.owner
    }
}

impl Subscriber for FnSubscriber {
    fn receive_publication(&self, ctx: &Context, publication: &Arc<Publication>) {
        (self.handler)(ctx, publication);
    }

    fn subscriber_id(&self) -> Option<TransientId> {
        self.owner.transient_id()
    }
}

impl Subscriber for GenericWatcher {
    fn receive_publication(&self, ctx: &Context, publication: &Arc<Publication>) {
        self.inform_about_async(ctx, Value::Publication(publication.clone()));
    }

    fn subscriber_id(&self) -> Option<TransientId> {
        Some(address_of(self))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Subscriptions
// ═══════════════════════════════════════════════════════════════════════

/// Links a subscriber to a publisher. Only publications whose data is
/// accepted by the filter are delivered.
pub struct Subscription {
    id: Ulid,
    publisher: WeakValue,
    subscriber_id: TransientId,
    subscriber: Arc<dyn Subscriber>,
    filter: Pattern,
    created: SystemTime,
    active: Mutex<bool>,
}

impl Subscription {
    /// Unique id.
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// The filter.
    pub fn filter(&self) -> &Pattern {
        &self.filter
    }

    /// Creation date.
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Check whether the subscription still receives publications.
    pub fn is_active(&self) -> bool {
        *self.active.lock() && self.publisher.is_alive()
    }

    /// Stop receiving publications.
    pub fn cancel(self: &Arc<Self>) {
        STORE.remove(self);
    }

    fn deliver(&self, ctx: &Context, publication: &Arc<Publication>) {
        if !self.is_active() || !self.filter.test(ctx, publication.data()) {
            return;
        }
        let delivered = catch_unwind(AssertUnwindSafe(|| {
            self.subscriber.receive_publication(ctx, publication)
        }));
        if delivered.is_err() {
            warn!(subscription = %self.id, "subscriber panicked while receiving a publication");
        }
    }
}

#[derive(Default)]
struct Indices {
    by_publisher: HashMap<TransientId, Vec<Arc<Subscription>>>,
    by_subscriber: HashMap<TransientId, Vec<Arc<Subscription>>>,
}

#[derive(Default)]
struct SubscriptionStore {
    indices: Mutex<Indices>,
}

static STORE: LazyLock<SubscriptionStore> = LazyLock::new(SubscriptionStore::default);

impl SubscriptionStore {
    fn add(&self, subscription: Arc<Subscription>) {
        let mut indices = self.indices.lock();
        let _active = subscription.active.lock();
        indices
            .by_publisher
            .entry(subscription.publisher.id())
            .or_default()
            .push(subscription.clone());
        indices
            .by_subscriber
            .entry(subscription.subscriber_id)
            .or_default()
            .push(subscription.clone());
    }

    fn remove(&self, subscription: &Arc<Subscription>) {
        let mut indices = self.indices.lock();
        *subscription.active.lock() = false;
        let Indices {
            by_publisher,
            by_subscriber,
        } = &mut *indices;
        for (map, key) in [
            (by_publisher, subscription.publisher.id()),
            (by_subscriber, subscription.subscriber_id),
        ] {
            if let Some(list) = map.get_mut(&key) {
                list.retain(|s| !Arc::ptr_eq(s, subscription));
                if list.is_empty() {
                    map.remove(&key);
                }
            }
        }
    }

    fn of_publisher(&self, publisher: TransientId) -> Vec<Arc<Subscription>> {
        self.indices
            .lock()
            .by_publisher
            .get(&publisher)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove the subscriptions whose publisher was dropped.
    fn prune(&self) {
        let dead: Vec<Arc<Subscription>> = self
            .indices
            .lock()
            .by_publisher
            .values()
            .flatten()
            .filter(|s| !s.publisher.is_alive())
            .cloned()
            .collect();
        if dead.is_empty() {
            return;
        }
        trace!(count = dead.len(), "pruning subscriptions of dropped publishers");
        for subscription in &dead {
            self.remove(subscription);
        }
    }

    fn of_subscriber(&self, subscriber: TransientId) -> Vec<Arc<Subscription>> {
        self.indices
            .lock()
            .by_subscriber
            .get(&subscriber)
            .cloned()
            .unwrap_or_default()
    }
}

/// Subscribe to the publications of `publisher` whose data matches `filter`.
pub fn subscribe(
    ctx: &Context,
    subscriber: Arc<dyn Subscriber>,
    publisher: &Value,
    filter: Pattern,
) -> Result<Arc<Subscription>> {
    if ctx.is_done() {
        return Err(RuntimeError::DoneContext);
    }
    let publisher = publisher
        .downgrade()
        .ok_or(RuntimeError::PublisherNotUniquelyIdentifiable)?;
    let subscriber_id = subscriber
        .subscriber_id()
        .ok_or(RuntimeError::SubscriberNotUniquelyIdentifiable)?;

    let subscription = Arc::new(Subscription {
        id: Ulid::new(),
        publisher,
        subscriber_id,
        subscriber,
        filter,
        created: SystemTime::now(),
        active: Mutex::new(true),
    });
    STORE.prune();
    STORE.add(subscription.clone());
    trace!(subscription = %subscription.id, "subscribed");
    Ok(subscription)
}

/// Publish immutable `data` on behalf of `publisher`.
///
/// A publisher without subscription publishes nothing.
pub fn publish(ctx: &Context, publisher: &Value, data: Value) -> Result<()> {
    if data.is_mutable() {
        return Err(RuntimeError::MutablePublicationData);
    }
    let publisher_id = publisher
        .transient_id()
        .ok_or(RuntimeError::PublisherNotUniquelyIdentifiable)?;
    let subscriptions = STORE.of_publisher(publisher_id);
    if subscriptions.is_empty() {
        return Ok(());
    }
    let publication = Arc::new(Publication::new(data, publisher.clone())?);
    debug!(subscriptions = subscriptions.len(), "publishing");
    for subscription in &subscriptions {
        subscription.deliver(ctx, &publication);
    }
    Ok(())
}

/// Subscriptions of a subscriber.
pub fn subscriptions_of(subscriber: &dyn Subscriber) -> Vec<Arc<Subscription>> {
    match subscriber.subscriber_id() {
        Some(id) => STORE.of_subscriber(id),
        None => Vec::new(),
    }
}

/// Cancel every subscription of a subscriber.
pub fn unsubscribe_all(subscriber: &dyn Subscriber) {
    for subscription in subscriptions_of(subscriber) {
        subscription.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::watch::WatcherConfiguration;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    fn publisher() -> Value {
        Value::record(vec![("name", Value::string("pub"))]).unwrap()
    }

    #[test]
    fn test_publish_to_inbox() {
        let ctx = ctx();
        let publisher = publisher();
        let inbox = Arc::new(Inbox::new());
        subscribe(&ctx, inbox.clone(), &publisher, Pattern::any()).unwrap();
        publish(&ctx, &publisher, Value::Int(1)).unwrap();
        publish(&ctx, &publisher, Value::Int(2)).unwrap();
        let data: Vec<Value> = inbox.drain().iter().map(|p| p.data().clone()).collect();
        assert_eq!(data, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_mutable_data_is_rejected() {
        let ctx = ctx();
        let publisher = publisher();
        let mutable = Value::object(vec![("a", Value::Int(1))]);
        assert!(matches!(
            publish(&ctx, &publisher, mutable.clone()),
            Err(RuntimeError::MutablePublicationData)
        ));
        assert!(matches!(Message::new(mutable, None), Err(RuntimeError::MutableMessageData)));
        assert!(Message::new(Value::Int(1), None).is_ok());
    }

    #[test]
    fn test_filter_skips_subscription() {
        let ctx = ctx();
        let publisher = publisher();
        let ints = Arc::new(Inbox::new());
        let strings = Arc::new(Inbox::new());
        subscribe(&ctx, ints.clone(), &publisher, Pattern::int()).unwrap();
        subscribe(&ctx, strings.clone(), &publisher, Pattern::str()).unwrap();
        publish(&ctx, &publisher, Value::Int(1)).unwrap();
        assert_eq!(ints.len(), 1);
        assert!(strings.is_empty());
    }

    #[test]
    fn test_identification() {
        let ctx = ctx();
        let inbox = Arc::new(Inbox::new());
        assert!(matches!(
            subscribe(&ctx, inbox, &Value::Int(1), Pattern::any()),
            Err(RuntimeError::PublisherNotUniquelyIdentifiable)
        ));
        let anonymous = Arc::new(FnSubscriber::new(Value::Nil, Box::new(|_, _| {})));
        assert!(matches!(
            subscribe(&ctx, anonymous, &publisher(), Pattern::any()),
            Err(RuntimeError::SubscriberNotUniquelyIdentifiable)
        ));
    }

    #[test]
    fn test_cancel_and_panicking_subscriber() {
        let ctx = ctx();
        let publisher = publisher();
        let calls = Arc::new(AtomicUsize::new(0));
        let panicking = Arc::new(FnSubscriber::new(
            publisher.clone(),
            Box::new(|_, _| panic!("boom")),
        ));
        let counting = {
            let calls = calls.clone();
            Arc::new(FnSubscriber::new(
                Value::list(vec![]),
                Box::new(move |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            ))
        };
        subscribe(&ctx, panicking, &publisher, Pattern::any()).unwrap();
        let subscription = subscribe(&ctx, counting.clone(), &publisher, Pattern::any()).unwrap();
        assert_eq!(subscriptions_of(&*counting).len(), 1);

        publish(&ctx, &publisher, Value::Int(1)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.cancel();
        assert!(!subscription.is_active());
        publish(&ctx, &publisher, Value::Int(2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(subscriptions_of(&*counting).is_empty());
    }

    #[test]
    fn test_watcher_subscriber() {
        let ctx = ctx();
        let publisher = publisher();
        let watcher = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        subscribe(&ctx, watcher.clone(), &publisher, Pattern::any()).unwrap();
        publish(&ctx, &publisher, Value::string("hello")).unwrap();
        let received = watcher.wait_next(&ctx, None, Duration::from_millis(50)).unwrap();
        let Value::Publication(p) = received else {
            panic!("expected a publication");
        };
        assert_eq!(p.data(), &Value::string("hello"));
        unsubscribe_all(&*watcher);
        assert!(subscriptions_of(&*watcher).is_empty());
    }
}
