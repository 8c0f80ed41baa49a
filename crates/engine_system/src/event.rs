//! Event channels.
//!
//! An [`EventChannel`] is a one-to-many notification point that sits outside
//! the phase sequence. Its main use is the [`SceneUpdate`] event: the render
//! thread emits it once per frame and rendering-capable systems do their
//! render-side work in the callback, guarded by their own locks.
//!
//! Callbacks run synchronously on the emitting thread, in connection order.
//! Notifications on one channel never overlap. A channel gives no mutual
//! exclusion with `run_step`.
//!
//! A [`Connection`] is the only way to stop delivery: dropping it disconnects
//! the callback, and once the drop returns the callback is never invoked again.
//! A drop racing a running invocation of the same callback on another thread
//! waits for that invocation to return.

use std::any::{Any, TypeId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use engine_component::Entity;
use tracing::{debug, error};

use crate::config::PluginSpec;
use crate::error::panic_message;

/// A typed event. The marker type is only used as a key.
pub trait Event: 'static {
    /// Data delivered to subscribers.
    type Payload: Send + Sync + 'static;

    /// Name used in logs.
    const NAME: &'static str;
}

/// Emitted by the render thread once per rendering opportunity.
#[derive(Debug, Clone, Copy)]
pub struct SceneUpdate;

impl Event for SceneUpdate {
    type Payload = ();
    const NAME: &'static str = "scene_update";
}

/// Pause (`true`) or resume (`false`) the simulation.
#[derive(Debug, Clone, Copy)]
pub struct Pause;

impl Event for Pause {
    type Payload = bool;
    const NAME: &'static str = "pause";
}

/// Ask the host loop to stop.
#[derive(Debug, Clone, Copy)]
pub struct Stop;

impl Event for Stop {
    type Payload = ();
    const NAME: &'static str = "stop";
}

/// Ask the host to load plugins for an entity.
///
/// Each spec is loaded and attached at the start of the next step, bound to
/// the given entity regardless of the spec's own `entity` field.
#[derive(Debug, Clone, Copy)]
pub struct LoadPlugins;

impl Event for LoadPlugins {
    type Payload = (Entity, Vec<PluginSpec>);
    const NAME: &'static str = "load_plugins";
}

struct Subscriber<P> {
    id: u64,
    callback: Box<dyn Fn(&P) + Send + Sync>,
    /// Held for every invocation; cleared on disconnect.
    connected: Mutex<bool>,
}

impl<P> Subscriber<P> {
    fn connected(&self) -> MutexGuard<'_, bool> {
        self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The part of a channel a [`Connection`] needs, independent of the payload type.
trait ConnectionSlot: Send + Sync {
    fn disconnect(&self, id: u64);
    fn is_connected(&self, id: u64) -> bool;
}

/// Subscribers of one event, in connection order.
pub struct EventChannel<P> {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Arc<Subscriber<P>>>>,
    /// Held for the whole of a notification so notifications never overlap.
    notify_lock: Mutex<()>,
    /// Thread running the current notification, if any.
    notifier: Mutex<Option<ThreadId>>,
}

impl<P: Send + Sync + 'static> EventChannel<P> {
    /// Create an empty channel.
    #[must_use]
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
            notify_lock: Mutex::new(()),
            notifier: Mutex::new(None),
        })
    }

    /// Subscribe `callback`. It fires once per notification until the
    /// returned [`Connection`] is dropped.
    ///
    /// A callback connected while a notification is in progress first fires
    /// on the next notification.
    pub fn connect(self: &Arc<Self>, callback: impl Fn(&P) + Send + Sync + 'static) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers().push(Arc::new(Subscriber {
            id,
            callback: Box::new(callback),
            connected: Mutex::new(true),
        }));
        debug!(event = self.name, connection = id, "connected");
        let slot: Weak<dyn ConnectionSlot> = Arc::downgrade(self) as Weak<dyn ConnectionSlot>;
        Connection {
            id,
            event: self.name,
            slot,
        }
    }

    /// Invoke every connected callback with `payload`, in connection order.
    ///
    /// Returns the number of callbacks that ran to completion. A panicking
    /// callback is logged and skipped; later callbacks still run.
    ///
    /// A callback must not emit the same event again: notifications on a
    /// channel are serialised, so that would deadlock.
    pub fn notify(&self, payload: &P) -> usize {
        let _serial = self
            .notify_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let snapshot: Vec<Arc<Subscriber<P>>> = self.subscribers().clone();
        *self.notifier() = Some(thread::current().id());

        let mut delivered = 0;
        for subscriber in snapshot {
            let connected = subscriber.connected();
            // Disconnected since the snapshot was taken.
            if !*connected {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(payload))) {
                Ok(()) => delivered += 1,
                Err(cause) => error!(
                    event = self.name,
                    connection = subscriber.id,
                    reason = %panic_message(cause.as_ref()),
                    "event subscriber panicked"
                ),
            }
        }

        *self.notifier() = None;
        delivered
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Event name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Arc<Subscriber<P>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notifier(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.notifier.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Send + Sync + 'static> ConnectionSlot for EventChannel<P> {
    fn disconnect(&self, id: u64) {
        let removed = {
            let mut subscribers = self.subscribers();
            subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|pos| subscribers.remove(pos))
        };
        let Some(subscriber) = removed else {
            return;
        };

        if *self.notifier() == Some(thread::current().id()) {
            // Called from a callback of this channel. If that callback is this
            // subscriber, its lock is held further up this thread's stack.
            match subscriber.connected.try_lock() {
                Ok(mut connected) => *connected = false,
                Err(TryLockError::Poisoned(poisoned)) => *poisoned.into_inner() = false,
                Err(TryLockError::WouldBlock) => {}
            }
        } else {
            *subscriber.connected() = false;
        }
        debug!(event = self.name, connection = id, "disconnected");
    }

    fn is_connected(&self, id: u64) -> bool {
        self.subscribers().iter().any(|s| s.id == id)
    }
}

impl<P> std::fmt::Debug for EventChannel<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A live subscription. Dropping it disconnects the callback.
#[must_use = "dropping a Connection disconnects its callback immediately"]
pub struct Connection {
    id: u64,
    event: &'static str,
    slot: Weak<dyn ConnectionSlot>,
}

impl Connection {
    /// Returns `true` while the callback is still subscribed.
    ///
    /// Becomes `false` if the channel itself has been dropped.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.slot
            .upgrade()
            .is_some_and(|slot| slot.is_connected(self.id))
    }

    /// Name of the event this connection listens to.
    #[must_use]
    pub fn event(&self) -> &'static str {
        self.event
    }

    /// Disconnect now. Equivalent to dropping the connection.
    pub fn disconnect(self) {}
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.upgrade() {
            slot.disconnect(self.id);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("event", &self.event)
            .finish()
    }
}

/// Typed event channels, created on first use.
///
/// Shared between the simulation thread and the render thread, usually as an
/// `Arc<EventManager>`.
#[derive(Default)]
pub struct EventManager {
    channels: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl EventManager {
    /// Create a manager with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel for event `E`, created if needed.
    #[must_use]
    pub fn channel<E: Event>(&self) -> Arc<EventChannel<E::Payload>> {
        // Clone out of the map before returning: callbacks may call back into
        // the manager, and a held shard lock would deadlock them.
        let channel = Arc::clone(
            self.channels
                .entry(TypeId::of::<E>())
                .or_insert_with(|| {
                    EventChannel::<E::Payload>::new(E::NAME) as Arc<dyn Any + Send + Sync>
                })
                .value(),
        );
        match channel.downcast::<EventChannel<E::Payload>>() {
            Ok(channel) => channel,
            Err(_) => unreachable!("channel for '{}' stored under another event type", E::NAME),
        }
    }

    /// Subscribe to event `E`.
    pub fn connect<E: Event>(
        &self,
        callback: impl Fn(&E::Payload) + Send + Sync + 'static,
    ) -> Connection {
        self.channel::<E>().connect(callback)
    }

    /// Notify every subscriber of `E`. Returns how many callbacks completed.
    pub fn emit<E: Event>(&self, payload: &E::Payload) -> usize {
        self.channel::<E>().notify(payload)
    }

    /// Number of live connections to `E`.
    #[must_use]
    pub fn connection_count<E: Event>(&self) -> usize {
        self.channels
            .get(&TypeId::of::<E>())
            .map(|entry| Arc::clone(entry.value()))
            .and_then(|channel| channel.downcast::<EventChannel<E::Payload>>().ok())
            .map_or(0, |channel| channel.connection_count())
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("channels", &self.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_subscribers_fire_once_in_connection_order() {
        let events = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        let _c1 = events.connect::<SceneUpdate>(move |()| l1.lock().unwrap().push("c1"));
        let l2 = Arc::clone(&log);
        let _c2 = events.connect::<SceneUpdate>(move |()| l2.lock().unwrap().push("c2"));

        assert_eq!(events.emit::<SceneUpdate>(&()), 2);
        assert_eq!(*log.lock().unwrap(), vec!["c1", "c2"]);
    }

    #[test]
    fn test_dropping_connection_stops_delivery() {
        let events = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let conn = events.connect::<SceneUpdate>(move |()| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(conn.is_connected());
        events.emit::<SceneUpdate>(&());
        drop(conn);
        events.emit::<SceneUpdate>(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(events.connection_count::<SceneUpdate>(), 0);
    }

    #[test]
    fn test_payload_is_delivered() {
        let events = EventManager::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let _conn = events.connect::<Pause>(move |paused| *s.lock().unwrap() = Some(*paused));

        events.emit::<Pause>(&true);
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_events_are_independent() {
        let events = EventManager::new();
        let _pause = events.connect::<Pause>(|_| {});
        assert_eq!(events.connection_count::<Pause>(), 1);
        assert_eq!(events.connection_count::<Stop>(), 0);
        assert_eq!(events.emit::<Stop>(&()), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_later_ones() {
        let events = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = events.connect::<SceneUpdate>(|()| panic!("render failure"));
        let h = Arc::clone(&hits);
        let _good = events.connect::<SceneUpdate>(move |()| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(events.emit::<SceneUpdate>(&()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_connect_during_notify() {
        let events = Arc::new(EventManager::new());
        let late = Arc::new(Mutex::new(Vec::<Connection>::new()));
        let hits = Arc::new(AtomicUsize::new(0));

        let (ev, lt, h) = (Arc::clone(&events), Arc::clone(&late), Arc::clone(&hits));
        let _conn = events.connect::<SceneUpdate>(move |()| {
            let h = Arc::clone(&h);
            let conn = ev.connect::<SceneUpdate>(move |()| {
                h.fetch_add(1, Ordering::SeqCst);
            });
            lt.lock().unwrap().push(conn);
        });

        events.emit::<SceneUpdate>(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0, "late subscriber fires next time");
        events.emit::<SceneUpdate>(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_outlives_channel() {
        let channel = EventChannel::<()>::new("orphan");
        let conn = channel.connect(|()| {});
        drop(channel);
        assert!(!conn.is_connected());
        drop(conn);
    }

    #[test]
    fn test_notify_from_another_thread() {
        let events = Arc::new(EventManager::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _conn = events.connect::<SceneUpdate>(move |()| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let render = {
            let events = Arc::clone(&events);
            thread::spawn(move || {
                for _ in 0..10 {
                    events.emit::<SceneUpdate>(&());
                }
            })
        };
        render.join().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_drop_waits_for_running_callback() {
        let events = Arc::new(EventManager::new());
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let (e, f, c) = (Arc::clone(&entered), Arc::clone(&finished), Arc::clone(&calls));
        let conn = events.connect::<SceneUpdate>(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
            e.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            f.store(true, Ordering::SeqCst);
        });

        let render = {
            let events = Arc::clone(&events);
            thread::spawn(move || events.emit::<SceneUpdate>(&()))
        };
        while !entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        drop(conn);
        assert!(finished.load(Ordering::SeqCst), "drop returned mid-invocation");
        render.join().unwrap();

        events.emit::<SceneUpdate>(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_drop_connections_during_notify() {
        let events = Arc::new(EventManager::new());
        let own = Arc::new(Mutex::new(None::<Connection>));
        let other = Arc::new(Mutex::new(None::<Connection>));
        let hits = Arc::new(AtomicUsize::new(0));

        let (o, t, h) = (Arc::clone(&own), Arc::clone(&other), Arc::clone(&hits));
        *own.lock().unwrap() = Some(events.connect::<SceneUpdate>(move |()| {
            h.fetch_add(1, Ordering::SeqCst);
            drop(o.lock().unwrap().take());
            drop(t.lock().unwrap().take());
        }));
        let h = Arc::clone(&hits);
        *other.lock().unwrap() = Some(events.connect::<SceneUpdate>(move |()| {
            h.fetch_add(100, Ordering::SeqCst);
        }));

        assert_eq!(events.emit::<SceneUpdate>(&()), 1, "the second subscriber was dropped first");
        assert_eq!(events.emit::<SceneUpdate>(&()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(events.connection_count::<SceneUpdate>(), 0);
    }

    #[test]
    fn test_load_plugins_payload() {
        let events = EventManager::new();
        let requested = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&requested);
        let _conn = events.connect::<LoadPlugins>(move |(entity, specs)| {
            let mut requested = r.lock().unwrap();
            requested.extend(specs.iter().map(|spec| (*entity, spec.name.clone())));
        });

        let entity = Entity::from_raw(3);
        events.emit::<LoadPlugins>(&(entity, vec![PluginSpec::new("a"), PluginSpec::new("b")]));
        assert_eq!(
            *requested.lock().unwrap(),
            [(entity, "a".to_string()), (entity, "b".to_string())]
        );
    }
}
