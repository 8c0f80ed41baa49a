//! Pending queries.
//!
//! Instead of scanning the store every step, a system can register a
//! [`QueryDescriptor`] with a callback. The scheduler evaluates every
//! registered query once per step, before PreUpdate, and calls the callback
//! for each matching entity. Queries stay registered until the system cancels
//! them or the instance is detached.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use engine_component::{ComponentStore, Entity, QueryDescriptor};

use crate::context::UpdateInfo;
use crate::error::panic_message;

/// Callback of a pending query, invoked once per matching entity.
pub type QueryCallback = Box<dyn FnMut(&UpdateInfo, Entity, &mut dyn ComponentStore) + Send>;

/// Identifies a registered query within its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

struct PendingQuery {
    id: QueryId,
    descriptor: QueryDescriptor,
    callback: QueryCallback,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    queries: Vec<PendingQuery>,
    /// Ids taken out for the delivery in progress.
    in_flight: HashSet<QueryId>,
    /// In-flight ids cancelled during the delivery in progress.
    cancelled: HashSet<QueryId>,
}

/// The pending queries of one system instance.
///
/// Cloning yields another handle to the same list, so a system can keep one
/// to cancel its queries later.
#[derive(Clone, Default)]
pub struct QueryList {
    inner: Arc<Mutex<Inner>>,
}

impl QueryList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query. Registration order is delivery order.
    ///
    /// Registering from inside a callback takes effect from the next delivery.
    pub fn register(
        &self,
        descriptor: QueryDescriptor,
        callback: impl FnMut(&UpdateInfo, Entity, &mut dyn ComponentStore) + Send + 'static,
    ) -> QueryId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = QueryId(inner.next_id);
        inner.queries.push(PendingQuery {
            id,
            descriptor,
            callback: Box::new(callback),
        });
        id
    }

    /// Cancel a query. Returns `false` if it was not registered.
    ///
    /// Cancelling from inside a callback stops the query from seeing any
    /// further entity in the current delivery.
    pub fn cancel(&self, id: QueryId) -> bool {
        let mut inner = self.lock();
        if let Some(pos) = inner.queries.iter().position(|q| q.id == id) {
            inner.queries.remove(pos);
            return true;
        }
        if inner.in_flight.contains(&id) {
            return inner.cancelled.insert(id);
        }
        false
    }

    /// Drop every query without invoking any callback.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.queries.clear();
        let in_flight: Vec<QueryId> = inner.in_flight.iter().copied().collect();
        inner.cancelled.extend(in_flight);
    }

    /// Number of registered queries.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.queries.len() + inner.in_flight.len() - inner.cancelled.len()
    }

    /// Returns `true` if no query is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate every query against `store` and invoke the callbacks.
    ///
    /// Returns the number of callback invocations. A panicking callback stops
    /// this delivery and is returned as the error message; the list itself is
    /// kept intact for the next step either way.
    pub(crate) fn deliver(
        &self,
        info: &UpdateInfo,
        store: &mut dyn ComponentStore,
    ) -> Result<usize, String> {
        let mut taken = {
            let mut inner = self.lock();
            let taken = std::mem::take(&mut inner.queries);
            inner.in_flight = taken.iter().map(|q| q.id).collect();
            taken
        };

        let mut outcome = Ok(0);
        'queries: for query in &mut taken {
            for entity in store.query(&query.descriptor) {
                if self.is_cancelled(query.id) {
                    continue 'queries;
                }
                let call = panic::catch_unwind(AssertUnwindSafe(|| {
                    (query.callback)(info, entity, &mut *store)
                }));
                match call {
                    Ok(()) => {
                        if let Ok(calls) = outcome.as_mut() {
                            *calls += 1;
                        }
                    }
                    Err(cause) => {
                        outcome = Err(format!(
                            "query callback panicked on {entity}: {}",
                            panic_message(cause.as_ref())
                        ));
                        break 'queries;
                    }
                }
            }
        }

        let mut inner = self.lock();
        let cancelled = std::mem::take(&mut inner.cancelled);
        inner.in_flight.clear();
        taken.retain(|q| !cancelled.contains(&q.id));
        let registered_meanwhile = std::mem::take(&mut inner.queries);
        taken.extend(registered_meanwhile);
        inner.queries = taken;
        outcome
    }

    fn is_cancelled(&self, id: QueryId) -> bool {
        self.lock().cancelled.contains(&id)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for QueryList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryList")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use engine_component::{Component, World};

    use super::*;

    #[derive(Debug)]
    struct Marker;

    impl Component for Marker {
        fn type_name() -> &'static str {
            "Marker"
        }
    }

    fn world_with_markers(n: usize) -> (World, Vec<Entity>) {
        let mut world = World::new();
        let mut marked = Vec::new();
        for _ in 0..n {
            let e = world.spawn();
            world.insert(e, Marker).unwrap();
            marked.push(e);
        }
        world.spawn(); // unmarked
        (world, marked)
    }

    fn info() -> UpdateInfo {
        UpdateInfo::new(Duration::from_millis(1))
    }

    #[test]
    fn test_callbacks_fire_per_match_and_persist() {
        let (mut world, marked) = world_with_markers(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let list = QueryList::new();
        let s = Arc::clone(&seen);
        list.register(
            QueryDescriptor::new().with_component::<Marker>(),
            move |_, entity, _| s.lock().unwrap().push(entity),
        );

        assert_eq!(list.deliver(&info(), &mut world), Ok(2));
        assert_eq!(list.deliver(&info(), &mut world), Ok(2));
        assert_eq!(list.len(), 1, "queries persist across steps");

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, [marked.clone(), marked].concat());
    }

    #[test]
    fn test_cancel_before_delivery() {
        let (mut world, _) = world_with_markers(1);
        let list = QueryList::new();
        let id = list.register(QueryDescriptor::new(), |_, _, _| panic!("must not run"));
        assert!(list.cancel(id));
        assert!(!list.cancel(id));
        assert_eq!(list.deliver(&info(), &mut world), Ok(0));
        assert!(list.is_empty());
    }

    #[test]
    fn test_cancel_from_inside_callback() {
        let (mut world, _) = world_with_markers(3);
        let list = QueryList::new();
        let handle = list.clone();
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let own_id = Arc::new(Mutex::new(None::<QueryId>));
        let id_slot = Arc::clone(&own_id);
        let id = list.register(
            QueryDescriptor::new().with_component::<Marker>(),
            move |_, _, _| {
                *c.lock().unwrap() += 1;
                if let Some(id) = *id_slot.lock().unwrap() {
                    handle.cancel(id);
                }
            },
        );
        *own_id.lock().unwrap() = Some(id);

        assert_eq!(list.deliver(&info(), &mut world), Ok(1));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_register_from_inside_callback_applies_next_delivery() {
        let (mut world, _) = world_with_markers(1);
        let list = QueryList::new();
        let handle = list.clone();
        let mut registered = false;
        list.register(QueryDescriptor::new().with_component::<Marker>(), move |_, _, _| {
            if !registered {
                registered = true;
                handle.register(QueryDescriptor::new().with_component::<Marker>(), |_, _, _| {});
            }
        });

        assert_eq!(list.deliver(&info(), &mut world), Ok(1));
        assert_eq!(list.len(), 2);
        assert_eq!(list.deliver(&info(), &mut world), Ok(2));
    }

    #[test]
    fn test_panicking_callback_keeps_list() {
        let (mut world, _) = world_with_markers(1);
        let list = QueryList::new();
        list.register(QueryDescriptor::new().with_component::<Marker>(), |_, _, _| {
            panic!("bad query")
        });

        let err = list.deliver(&info(), &mut world).unwrap_err();
        assert!(err.contains("bad query"), "unexpected message: {err}");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_callback_can_write_store() {
        #[derive(Debug, PartialEq)]
        struct Count(u32);
        impl Component for Count {
            fn type_name() -> &'static str {
                "Count"
            }
        }

        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Count(0)).unwrap();

        let list = QueryList::new();
        list.register(QueryDescriptor::new().with_component::<Count>(), |_, entity, store| {
            if let Some(count) = store.component_mut::<Count>(entity) {
                count.0 += 1;
            }
        });
        list.deliver(&info(), &mut world).unwrap();
        list.deliver(&info(), &mut world).unwrap();
        assert_eq!(world.get::<Count>(e), Some(&Count(2)));
    }
}
