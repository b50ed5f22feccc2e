use dashmap::DashMap;
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::AbortHandle;

/// A request that has been sent and not answered yet.
struct InFlight {
    id: u64,
    handle: AbortHandle,
}

/// In-flight requests, at most one per caller tag.
///
/// Registering a request for a caller aborts the one registered before it. Each entry
/// carries an id, so a request that settles after being replaced never unregisters its
/// successor.
#[derive(Default)]
pub struct RequestRegistry {
    requests: DashMap<String, InFlight>,
    next_id: AtomicU64,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the task behind `handle` for `caller` and return its id.
    pub fn register(&self, caller: &str, handle: AbortHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Some(previous) = self
            .requests
            .insert(caller.to_string(), InFlight { id, handle })
        {
            info!(
                "aborting superseded request, caller: {}, id: {}",
                caller, previous.id
            );
            previous.handle.abort();
        }

        id
    }

    /// Register the task behind `handle` for `caller` and track it until it settles.
    ///
    /// Dropping the returned guard before `settle` aborts the task and unregisters it.
    pub fn track(&self, caller: &str, handle: AbortHandle) -> RequestGuard<'_> {
        let id = self.register(caller, handle);

        RequestGuard {
            registry: self,
            caller: caller.to_string(),
            id,
            settled: false,
        }
    }

    /// Unregister request `id` of `caller` once it has settled.
    ///
    /// Returns false when the request was superseded, aborted or torn down in the meantime.
    pub fn finish(&self, caller: &str, id: u64) -> bool {
        self.remove(caller, id).is_some()
    }

    /// Abort request `id` of `caller` and unregister it, if it is still registered.
    ///
    /// A request no longer registered was already aborted by whoever replaced or removed it.
    pub fn cancel(&self, caller: &str, id: u64) {
        if let Some(in_flight) = self.remove(caller, id) {
            info!("cancelling request, caller: {}, id: {}", caller, id);
            in_flight.handle.abort();
        }
    }

    fn remove(&self, caller: &str, id: u64) -> Option<InFlight> {
        self.requests
            .remove_if(caller, |_, in_flight| in_flight.id == id)
            .map(|(_, in_flight)| in_flight)
    }

    /// Abort the in-flight request of `caller`, returns whether there was one.
    pub fn abort(&self, caller: &str) -> bool {
        match self.requests.remove(caller) {
            Some((_, in_flight)) => {
                info!("aborting request, caller: {}, id: {}", caller, in_flight.id);
                in_flight.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every in-flight request, returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let callers = self
            .requests
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();

        callers
            .iter()
            .filter(|caller| self.abort(caller.as_str()))
            .count()
    }

    pub fn contains(&self, caller: &str) -> bool {
        self.requests.contains_key(caller)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// A request registered by `RequestRegistry::track`.
pub struct RequestGuard<'a> {
    registry: &'a RequestRegistry,
    caller: String,
    id: u64,
    settled: bool,
}

impl RequestGuard<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the request as settled and unregister it.
    ///
    /// Returns whether it was still the registered request of its caller. When it is not,
    /// its result must be dropped.
    pub fn settle(mut self) -> bool {
        self.settled = true;
        self.registry.finish(&self.caller, self.id)
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.cancel(&self.caller, self.id);
        }
    }
}
