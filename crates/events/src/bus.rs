//! Event registry (registration, removal, introspection).
//!
//! Dispatch lives in [`crate::dispatch`]; this module owns the state it reads.
//!
//! ## State
//!
//! For every event name the bus keeps two handler sets: synchronous handlers
//! and background handlers. A handler appears at most once across both sets
//! of one event, so registering it again (in either mode) is a no-op. The same
//! handler can be registered under any number of events.
//!
//! Unknown event names behave like events with no handlers. An event whose
//! last handler is removed is dropped from the map.
//!
//! ## Thread Safety
//!
//! The map sits behind a `RwLock`. Mutations take the write lock; dispatch and
//! introspection take the read lock only long enough to copy what they need,
//! so handlers never run while the lock is held and may freely call back into
//! the bus.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use evbus_core::{BusConfig, BusError, BusResult, HandlerId};

use crate::failure::{FailureSink, LogFailureSink};
use crate::handler::{DispatchMode, Handler, HandlerResult, HandlerSelector};

/// Handlers subscribed to one event.
pub(crate) struct HandlerSets<A> {
    pub(crate) sync: Vec<Handler<A>>,
    pub(crate) background: Vec<Handler<A>>,
}

impl<A> Default for HandlerSets<A> {
    fn default() -> Self {
        Self {
            sync: Vec::new(),
            background: Vec::new(),
        }
    }
}

impl<A> HandlerSets<A> {
    fn contains(&self, id: HandlerId) -> bool {
        self.sync.iter().chain(&self.background).any(|h| h.id() == id)
    }

    fn set_mut(&mut self, mode: DispatchMode) -> &mut Vec<Handler<A>> {
        match mode {
            DispatchMode::Sync => &mut self.sync,
            DispatchMode::Background => &mut self.background,
        }
    }

    fn len(&self) -> usize {
        self.sync.len() + self.background.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Copy of an event's handlers taken at dispatch time.
pub(crate) struct Snapshot<A> {
    pub(crate) background: Vec<Handler<A>>,
    pub(crate) sync: Vec<Handler<A>>,
}

impl<A> Snapshot<A> {
    pub(crate) fn is_empty(&self) -> bool {
        self.background.is_empty() && self.sync.is_empty()
    }
}

/// In-process event bus.
///
/// `A` is the argument type passed to every handler on dispatch. Use a tuple
/// or a struct for several values, or `()` (the default) for none.
///
/// ```ignore
/// let bus: EventBus<String> = EventBus::new();
/// bus.on("user.created", "send_welcome", DispatchMode::Background, |email: &String| {
///     mailer::welcome(email)
/// });
/// bus.dispatch("user.created", "ada@example.com".to_string())?;
/// ```
pub struct EventBus<A = ()> {
    handlers: RwLock<HashMap<String, HandlerSets<A>>>,
    pub(crate) config: BusConfig,
    pub(crate) failure_sink: Arc<dyn FailureSink>,
}

impl<A> EventBus<A> {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            config,
            failure_sink: Arc::new(LogFailureSink),
        }
    }

    /// Route background handler failures to `sink` instead of the log.
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failure_sink = sink;
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Subscribe `handler` to `event`.
    ///
    /// Does nothing if the handler is already subscribed to `event`, whatever
    /// mode it was registered with. Returns the handler's id either way; it
    /// can be passed to [`EventBus::unregister_id`].
    pub fn register(
        &self,
        handler: Handler<A>,
        event: impl Into<String>,
        mode: DispatchMode,
    ) -> HandlerId {
        let event = event.into();
        let id = handler.id();
        let mut map = self.write();
        let sets = map.entry(event.clone()).or_default();

        if sets.contains(id) {
            trace!(event = %event, handler = %handler.name(), "handler already registered");
            return id;
        }

        debug!(
            event = %event,
            handler = %handler.name(),
            handler_id = %id,
            background = mode.is_background(),
            "registered handler"
        );
        sets.set_mut(mode).push(handler);
        id
    }

    /// Build a handler from `func`, subscribe it to `event` and return it.
    ///
    /// The returned handler can be registered under more events; it keeps the
    /// same identity.
    pub fn on<F>(
        &self,
        event: impl Into<String>,
        name: impl Into<String>,
        mode: DispatchMode,
        func: F,
    ) -> Handler<A>
    where
        F: Fn(&A) -> HandlerResult + Send + Sync + 'static,
    {
        let handler = Handler::new(name, func);
        self.register(handler.clone(), event, mode);
        handler
    }

    /// Remove handlers named `handler_name` from `event`.
    ///
    /// Synchronous handlers are searched first. Only when none matched there
    /// are background handlers searched. Every handler with that name in the
    /// first matching set is removed; the count is returned.
    ///
    /// Fails with [`BusError::HandlerNotFound`] if no handler of `event` has
    /// that name, leaving the registry untouched.
    pub fn unregister(&self, handler_name: &str, event: &str) -> BusResult<usize> {
        let mut map = self.write();
        let Some(sets) = map.get_mut(event) else {
            return Err(BusError::handler_not_found(event, handler_name));
        };

        let mut removed = take_where(&mut sets.sync, |h| h.name() == handler_name);
        if removed.is_empty() {
            removed = take_where(&mut sets.background, |h| h.name() == handler_name);
        }
        if removed.is_empty() {
            return Err(BusError::handler_not_found(event, handler_name));
        }

        if sets.is_empty() {
            map.remove(event);
        }
        // Removed handlers must drop outside the lock; their state may re-enter the bus.
        drop(map);

        let count = removed.len();
        debug!(event, handler = handler_name, removed = count, "unregistered handler");
        Ok(count)
    }

    /// Remove the handler with identity `id` from `event`.
    pub fn unregister_id(&self, id: HandlerId, event: &str) -> BusResult<()> {
        let mut map = self.write();
        let mut removed = Vec::new();
        if let Some(sets) = map.get_mut(event) {
            removed.extend(take_where(&mut sets.sync, |h| h.id() == id));
            removed.extend(take_where(&mut sets.background, |h| h.id() == id));
            if sets.is_empty() {
                map.remove(event);
            }
        }
        drop(map);

        if removed.is_empty() {
            return Err(BusError::handler_not_found(event, id.to_string()));
        }
        debug!(event, handler_id = %id, "unregistered handler");
        Ok(())
    }

    /// Total number of registrations across all events and both modes.
    pub fn count(&self) -> usize {
        self.read().values().map(HandlerSets::len).sum()
    }

    /// Whether the handler `id` is subscribed to `event`.
    pub fn contains(&self, event: &str, id: HandlerId) -> bool {
        self.read().get(event).is_some_and(|sets| sets.contains(id))
    }

    /// Declared names of the handlers of `event`: synchronous first, then background.
    pub fn handler_names(&self, event: &str) -> Vec<String> {
        self.read()
            .get(event)
            .map(|sets| {
                sets.sync
                    .iter()
                    .chain(&sets.background)
                    .map(|h| h.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Events with at least one handler, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy the handlers of `event`, optionally keeping only selected names.
    pub(crate) fn snapshot(&self, event: &str, only: Option<&HandlerSelector>) -> Snapshot<A> {
        let map = self.read();
        let Some(sets) = map.get(event) else {
            return Snapshot {
                background: Vec::new(),
                sync: Vec::new(),
            };
        };

        let keep = |h: &&Handler<A>| only.is_none_or(|selector| selector.matches(h));
        Snapshot {
            background: sets.background.iter().filter(keep).cloned().collect(),
            sync: sets.sync.iter().filter(keep).cloned().collect(),
        }
    }

    // Registry mutations are single-step, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HandlerSets<A>>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HandlerSets<A>>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Move the handlers matching `pred` out of `set`.
fn take_where<A>(
    set: &mut Vec<Handler<A>>,
    pred: impl Fn(&Handler<A>) -> bool,
) -> Vec<Handler<A>> {
    let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(set).into_iter().partition(|h| pred(h));
    *set = kept;
    taken
}

impl<A> Default for EventBus<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> core::fmt::Debug for EventBus<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .field("registrations", &self.count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<A> core::fmt::Display for EventBus<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "<EventBus: {} subscribed events>", self.count())
    }
}
