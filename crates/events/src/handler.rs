use std::sync::Arc;

use evbus_core::HandlerId;

/// Error returned by a handler.
///
/// The registry never inspects it. It is forwarded to the dispatcher (sync
/// handlers) or to the failure sink (background handlers).
pub type HandlerError = anyhow::Error;

/// Result returned by a handler.
pub type HandlerResult = Result<(), HandlerError>;

type HandlerFn<A> = dyn Fn(&A) -> HandlerResult + Send + Sync;

/// A named callable subscribed to one or more events.
///
/// A handler's identity is its [`HandlerId`], assigned by [`Handler::new`] and
/// shared by every clone. Registering a clone of an already registered handler
/// is therefore a duplicate; building a second handler from the same closure
/// is not.
///
/// The declared name is only used for lookup by name ([`EventBus::unregister`]
/// and [`EventBus::dispatch_only`]). Several handlers may share a name.
///
/// [`EventBus::unregister`]: crate::EventBus::unregister
/// [`EventBus::dispatch_only`]: crate::EventBus::dispatch_only
pub struct Handler<A> {
    id: HandlerId,
    name: Arc<str>,
    func: Arc<HandlerFn<A>>,
}

impl<A> Handler<A> {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&A) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            id: HandlerId::new(),
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    /// Build a handler from a closure that cannot fail.
    pub fn infallible<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        Self::new(name, move |args: &A| {
            func(args);
            Ok(())
        })
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the handler in the current thread.
    pub fn call(&self, args: &A) -> HandlerResult {
        (self.func)(args)
    }
}

impl<A> Clone for Handler<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            func: Arc::clone(&self.func),
        }
    }
}

impl<A> core::fmt::Debug for Handler<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<A> PartialEq for Handler<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<A> Eq for Handler<A> {}

impl<A> core::hash::Hash for Handler<A> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Where a registered handler runs when its event is dispatched.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// In the dispatching thread, blocking the caller.
    #[default]
    Sync,
    /// On a new thread, not awaited by the caller.
    Background,
}

impl DispatchMode {
    pub fn is_background(self) -> bool {
        matches!(self, Self::Background)
    }
}

impl From<bool> for DispatchMode {
    /// `true` selects background execution.
    fn from(background: bool) -> Self {
        if background { Self::Background } else { Self::Sync }
    }
}

/// Declared handler names accepted by [`EventBus::dispatch_only`].
///
/// Converts from a single name or from a list of names.
///
/// [`EventBus::dispatch_only`]: crate::EventBus::dispatch_only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerSelector {
    names: Vec<String>,
}

impl HandlerSelector {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches<A>(&self, handler: &Handler<A>) -> bool {
        self.contains(handler.name())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl From<&str> for HandlerSelector {
    fn from(name: &str) -> Self {
        Self::new([name])
    }
}

impl From<String> for HandlerSelector {
    fn from(name: String) -> Self {
        Self::new([name])
    }
}

impl From<Vec<String>> for HandlerSelector {
    fn from(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl From<Vec<&str>> for HandlerSelector {
    fn from(names: Vec<&str>) -> Self {
        Self::new(names)
    }
}

impl From<&[&str]> for HandlerSelector {
    fn from(names: &[&str]) -> Self {
        Self::new(names.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for HandlerSelector {
    fn from(names: [&str; N]) -> Self {
        Self::new(names)
    }
}
