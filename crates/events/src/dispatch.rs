//! Dispatch: invoking the handlers of an event.
//!
//! Within one dispatch call:
//!
//! 1. the event's handlers are copied out of the registry,
//! 2. every background handler is launched on its own thread,
//! 3. then every synchronous handler runs in the calling thread.
//!
//! Background handlers are never awaited. Their errors and panics go to the
//! bus's [`FailureSink`](crate::FailureSink). The first synchronous handler
//! error is returned to the caller as-is and the remaining synchronous
//! handlers of that call are skipped.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, trace};

use crate::bus::{EventBus, Snapshot};
use crate::failure::{BackgroundFailure, FailureReason, FailureSink, panic_message};
use crate::handler::{Handler, HandlerError, HandlerResult, HandlerSelector};

impl<A> EventBus<A>
where
    A: Send + Sync + 'static,
{
    /// Invoke every handler subscribed to `event` with `args`.
    ///
    /// A no-op when `event` has no handlers.
    pub fn dispatch(&self, event: &str, args: A) -> HandlerResult {
        let snapshot = self.snapshot(event, None);
        self.run(event, snapshot, args)
    }

    /// Like [`EventBus::dispatch`], restricted to handlers whose declared name
    /// is in `handler_names`.
    pub fn dispatch_only(
        &self,
        event: &str,
        handler_names: impl Into<HandlerSelector>,
        args: A,
    ) -> HandlerResult {
        let selector = handler_names.into();
        let snapshot = self.snapshot(event, Some(&selector));
        self.run(event, snapshot, args)
    }

    fn run(&self, event: &str, snapshot: Snapshot<A>, args: A) -> HandlerResult {
        if snapshot.is_empty() {
            trace!(event, "no handlers for event");
            return Ok(());
        }

        let Snapshot { background, sync } = snapshot;
        debug!(
            event,
            background = background.len(),
            sync = sync.len(),
            "dispatching event"
        );

        let args = Arc::new(args);
        for handler in background {
            self.launch(event, handler, Arc::clone(&args));
        }

        for handler in &sync {
            handler.call(&args)?;
        }
        Ok(())
    }

    fn launch(&self, event: &str, handler: Handler<A>, args: Arc<A>) {
        let mut builder = thread::Builder::new().name(self.config.thread_name(event));
        if let Some(bytes) = self.config.thread_stack_size {
            builder = builder.stack_size(bytes);
        }

        let sink = Arc::clone(&self.failure_sink);
        let worker_event = event.to_string();
        let worker_handler = handler.clone();
        let spawned = builder.spawn(move || {
            run_background(&worker_event, &worker_handler, &args, sink.as_ref());
        });

        if let Err(e) = spawned {
            error!(event, handler = %handler.name(), error = %e, "failed to spawn background handler");
            self.failure_sink.report(BackgroundFailure::new(
                event,
                &handler,
                FailureReason::Spawn(e.to_string()),
            ));
        }
    }
}

/// Body of a background thread: run the handler and contain any failure.
fn run_background<A>(event: &str, handler: &Handler<A>, args: &A, sink: &dyn FailureSink) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.call(args)));
    let reason = match outcome {
        Ok(Ok(())) => {
            trace!(event, handler = %handler.name(), "background handler finished");
            return;
        }
        Ok(Err(err)) => FailureReason::Error(format!("{err:#}")),
        Err(payload) => FailureReason::Panic(panic_message(payload.as_ref())),
    };
    sink.report(BackgroundFailure::new(event, handler, reason));
}

impl<A> EventBus<A>
where
    A: Default + Send + Sync + 'static,
{
    /// Wrap `func` so that `event` is dispatched after it returns successfully.
    ///
    /// The wrapped function calls `func`; on `Ok` it dispatches `event` with
    /// `A::default()` and then hands back the value. On `Err` the error is
    /// returned and nothing is dispatched. An error from a synchronous
    /// subscriber of `event` replaces the value.
    pub fn dispatch_after<'a, F, T, R, E>(
        &'a self,
        event: impl Into<String>,
        func: F,
    ) -> impl Fn(T) -> Result<R, E> + 'a
    where
        F: Fn(T) -> Result<R, E> + 'a,
        E: From<HandlerError>,
    {
        let event = event.into();
        move |input: T| {
            let value = func(input)?;
            self.dispatch(&event, A::default()).map_err(E::from)?;
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::{CollectingFailureSink, DispatchMode};

    const WAIT: Duration = Duration::from_secs(5);

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Handler<()> {
        let log = Arc::clone(log);
        let label = name.to_string();
        Handler::infallible(name, move |_| log.lock().unwrap().push(label.clone()))
    }

    #[test]
    fn dispatch_without_handlers_is_noop() {
        let bus: EventBus = EventBus::new();
        assert!(bus.dispatch("nothing", ()).is_ok());
        assert!(bus.dispatch_only("nothing", "h", ()).is_ok());
    }

    #[test]
    fn sync_handlers_receive_arguments() {
        let bus: EventBus<(String, u32)> = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        bus.on("order.placed", "record", DispatchMode::Sync, move |args: &(String, u32)| {
            *seen_clone.lock().unwrap() = Some(args.clone());
            Ok(())
        });

        bus.dispatch("order.placed", ("sku-1".to_string(), 3)).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(("sku-1".to_string(), 3)));
    }

    #[test]
    fn sync_error_propagates_and_skips_remaining_sync_handlers() {
        let bus: EventBus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let calls = Arc::clone(&calls);
            bus.on("evt", format!("h{i}"), DispatchMode::Sync, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("handler h{i} failed")
            });
        }

        let err = bus.dispatch("evt", ()).unwrap_err();
        assert!(err.to_string().ends_with("failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn background_handlers_are_launched_before_sync_handlers_run() {
        let bus: EventBus = EventBus::new();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        bus.on("evt", "bg", DispatchMode::Background, move |_| {
            started_tx.lock().unwrap().send(()).ok();
            Ok(())
        });

        // The sync handler waits for the background one: this only finishes
        // if the background thread was started first.
        let started_rx = Mutex::new(started_rx);
        bus.on("evt", "fg", DispatchMode::Sync, move |_| {
            started_rx.lock().unwrap().recv_timeout(WAIT)?;
            Ok(())
        });

        bus.dispatch("evt", ()).unwrap();
    }

    #[test]
    fn background_error_goes_to_failure_sink() {
        let sink = Arc::new(CollectingFailureSink::new());
        let bus: EventBus = EventBus::new().with_failure_sink(sink.clone());
        let handler = bus.on("evt", "flaky", DispatchMode::Background, |_| {
            Err(anyhow::anyhow!("connection reset"))
        });

        bus.dispatch("evt", ()).unwrap();

        let failures = sink.wait_for(1, WAIT);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].event, "evt");
        assert_eq!(failures[0].handler, "flaky");
        assert_eq!(failures[0].handler_id, handler.id());
        assert_eq!(
            failures[0].reason,
            FailureReason::Error("connection reset".to_string())
        );
    }

    #[test]
    fn background_panic_is_contained() {
        let sink = Arc::new(CollectingFailureSink::new());
        let bus: EventBus = EventBus::new().with_failure_sink(sink.clone());
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.on("evt", "boom", DispatchMode::Background, |_| panic!("kaboom"));
        bus.register(recorder(&log, "fg"), "evt", DispatchMode::Sync);

        assert!(bus.dispatch("evt", ()).is_ok());
        assert_eq!(*log.lock().unwrap(), vec!["fg".to_string()]);

        let failures = sink.wait_for(1, WAIT);
        assert_eq!(failures[0].reason, FailureReason::Panic("kaboom".to_string()));
    }

    #[test]
    fn unspawnable_background_thread_is_reported_not_raised() {
        let sink = Arc::new(CollectingFailureSink::new());
        let config = evbus_core::BusConfig::default().with_thread_stack_size(usize::MAX);
        let bus: EventBus = EventBus::with_config(config).with_failure_sink(sink.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let handler = bus.on("evt", "never_runs", DispatchMode::Background, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.dispatch("evt", ()).is_ok());

        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].handler_id, handler.id());
        assert!(matches!(failures[0].reason, FailureReason::Spawn(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn background_threads_are_named_after_the_event() {
        let config = evbus_core::BusConfig::default().with_thread_prefix("audit");
        let bus: EventBus = EventBus::with_config(config);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        bus.on("login", "capture", DispatchMode::Background, move |_| {
            let name = thread::current().name().map(str::to_string);
            tx.lock().unwrap().send(name).ok();
            Ok(())
        });

        bus.dispatch("login", ()).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap().as_deref(), Some("audit-login"));
    }

    #[test]
    fn dispatch_only_filters_both_sets() {
        let bus: EventBus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        bus.register(recorder(&log, "h1"), "evt", DispatchMode::Sync);
        bus.register(recorder(&log, "h2"), "evt", DispatchMode::Sync);
        bus.on("evt", "bg", DispatchMode::Background, move |_| {
            tx.lock().unwrap().send(()).ok();
            Ok(())
        });

        bus.dispatch_only("evt", "h2", ()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["h2".to_string()]);

        bus.dispatch_only("evt", ["h1", "bg"], ()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["h2".to_string(), "h1".to_string()]);
        rx.recv_timeout(WAIT).unwrap();
    }

    #[test]
    fn handlers_may_reenter_the_bus() {
        let bus: Arc<EventBus> = Arc::new(EventBus::new());
        let weak = Arc::downgrade(&bus);

        bus.on("evt", "once", DispatchMode::Sync, move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.unregister("once", "evt")?;
            }
            Ok(())
        });

        bus.dispatch("evt", ()).unwrap();
        assert_eq!(bus.count(), 0);
        bus.dispatch("evt", ()).unwrap();
    }

    #[test]
    fn dispatch_after_runs_subscriber_after_success() {
        let bus: EventBus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(recorder(&log, "subscriber"), "done", DispatchMode::Sync);

        let inner = Arc::clone(&log);
        let wrapped = bus.dispatch_after("done", move |n: u32| -> anyhow::Result<u32> {
            inner.lock().unwrap().push("f".to_string());
            Ok(n * 2)
        });

        assert_eq!(wrapped(21).unwrap(), 42);
        assert_eq!(*log.lock().unwrap(), vec!["f".to_string(), "subscriber".to_string()]);
    }

    #[test]
    fn dispatch_after_skips_subscriber_on_failure() {
        let bus: EventBus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(recorder(&log, "subscriber"), "done", DispatchMode::Sync);

        let wrapped = bus.dispatch_after("done", |_: ()| -> anyhow::Result<()> {
            anyhow::bail!("wrapped function failed")
        });

        let err = wrapped(()).unwrap_err();
        assert_eq!(err.to_string(), "wrapped function failed");
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn dispatch_after_surfaces_subscriber_error() {
        let bus: EventBus = EventBus::new();
        bus.on("done", "strict", DispatchMode::Sync, |_| anyhow::bail!("subscriber failed"));

        let wrapped = bus.dispatch_after("done", |n: i32| -> anyhow::Result<i32> { Ok(n) });
        let err = wrapped(1).unwrap_err();
        assert_eq!(err.to_string(), "subscriber failed");
    }
}
