//! Event registry for attribute change notifications.
//!
//! Listeners are asynchronous callables registered under an event name.
//! Emitting an event runs every listener registered for that name, one
//! after the other, in registration order. Each listener runs to completion
//! (including its own suspension points) before the next one starts.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;

use crate::config::ListenerPolicy;
use crate::error::{Error, Result};

/// Future returned by a listener.
pub type ListenerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A registered event listener.
pub type Listener<P> = Arc<dyn Fn(P) -> ListenerFuture + Send + Sync>;

/// Outcome of a single emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Listeners that completed successfully
    pub delivered: usize,
    /// Listeners that returned an error or panicked
    pub failed: usize,
}

impl EmitReport {
    /// Number of listeners that were invoked.
    pub fn invoked(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Mapping from event name to an insertion-ordered list of listeners.
///
/// Cloning the registry yields a handle to the same listener table, so a
/// background task can emit into the listeners registered by the owner.
pub struct EventRegistry<P> {
    listeners: Arc<RwLock<HashMap<String, Vec<Listener<P>>>>>,
    policy: ListenerPolicy,
}

impl<P> Clone for EventRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
            policy: self.policy,
        }
    }
}

impl<P> Default for EventRegistry<P>
where
    P: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventRegistry<P>
where
    P: Clone + Send + 'static,
{
    /// Create an empty registry that isolates listener failures.
    pub fn new() -> Self {
        Self::with_policy(ListenerPolicy::Isolate)
    }

    /// Create an empty registry with the given failure policy.
    pub fn with_policy(policy: ListenerPolicy) -> Self {
        Self {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    pub fn policy(&self) -> ListenerPolicy {
        self.policy
    }

    /// Register an async function as listener for `event`.
    ///
    /// Returns the registered listener.
    pub fn register<F, Fut>(&self, event: impl Into<String>, listener: F) -> Listener<P>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let listener: Listener<P> = Arc::new(move |payload| listener(payload).boxed());
        self.register_listener(event, listener)
    }

    /// Append an already boxed listener for `event`.
    pub fn register_listener(&self, event: impl Into<String>, listener: Listener<P>) -> Listener<P> {
        let event = event.into();
        tracing::debug!("Registering listener for event '{}'", event);
        self.listeners
            .write()
            .entry(event)
            .or_default()
            .push(Arc::clone(&listener));
        listener
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Names of all events with at least one listener.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke every listener registered for `event` with `payload`.
    ///
    /// The listener list is captured when the emission starts; listeners
    /// registered while it runs only see later emissions. An event without
    /// listeners is a no-op.
    pub async fn emit(&self, event: &str, payload: P) -> Result<EmitReport> {
        let listeners: Vec<Listener<P>> = match self.listeners.read().get(event) {
            Some(listeners) => listeners.clone(),
            None => return Ok(EmitReport::default()),
        };

        tracing::debug!("Emitting '{}' to {} listener(s)", event, listeners.len());

        let mut report = EmitReport::default();
        for listener in listeners {
            let payload = payload.clone();
            let call = AssertUnwindSafe(async move { listener(payload).await });
            let failure = match call.catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            match failure {
                None => report.delivered += 1,
                Some(message) => {
                    report.failed += 1;
                    match self.policy {
                        ListenerPolicy::Isolate => {
                            tracing::warn!("Listener for event '{}' failed: {}", event, message);
                        }
                        ListenerPolicy::FailFast => {
                            return Err(Error::Listener {
                                event: event.to_string(),
                                message,
                            });
                        }
                    }
                }
            }
        }

        Ok(report)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("listener panicked: {s}")
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_emit_in_registration_order() {
        let registry = EventRegistry::<u32>::new();
        let log = recorder();

        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            registry.register("value", move |value: u32| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("{tag}:{value}"));
                    anyhow::Ok(())
                }
            });
        }

        let report = registry.emit("value", 7).await.unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(*log.lock(), vec!["first:7", "second:7", "third:7"]);
    }

    #[tokio::test]
    async fn test_listener_completes_before_next_starts() {
        let registry = EventRegistry::<()>::new();
        let log = recorder();

        {
            let log = Arc::clone(&log);
            registry.register("tick", move |_| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push("slow start".to_string());
                    tokio::task::yield_now().await;
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    log.lock().push("slow end".to_string());
                    anyhow::Ok(())
                }
            });
        }
        {
            let log = Arc::clone(&log);
            registry.register("tick", move |_| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push("fast".to_string());
                    anyhow::Ok(())
                }
            });
        }

        registry.emit("tick", ()).await.unwrap();
        assert_eq!(*log.lock(), vec!["slow start", "slow end", "fast"]);
    }

    #[tokio::test]
    async fn test_emit_without_listeners_is_noop() {
        let registry = EventRegistry::<String>::new();
        let report = registry.emit("nothing", "payload".to_string()).await.unwrap();
        assert_eq!(report, EmitReport::default());
        assert_eq!(report.invoked(), 0);
    }

    #[tokio::test]
    async fn test_late_listener_only_sees_later_events() {
        let registry = EventRegistry::<u32>::new();
        let early = recorder();
        let late = recorder();

        {
            let early = Arc::clone(&early);
            registry.register("value", move |v: u32| {
                let early = Arc::clone(&early);
                async move {
                    early.lock().push(v.to_string());
                    anyhow::Ok(())
                }
            });
        }
        registry.emit("value", 1).await.unwrap();

        {
            let late = Arc::clone(&late);
            registry.register("value", move |v: u32| {
                let late = Arc::clone(&late);
                async move {
                    late.lock().push(v.to_string());
                    anyhow::Ok(())
                }
            });
        }
        registry.emit("value", 2).await.unwrap();

        assert_eq!(*early.lock(), vec!["1", "2"]);
        assert_eq!(*late.lock(), vec!["2"]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let registry = EventRegistry::<u32>::new();
        let log = recorder();

        registry.register("value", |_| async { Err::<(), _>(anyhow::anyhow!("broken listener")) });
        registry.register("value", |v: u32| async move {
            if v > 0 {
                panic!("listener exploded");
            }
            anyhow::Ok(())
        });
        {
            let log = Arc::clone(&log);
            registry.register("value", move |v: u32| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(v.to_string());
                    anyhow::Ok(())
                }
            });
        }

        let report = registry.emit("value", 3).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock(), vec!["3"]);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_dispatch() {
        let registry = EventRegistry::<u32>::with_policy(ListenerPolicy::FailFast);
        let log = recorder();

        registry.register("value", |_| async { Err::<(), _>(anyhow::anyhow!("broken listener")) });
        {
            let log = Arc::clone(&log);
            registry.register("value", move |v: u32| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(v.to_string());
                    anyhow::Ok(())
                }
            });
        }

        let err = registry.emit("value", 3).await.unwrap_err();
        assert_eq!(
            err,
            Error::Listener {
                event: "value".to_string(),
                message: "broken listener".to_string(),
            }
        );
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_register_returns_listener() {
        let registry = EventRegistry::<u32>::new();
        let listener = registry.register("value", |_| async { anyhow::Ok(()) });

        // The returned listener is the registered callable and can be invoked directly
        listener(1).await.unwrap();

        let again = registry.register_listener("other", Arc::clone(&listener));
        assert!(Arc::ptr_eq(&listener, &again));
        assert_eq!(registry.listener_count("value"), 1);
        assert_eq!(registry.listener_count("other"), 1);
        assert_eq!(registry.event_names(), vec!["other", "value"]);
    }

    #[tokio::test]
    async fn test_clones_share_listeners() {
        let registry = EventRegistry::<u32>::new();
        let handle = registry.clone();
        let log = recorder();

        {
            let log = Arc::clone(&log);
            registry.register("value", move |v: u32| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(v.to_string());
                    anyhow::Ok(())
                }
            });
        }

        handle.emit("value", 5).await.unwrap();
        assert_eq!(*log.lock(), vec!["5"]);
    }
}
