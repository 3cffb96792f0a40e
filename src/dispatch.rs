//! Event dispatch registry
//!
//! Maps event types to ordered handler lists, plus a reserved wildcard
//! bucket whose handlers see every event. Dispatch runs wildcard handlers
//! first, then the handlers for the event's exact type, each in
//! registration order.
//!
//! ```
//! use asterisk_ami_tokio::{AmiEventType, EventKey, HandlerRegistry, Packet};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(EventKey::Any, |event: Packet| async move {
//!     println!("{:?}", event.event());
//!     Ok(())
//! });
//! registry.register(AmiEventType::Hangup, |event: Packet| async move {
//!     println!("hangup on {:?}", event.channel());
//!     Ok(())
//! });
//! assert_eq!(registry.handler_count(), 2);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures_util::FutureExt;
use tracing::{trace, warn};

use crate::{
    constants::WILDCARD,
    error::{AmiError, BoxError},
    headers::AmiEventType,
    packet::Packet,
};

/// Result type for handler functions.
pub type HandlerResult = Result<(), BoxError>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that reacts to an event.
///
/// Implemented for any `Fn(Packet) -> impl Future<Output = HandlerResult>`,
/// so plain async closures can be registered directly.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    fn handle(&self, event: &Packet) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Packet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, event: &Packet) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(event.clone()))
    }
}

/// Registration key: every event, or one event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// Reserved wildcard bucket.
    Any,
    /// Exact `Event` field value.
    Named(String),
}

impl From<&str> for EventKey {
    /// `"*"` selects the wildcard bucket.
    fn from(s: &str) -> Self {
        if s == WILDCARD {
            EventKey::Any
        } else {
            EventKey::Named(s.to_string())
        }
    }
}

impl From<String> for EventKey {
    fn from(s: String) -> Self {
        EventKey::from(s.as_str())
    }
}

impl From<AmiEventType> for EventKey {
    fn from(t: AmiEventType) -> Self {
        EventKey::Named(t.as_str().to_string())
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKey::Any => f.write_str(WILDCARD),
            EventKey::Named(name) => f.write_str(name),
        }
    }
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers run.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Ordered multimap from event type to handlers.
///
/// Populate it fully before handing it to the listener; the listener owns
/// it from then on and only reads it.
#[derive(Default)]
pub struct HandlerRegistry {
    wildcard: Vec<Box<dyn EventHandler>>,
    by_type: HashMap<String, Vec<Box<dyn EventHandler>>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self
            .by_type
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("wildcard", &self.wildcard.len())
            .field("by_type", &types)
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an async closure to the list for `key`.
    pub fn register<F, Fut>(&mut self, key: impl Into<EventKey>, handler: F) -> &mut Self
    where
        F: Fn(Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_boxed(key.into(), Box::new(handler))
    }

    /// Append a handler implemented as a type (e.g. [`RelayHandler`](crate::RelayHandler)).
    pub fn register_handler<H: EventHandler>(
        &mut self,
        key: impl Into<EventKey>,
        handler: H,
    ) -> &mut Self {
        self.register_boxed(key.into(), Box::new(handler))
    }

    /// Append an already boxed handler.
    pub fn register_boxed(&mut self, key: EventKey, handler: Box<dyn EventHandler>) -> &mut Self {
        trace!("Registering handler for {}", key);
        match key {
            EventKey::Any => self
                .wildcard
                .push(handler),
            EventKey::Named(name) => self
                .by_type
                .entry(name)
                .or_default()
                .push(handler),
        }
        self
    }

    /// Total number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.wildcard
            .len()
            + self
                .by_type
                .values()
                .map(Vec::len)
                .sum::<usize>()
    }

    /// Number of handlers `event_type` would reach, wildcards included.
    pub fn handlers_for(&self, event_type: &str) -> usize {
        self.wildcard
            .len()
            + self
                .by_type
                .get(event_type)
                .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.handler_count() == 0
    }

    /// Run every matching handler for `event`, in order.
    ///
    /// Handler errors and panics are logged and counted; they never stop the
    /// remaining handlers from running.
    pub async fn dispatch(&self, event: &Packet) -> DispatchReport {
        let name = event
            .event()
            .unwrap_or_default();
        let typed = self
            .by_type
            .get(name)
            .into_iter()
            .flatten();

        let mut report = DispatchReport::default();
        for handler in self
            .wildcard
            .iter()
            .chain(typed)
        {
            report.invoked += 1;
            if let Err(e) = run_handler(handler.as_ref(), event).await {
                report.failed += 1;
                warn!("{}", e);
            }
        }
        trace!(
            "Dispatched {} to {} handlers ({} failed)",
            name,
            report.invoked,
            report.failed
        );
        report
    }
}

/// Run one handler, turning an error or a panic into [`AmiError::Handler`].
async fn run_handler(handler: &dyn EventHandler, event: &Packet) -> Result<(), AmiError> {
    let name = || {
        event
            .event()
            .unwrap_or("<none>")
            .to_string()
    };

    // Panics can surface while building the future or while polling it
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(future) => future,
        Err(panic) => {
            return Err(AmiError::Handler {
                event: name(),
                message: panic_message(&*panic),
            })
        }
    };

    match AssertUnwindSafe(future)
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AmiError::Handler {
            event: name(),
            message: e.to_string(),
        }),
        Err(panic) => Err(AmiError::Handler {
            event: name(),
            message: panic_message(&*panic),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
