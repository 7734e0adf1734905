//! Category-based event dispatch.
//!
//! The [`TriggerRegistry`] maps each [`EventCategory`] to an ordered list of
//! [`Trigger`]s. Registration happens once during setup; afterwards the
//! registry is frozen behind an `Arc` and only read.
//!
//! ```rust,ignore
//! use onebridge_core::{EventCategory, TriggerRegistry, trigger_fn};
//!
//! let mut registry = TriggerRegistry::new();
//! registry.register(EventCategory::Message, trigger_fn(|event, _bot| async move {
//!     tracing::info!(raw = %event.raw(), "message");
//!     Ok(())
//! }));
//! registry.register(
//!     [EventCategory::Notice, EventCategory::Request],
//!     AuditTrigger::default(),
//! );
//! ```
//!
//! When an event is dispatched:
//!
//! 1. Triggers for its category run in registration order
//! 2. A trigger that returns an error or panics is logged and skipped
//! 3. The remaining triggers still run

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{Instrument, debug, debug_span, error, trace};

use crate::bot::BoxedBot;
use crate::frame::{EventCategory, EventFrame};

/// An event handler bound to one or more categories.
///
/// Triggers run inline on the receive loop, one frame at a time. A trigger
/// must not await a reply to its own outbound call, since that reply is read
/// by the very loop it is blocking; spawn the call instead.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Handles one event.
    async fn on_recv(&self, event: &EventFrame, bot: &BoxedBot) -> anyhow::Result<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared, type-erased trigger.
pub type BoxedTrigger = Arc<dyn Trigger>;

// =============================================================================
// Closure triggers
// =============================================================================

/// A [`Trigger`] backed by an async closure. Built with [`trigger_fn`].
pub struct FnTrigger<F> {
    name: String,
    f: F,
}

/// Wraps an async closure as a [`Trigger`].
///
/// The closure receives owned clones of the event and bot so the returned
/// future can be `'static`.
pub fn trigger_fn<F, Fut>(f: F) -> FnTrigger<F>
where
    F: Fn(EventFrame, BoxedBot) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnTrigger {
        name: "closure".to_string(),
        f,
    }
}

impl<F> FnTrigger<F> {
    /// Sets the name shown in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<F, Fut> Trigger for FnTrigger<F>
where
    F: Fn(EventFrame, BoxedBot) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_recv(&self, event: &EventFrame, bot: &BoxedBot) -> anyhow::Result<()> {
        (self.f)(event.clone(), Arc::clone(bot)).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Category sets
// =============================================================================

/// One or more categories a trigger subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Categories(Vec<EventCategory>);

impl Categories {
    /// Iterates the categories, skipping duplicates.
    fn unique(&self) -> impl Iterator<Item = EventCategory> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(i, c)| !self.0[..*i].contains(c))
            .map(|(_, c)| *c)
    }
}

impl From<EventCategory> for Categories {
    fn from(category: EventCategory) -> Self {
        Self(vec![category])
    }
}

impl<const N: usize> From<[EventCategory; N]> for Categories {
    fn from(categories: [EventCategory; N]) -> Self {
        Self(categories.to_vec())
    }
}

impl From<&[EventCategory]> for Categories {
    fn from(categories: &[EventCategory]) -> Self {
        Self(categories.to_vec())
    }
}

impl From<Vec<EventCategory>> for Categories {
    fn from(categories: Vec<EventCategory>) -> Self {
        Self(categories)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Maps event categories to ordered trigger lists.
#[derive(Default, Clone)]
pub struct TriggerRegistry {
    triggers: HashMap<EventCategory, Vec<BoxedTrigger>>,
}

impl TriggerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `trigger` for one or more categories.
    ///
    /// The trigger is appended to the end of each category's list.
    pub fn register<T>(&mut self, categories: impl Into<Categories>, trigger: T) -> &mut Self
    where
        T: Trigger + 'static,
    {
        self.register_arc(categories, Arc::new(trigger))
    }

    /// Registers an already shared trigger.
    pub fn register_arc(
        &mut self,
        categories: impl Into<Categories>,
        trigger: BoxedTrigger,
    ) -> &mut Self {
        let categories = categories.into();
        for category in categories.unique() {
            debug!(category = %category, trigger = trigger.name(), "Registered trigger");
            self.triggers
                .entry(category)
                .or_default()
                .push(Arc::clone(&trigger));
        }
        self
    }

    /// Returns the number of triggers registered for `category`.
    pub fn trigger_count(&self, category: EventCategory) -> usize {
        self.triggers.get(&category).map_or(0, Vec::len)
    }

    /// Total registrations across all categories.
    ///
    /// A trigger bound to two categories counts twice.
    pub fn len(&self) -> usize {
        self.triggers.values().map(Vec::len).sum()
    }

    /// Whether no trigger is registered at all.
    pub fn is_empty(&self) -> bool {
        self.triggers.values().all(Vec::is_empty)
    }

    /// Runs every trigger registered for `category`, in order.
    ///
    /// Failures are logged and never propagate. Returns the number of
    /// triggers that completed successfully.
    pub async fn dispatch(
        &self,
        category: EventCategory,
        event: &EventFrame,
        bot: &BoxedBot,
    ) -> usize {
        let Some(triggers) = self.triggers.get(&category).filter(|t| !t.is_empty()) else {
            trace!(category = %category, "No triggers registered for category");
            return 0;
        };

        let span = debug_span!("dispatch", category = %category);
        let mut succeeded = 0;
        for trigger in triggers {
            match AssertUnwindSafe(trigger.on_recv(event, bot))
                .catch_unwind()
                .instrument(span.clone())
                .await
            {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    error!(
                        category = %category,
                        trigger = trigger.name(),
                        error = %e,
                        "Trigger failed"
                    );
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        category = %category,
                        trigger = trigger.name(),
                        panic = %reason,
                        "Trigger panicked"
                    );
                }
            }
        }
        succeeded
    }
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .triggers
            .iter()
            .map(|(category, list)| (category.as_str(), list.len()))
            .collect();
        f.debug_struct("TriggerRegistry")
            .field("triggers", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Bot;
    use crate::error::{ApiError, ApiResult};
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    struct MockBot;

    #[async_trait]
    impl Bot for MockBot {
        fn id(&self) -> &str {
            "test-bot"
        }

        async fn call_api(&self, _action: &str, _params: Value) -> ApiResult<Value> {
            Err(ApiError::NotConnected)
        }

        async fn send_raw(&self, _frame: String) -> ApiResult<()> {
            Err(ApiError::NotConnected)
        }
    }

    fn mock_bot() -> BoxedBot {
        Arc::new(MockBot)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl Trigger + 'static {
        let log = Arc::clone(log);
        trigger_fn(move |event: EventFrame, _bot| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{tag}:{}", event.category()));
                Ok(())
            }
        })
    }

    fn event(post_type: &str) -> EventFrame {
        EventFrame::new(json!({ "post_type": post_type }))
    }

    #[tokio::test]
    async fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TriggerRegistry::new();
        registry
            .register(EventCategory::Message, recorder(&log, "first"))
            .register(EventCategory::Message, recorder(&log, "second"))
            .register(EventCategory::Notice, recorder(&log, "notice"));

        let ran = registry
            .dispatch(EventCategory::Message, &event("message"), &mock_bot())
            .await;

        assert_eq!(ran, 2);
        assert_eq!(*log.lock(), vec!["first:message", "second:message"]);
    }

    #[tokio::test]
    async fn test_unknown_reaches_only_unknown_triggers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TriggerRegistry::new();
        registry
            .register(EventCategory::Message, recorder(&log, "message"))
            .register(EventCategory::Unknown, recorder(&log, "fallback"));

        let frame = event("message_sent");
        registry
            .dispatch(frame.category(), &frame, &mock_bot())
            .await;

        assert_eq!(*log.lock(), vec!["fallback:unknown"]);
    }

    #[tokio::test]
    async fn test_multi_category_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TriggerRegistry::new();
        registry.register(
            [EventCategory::Notice, EventCategory::Request, EventCategory::Notice],
            recorder(&log, "audit"),
        );

        assert_eq!(registry.trigger_count(EventCategory::Notice), 1);
        assert_eq!(registry.trigger_count(EventCategory::Request), 1);
        assert_eq!(registry.trigger_count(EventCategory::Message), 0);
        assert_eq!(registry.len(), 2);

        let bot = mock_bot();
        registry
            .dispatch(EventCategory::Notice, &event("notice"), &bot)
            .await;
        registry
            .dispatch(EventCategory::Request, &event("request"), &bot)
            .await;

        assert_eq!(*log.lock(), vec!["audit:notice", "audit:request"]);
    }

    #[tokio::test]
    async fn test_failing_trigger_does_not_stop_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TriggerRegistry::new();
        registry
            .register(
                EventCategory::Request,
                trigger_fn(|_event, _bot| async { Err(anyhow::anyhow!("boom")) }).named("failing"),
            )
            .register(
                EventCategory::Request,
                trigger_fn(|_event, _bot| async {
                    if true {
                        panic!("handler panicked");
                    }
                    Ok(())
                })
                .named("panicking"),
            )
            .register(EventCategory::Request, recorder(&log, "survivor"));

        let ran = registry
            .dispatch(EventCategory::Request, &event("request"), &mock_bot())
            .await;

        assert_eq!(ran, 1);
        assert_eq!(*log.lock(), vec!["survivor:request"]);
    }

    #[tokio::test]
    async fn test_dispatch_without_triggers_is_noop() {
        let registry = TriggerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        let ran = registry
            .dispatch(EventCategory::MetaEvent, &event("meta_event"), &mock_bot())
            .await;
        assert_eq!(ran, 0);
    }
}
