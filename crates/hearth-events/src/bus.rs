use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

/// Anything with a stable type identity can travel on the bus.
pub trait Event: Any {}

impl<T: Any> Event for T {}

type Handler = Rc<dyn Fn(&dyn Any) -> anyhow::Result<()>>;

/// The event bus: maps event types to subscriber lists.
///
/// Dispatch is synchronous on the calling thread. The subscriber list is
/// snapshotted before dispatch, so handlers may subscribe re-entrantly; new
/// subscribers only see later emissions. The first handler error aborts the
/// remainder of the dispatch and is returned to the emitter.
#[derive(Default)]
pub struct EventBus {
    channels: RefCell<HashMap<TypeId, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for events of type `E`.
    pub fn subscribe<E: Event>(&self, handler: impl Fn(&E) -> anyhow::Result<()> + 'static) {
        let wrapped: Handler = Rc::new(move |any| {
            let event = any
                .downcast_ref::<E>()
                .expect("event channel dispatched a mismatched type");
            handler(event)
        });
        self.channels
            .borrow_mut()
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
        trace!(event = std::any::type_name::<E>(), "subscriber registered");
    }

    /// Deliver `event` to every subscriber of `E`, in subscription order.
    pub fn emit<E: Event>(&self, event: &E) -> anyhow::Result<()> {
        let handlers: Vec<Handler> = match self.channels.borrow().get(&TypeId::of::<E>()) {
            Some(list) => list.clone(),
            None => return Ok(()),
        };
        for handler in handlers {
            handler(event)?;
        }
        Ok(())
    }

    /// Number of event types with at least one subscriber.
    pub fn event_count(&self) -> usize {
        self.channels.borrow().len()
    }

    /// Total subscriber count across all event types.
    pub fn subscriber_count(&self) -> usize {
        self.channels.borrow().values().map(|v| v.len()).sum()
    }
}
