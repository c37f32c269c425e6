use crate::common::DATASTORE_EVENT;
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::sync::Arc;

/// Lifecycle events published by a datastore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatastoreEvent {
    /// Emitted after each successful compaction of the datafile.
    CompactionDone,
}

/// Callback invoked when a datastore event fires.
pub type DatastoreEventCallback = dyn Fn(DatastoreEvent) + Send + Sync;

/// An event listener wrapping a callback, ready to be subscribed on a
/// datastore.
#[derive(Clone)]
pub struct DatastoreEventListener {
    on_event: Arc<DatastoreEventCallback>,
}

impl DatastoreEventListener {
    pub fn new(on_event: impl Fn(DatastoreEvent) + Send + Sync + 'static) -> Self {
        DatastoreEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<DatastoreEvent> for DatastoreEventListener {
    fn handle(&self, event: &Event<DatastoreEvent>) -> Result<(), BasuError> {
        (self.on_event)(event.data.clone());
        Ok(())
    }
}

impl std::fmt::Debug for DatastoreEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreEventListener").finish()
    }
}

/// Handle returned by a subscription, used to unsubscribe later.
pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub(crate) fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

/// Publishes and subscribes to datastore events.
///
/// Thin wrapper over a `basu` event bus with a fast path that skips event
/// construction when nobody is listening.
pub struct DatastoreEventBus {
    event_bus: EventBus<DatastoreEvent>,
}

impl DatastoreEventBus {
    pub fn new() -> Self {
        DatastoreEventBus {
            event_bus: EventBus::new(),
        }
    }

    /// Registers an event listener with the bus.
    pub fn register(&self, listener: DatastoreEventListener) -> LigniteResult<SubscriberRef> {
        match self.event_bus.subscribe(DATASTORE_EVENT, Box::new(listener)) {
            Ok(subscriber) => Ok(SubscriberRef::new(subscriber)),
            Err(e) => Err(Self::event_error(e)),
        }
    }

    /// Deregisters a previously registered event listener.
    pub fn deregister(&self, subscriber: SubscriberRef) -> LigniteResult<()> {
        match self.event_bus.unsubscribe(DATASTORE_EVENT, &subscriber.inner) {
            Ok(_) => Ok(()),
            Err(e) => Err(Self::event_error(e)),
        }
    }

    /// Publishes an event to all registered listeners.
    pub fn publish(&self, event: DatastoreEvent) -> LigniteResult<()> {
        // Fast path: check if there are listeners before creating the event
        let handler_count = match self.event_bus.get_handler_count(DATASTORE_EVENT) {
            Ok(count) => count,
            Err(e) => {
                if matches!(e, BasuError::EventTypeNotFOUND) {
                    return Ok(());
                }
                return Err(Self::event_error(e));
            }
        };
        if handler_count == 0 {
            return Ok(());
        }

        let basu_event = Event::new(event);
        match self.event_bus.publish(DATASTORE_EVENT, &basu_event) {
            Ok(_) => Ok(()),
            Err(e) => Err(Self::event_error(e)),
        }
    }

    /// Closes the event bus and clears all registered listeners.
    pub fn close(&self) -> LigniteResult<()> {
        match self.event_bus.clear() {
            Ok(_) => Ok(()),
            Err(e) => Err(Self::event_error(e)),
        }
    }

    /// Returns true if there are any registered listeners.
    pub fn has_listeners(&self) -> bool {
        match self.event_bus.get_handler_count(DATASTORE_EVENT) {
            Ok(count) => count > 0,
            Err(_) => false,
        }
    }

    fn event_error(e: BasuError) -> LigniteError {
        LigniteError::new(&format!("Event bus error: {}", e), ErrorKind::EventError)
    }
}

impl Default for DatastoreEventBus {
    fn default() -> Self {
        Self::new()
    }
}
