pub mod constants;
pub mod event_bus;
pub mod util;
pub mod value;

pub use constants::*;
pub use event_bus::{DatastoreEvent, DatastoreEventBus, DatastoreEventListener, SubscriberRef};
pub use value::{compare_values, values_equal, CompareOptions, StringComparator, Value};
