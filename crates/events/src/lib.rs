//! Job notifications and the pub/sub mechanics that carry them.

pub mod bus;
pub mod in_memory_bus;
pub mod notification;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notification::{JobNotification, JobNotifier, NotificationTopic, NullNotifier};
