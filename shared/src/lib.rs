pub mod bridge;
pub mod bus;
pub mod events;
pub mod logger;
pub mod memory;
pub mod nats;
pub mod processor;
pub mod topics;


pub use bridge::{BridgeError, BridgeStatsSnapshot, CorrelationBridge};
pub use bus::{BusError, Delivery, EventBus, Subscription};
pub use memory::MemoryBus;
pub use nats::NatsBus;
pub use processor::{CommandHandler, CommandProcessor, Handled};
pub use topics::{DomainTopics, DEFAULT_PREFIX};
