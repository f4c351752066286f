pub mod events;
pub mod queue;

pub use events::{DomainEvent, EventBus};
pub use queue::JobQueue;
