//! In-memory implementations of the rotation store and event store contracts.

mod events;
mod store;

pub use events::InMemoryEventStore;
pub use store::InMemoryRotationStore;
