pub mod config;
pub mod contracts;
pub mod pg_store;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    ActorRequest, ContributionReportQuery, ErrorBody, ReorderRequest, RotationEventMessage,
};
pub use pg_store::{PgEventStore, PgRotationStore, ensure_schema};
pub use redis_bus::{EVENTS_CHANNEL, PublishingEventStore, RedisBus};
