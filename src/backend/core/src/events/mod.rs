//! Event sourcing for templates.
//!
//! - **`event`**: stored/new event records, the `Event` trait and the template events.
//! - **`patch`**: text patches between serialized content snapshots.
//! - **`aggregate`**: the `Aggregate` trait and `TemplateAggregate`.
//! - **`store`** / **`postgres`**: the `EventStore` trait with in-memory and PostgreSQL logs.
//! - **`checkpoint`**: projection resume points.
//! - **`projection`**: the polling `ProjectionRunner` and its `ReadModel`.

pub mod aggregate;
pub mod checkpoint;
pub mod event;
pub mod patch;
pub mod postgres;
pub mod projection;
pub mod store;

pub use aggregate::*;
pub use checkpoint::*;
pub use event::*;
pub use postgres::PgEventStore;
pub use projection::*;
pub use store::*;
