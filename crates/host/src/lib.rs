//! Host Runtime Boundary
//!
//! The fault-management core talks to the automation runtime only through the
//! traits in this crate:
//! - [`EntityStore`]: read and write named entity states
//! - [`Scheduler`]: one-shot timers and entity change subscriptions
//! - [`NotifyTransport`]: push messages, clear-by-tag, alarm and light actuation
//!
//! [`InMemoryHost`] is a complete single-threaded implementation used by the
//! application binary and the tests.

mod common;
mod entity;
mod error;
mod memory;
mod scheduler;
mod transport;

pub use common::{CommonEntities, CommonEntitiesConfig};
pub use entity::{numeric_state, Attributes, EntityState, EntityStore};
pub use error::HostError;
pub use memory::{InMemoryHost, OutboundCall};
pub use scheduler::{Job, ListenHandle, Scheduler, TimerHandle};
pub use transport::{NotifyTransport, PushData, PushMessage};

/// Everything the core needs from the automation runtime
pub trait Host: EntityStore + Scheduler + NotifyTransport {}

impl<T: EntityStore + Scheduler + NotifyTransport + ?Sized> Host for T {}
