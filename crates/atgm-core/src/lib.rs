//! # atgm core
//!
//! Foundation types of the atgm logger plugin host:
//!
//! - **Records**: immutable units read from the serial meter ([`Record`]),
//!   with marine field extraction ([`Record::fields`]).
//! - **Capabilities**: what the host offers to plugins ([`Capability`],
//!   [`CapabilitySet`]).
//! - **Data bus**: single-producer fan-out with per-subscriber bounded queues
//!   ([`DataBus`], [`Publisher`], [`Subscription`]).
//!
//! ```text
//! ┌─────────────────┐     ┌─────────┐     ┌─────────────┐
//! │ acquisition loop│────▶│ DataBus │────▶│ plugin task │
//! │   (Publisher)   │     │         │────▶│ plugin task │
//! └─────────────────┘     └─────────┘────▶│ plugin task │
//!                                         └─────────────┘
//! ```

pub mod bus;
pub mod capability;
pub mod error;
pub mod record;

pub use bus::{
    BusConfig, DEFAULT_QUEUE_CAPACITY, DataBus, OverflowPolicy, Publisher, QueueOptions,
    SubscriberStats, Subscription, SubscriptionId,
};
pub use capability::{Capability, CapabilitySet};
pub use error::{BoxError, BusError, BusResult, RecordError};
pub use record::{
    FieldSelection, FieldValue, Fields, MARINE_FIELDS, Record, gps_to_unix, parse_meter_time,
};
