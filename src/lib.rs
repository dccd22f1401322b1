//! hublink — discovers, connects to and drives remote-control BLE hubs.
//!
//! The crate owns the scan-to-connect pipeline, the per-connection
//! lifecycle state machine, the shared connection registry and the
//! fire-and-forget control-write path. Presentation, persistence and the
//! platform permission flow stay outside and plug in through
//! [`events::EventBus`], [`bluetooth::ReconnectPolicy`] and
//! [`bluetooth::RadioGate`].
//!
//! The real radio lives behind the `hardware` cargo feature
//! ([`bluetooth::BluestRadio`]); everything else runs against the
//! [`bluetooth::Radio`] seam and is testable on any host.

// Module declarations
pub mod bluetooth;
pub mod config;
pub mod events;
pub mod logging;
pub mod utils;

pub use bluetooth::{
    ConnectionState, HubDescriptor, HubManager, LinkError, NoAutoReconnect, PlatformGate,
    RadioPreconditions, ScanFilterSet, StoredReconnectPolicy,
};
pub use config::LinkConfig;
pub use events::{EventBus, HubEvent};
