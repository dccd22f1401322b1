//! Error taxonomy for the hub link core.
//!
//! Hardware-originated failures are absorbed by the connection state machine
//! and re-surface as state notifications; the variants here are what callers
//! of `connect`/`disconnect`/`send` can receive synchronously.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The radio precondition gate (power, permissions, location service)
    /// denied the operation. Never retried by this crate.
    #[error("radio preconditions not satisfied")]
    PreconditionUnmet,

    /// A non-terminal connection for this address already exists.
    #[error("a connection for {address} already exists")]
    DuplicateConnection { address: String },

    /// Non-success status reported by the hardware stack.
    #[error("hardware stack reported status {status:#04x}")]
    Hardware { status: u8 },

    /// The link is up but the feature table could not be discovered.
    #[error("feature table of {address} is incomplete")]
    FeatureDiscoveryIncomplete { address: String },

    /// The write target is missing from the live feature table.
    #[error("endpoint {endpoint} not found in feature group {group}")]
    EndpointNotFound { group: Uuid, endpoint: Uuid },

    /// No `Ready` connection exists for the address.
    #[error("no ready connection for {address}")]
    NotReady { address: String },

    /// The radio has never seen this address.
    #[error("peripheral {address} is unknown to the radio")]
    UnknownPeripheral { address: String },

    /// Failure inside the platform Bluetooth backend.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
