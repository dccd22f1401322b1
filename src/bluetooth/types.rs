//! Shared data structures for the Bluetooth module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bluetooth::constants::HubProfile;

/// Identity and addressing data for one discovered hub. Immutable after
/// creation; never owns a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubDescriptor {
    /// Stable address of the hub (MAC address on most platforms)
    pub address: String,
    /// Advertised display name
    pub name: String,
    /// Feature-group service the hub belongs to
    pub feature_group: Uuid,
    /// Writable control characteristic inside the feature group
    pub control_endpoint: Uuid,
}

impl HubDescriptor {
    pub fn new(address: String, name: String, profile: HubProfile) -> Self {
        Self {
            address,
            name,
            feature_group: profile.feature_group,
            control_endpoint: profile.control_endpoint,
        }
    }
}

/// One advertisement as seen by the radio, before any filtering.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Service UUIDs carried in the advertisement
    pub services: Vec<Uuid>,
}

/// Pairing negotiation state of the peer, independent of the logical
/// connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    NotBonded,
    Bonding,
    Bonded,
}

/// Lifecycle state of one hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    /// No connection attempt in flight
    Idle,
    /// Connect intent accepted, waiting for the link to come up
    Connecting,
    /// Link is up but pairing is still negotiating; discovery is deferred
    /// until the bond settles
    AwaitingBondResolution,
    /// Link is up, feature table not yet discovered
    Connected,
    DiscoveringFeatures,
    /// Feature table discovered; the hub accepts control writes
    Ready,
    Disconnecting,
    Closed,
    /// Absorbing failure state; reachable from any non-closed state
    Errored,
}

impl ConnectionState {
    /// Terminal states no longer own a channel and may be replaced in the
    /// registry.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }

    /// Only a `Ready` hub accepts control writes.
    pub fn is_available(self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

/// Asynchronous events reported by the hardware stack for one link.
/// Events for one address arrive in stack order; events for different
/// addresses interleave arbitrarily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link came up; carries the bond state observed at that moment
    Connected { bond: BondState },
    BondStateChanged { bond: BondState },
    /// The peer or the stack dropped the link
    Disconnected,
    /// Non-success status from the stack
    Failed { status: u8 },
}

/// Commands the owning side sends into a running link driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    Disconnect,
}

/// Live feature table of a connected hub: feature-group services and the
/// endpoints each exposes, as discovered over the air.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    groups: HashMap<Uuid, Vec<Uuid>>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(&mut self, group: Uuid, endpoints: Vec<Uuid>) {
        self.groups.insert(group, endpoints);
    }

    /// True when `endpoint` was discovered inside `group`.
    pub fn contains(&self, group: Uuid, endpoint: Uuid) -> bool {
        self.groups
            .get(&group)
            .map(|endpoints| endpoints.contains(&endpoint))
            .unwrap_or(false)
    }

    pub fn endpoints(&self, group: Uuid) -> Option<&[Uuid]> {
        self.groups.get(&group).map(|e| e.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
