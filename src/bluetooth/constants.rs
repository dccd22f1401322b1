//! Constants used throughout the crate: recognized hub profiles,
//! scan thresholds and the hardware status codes we care about.

use uuid::Uuid;

/// A hub family the application knows how to drive: the advertised
/// feature-group service and the writable control characteristic inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubProfile {
    pub feature_group: Uuid,
    pub control_endpoint: Uuid,
}

/// LWP3-style hub service (powered-up RC hubs)
pub const UUID_LWP3_HUB_SERVICE: Uuid = Uuid::from_u128(0x00001623_1212_efde_1623_785feabcd123);

/// LWP3 control characteristic (write without response)
pub const UUID_LWP3_CONTROL_CHAR: Uuid = Uuid::from_u128(0x00001624_1212_efde_1623_785feabcd123);

/// Nordic UART service exposed by generic serial-over-BLE hubs
pub const UUID_NUS_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Nordic UART RX characteristic (host writes here)
pub const UUID_NUS_RX_CHAR: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Hub families recognized by the scanner. Scan filters are derived from the
/// feature-group column of this table.
pub const RECOGNIZED_PROFILES: [HubProfile; 2] = [
    HubProfile {
        feature_group: UUID_LWP3_HUB_SERVICE,
        control_endpoint: UUID_LWP3_CONTROL_CHAR,
    },
    HubProfile {
        feature_group: UUID_NUS_SERVICE,
        control_endpoint: UUID_NUS_RX_CHAR,
    },
];

/// Looks up the profile for an advertised feature-group service.
pub fn profile_for(feature_group: Uuid) -> Option<HubProfile> {
    RECOGNIZED_PROFILES
        .iter()
        .copied()
        .find(|p| p.feature_group == feature_group)
}

/// Weakest signal strength a discovery event is forwarded for.
pub const MIN_RSSI_THRESHOLD: i16 = -85;

/// Hardware stacks at or below this API level need a settle delay between
/// the connect event and feature discovery when the peer is bonded.
pub const LEGACY_PLATFORM_API: u32 = 24;

/// Settle delay applied on legacy stacks, in milliseconds.
pub const LEGACY_DISCOVERY_DELAY_MS: u64 = 1000;

/// Status code the stack reports when it drops a connection after running
/// out of internal resources. Handled like any other failure, logged apart.
pub const STATUS_STACK_RESOURCES_EXHAUSTED: u8 = 0x08;

/// Generic status used when the backend fails without a stack status code.
pub const STATUS_GATT_ERROR: u8 = 0x85;
