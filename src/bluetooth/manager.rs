//! The main interface for hub operations: wires the scanner, the connection
//! manager and the write dispatcher around one shared registry and one
//! notification channel.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bluetooth::connection::ConnectionManager;
use crate::bluetooth::dispatcher::WriteDispatcher;
use crate::bluetooth::error::LinkError;
use crate::bluetooth::gate::RadioGate;
use crate::bluetooth::policy::ReconnectPolicy;
use crate::bluetooth::radio::Radio;
use crate::bluetooth::registry::ConnectionRegistry;
use crate::bluetooth::scanner::{HubScanner, ScanFilterSet};
use crate::bluetooth::types::{ConnectionState, HubDescriptor};
use crate::config::LinkConfig;
use crate::events::{EventBus, HubEvent};

/// Facade over the discovery/connection/write subsystem.
///
/// Must be created inside a Tokio runtime: construction spawns the task
/// that turns the scanner's auto-reconnect intents into connect calls, and
/// the other operations spawn their own background tasks.
pub struct HubManager {
    scanner: HubScanner,
    connections: ConnectionManager,
    dispatcher: WriteDispatcher,
    registry: ConnectionRegistry,
    filter_groups: Vec<Uuid>,
}

impl HubManager {
    /// Builds the subsystem and returns it together with the notification
    /// receiver. Whatever task drains the receiver is the presentation
    /// ("UI") context; see [`crate::events`].
    pub fn new(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn RadioGate>,
        policy: Arc<dyn ReconnectPolicy>,
        config: &LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        let (events, event_rx) = EventBus::channel();
        let registry = ConnectionRegistry::new();
        let connections = ConnectionManager::new(
            radio.clone(),
            gate.clone(),
            registry.clone(),
            events.clone(),
            config.platform_api,
        );

        let (intent_tx, mut intent_rx) = mpsc::unbounded_channel::<HubDescriptor>();
        let scanner = HubScanner::new(
            radio,
            gate.clone(),
            policy,
            registry.clone(),
            events,
            intent_tx,
            config.min_rssi,
        );

        // Auto-reconnect intents come from the scan context; duplicates are
        // settled by the registry claim, not here.
        let intent_connections = connections.clone();
        tokio::spawn(async move {
            while let Some(descriptor) = intent_rx.recv().await {
                if let Err(e) = intent_connections.connect(descriptor) {
                    debug!("Auto-reconnect intent dropped: {e}");
                }
            }
        });

        let dispatcher = WriteDispatcher::new(gate, registry.clone());

        let mut filter_groups: Vec<Uuid> = ScanFilterSet::recognized().groups().to_vec();
        filter_groups.extend(config.extra_feature_groups.iter().copied());

        (
            Self {
                scanner,
                connections,
                dispatcher,
                registry,
                filter_groups,
            },
            event_rx,
        )
    }

    /// Starts discovery with the configured feature-group filters. Reports
    /// `false` when the radio preconditions are not satisfied.
    pub async fn start_scan(&mut self) -> bool {
        let filters = ScanFilterSet::for_groups(self.filter_groups.iter().copied());
        self.scanner.start(filters).await
    }

    /// Starts discovery with caller-provided filters, e.g.
    /// [`ScanFilterSet::for_address`] to re-acquire one known hub.
    pub async fn start_scan_with(&mut self, filters: ScanFilterSet) -> bool {
        self.scanner.start(filters).await
    }

    pub async fn stop_scan(&mut self) {
        self.scanner.stop().await;
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Submits a connect intent for a hub, typically built from a
    /// `HubFound` notification or from persisted state.
    pub fn connect(&self, descriptor: HubDescriptor) -> Result<(), LinkError> {
        self.connections.connect(descriptor)
    }

    /// Submits a disconnect intent for the hub at `address`.
    pub fn disconnect(&self, address: &str) -> Result<(), LinkError> {
        self.connections.disconnect(address)
    }

    /// Dispatches one control payload to the hub at `address`.
    pub fn send(&self, address: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.dispatcher.send(address, payload)
    }

    /// Current lifecycle state of `address`; `Idle` when no connection
    /// attempt exists.
    pub fn connection_state(&self, address: &str) -> ConnectionState {
        self.registry
            .get(address)
            .map(|handle| handle.state)
            .unwrap_or(ConnectionState::Idle)
    }

    /// Hubs currently available for control.
    pub fn connected_hubs(&self) -> Vec<HubDescriptor> {
        self.registry.connected()
    }

    /// Stops scanning and submits a disconnect intent for every registered
    /// connection.
    pub async fn shutdown(&mut self) {
        self.stop_scan().await;
        for address in self.registry.addresses() {
            if let Err(e) = self.connections.disconnect(&address) {
                debug!("Shutdown disconnect for {address} skipped: {e}");
            }
        }
        info!("Hub manager shut down");
    }
}
