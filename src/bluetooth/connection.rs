//! Connection lifecycle: from intent-to-connect through feature discovery
//! to teardown.
//!
//! Each accepted connect intent spawns one [`LinkDriver`] task that owns the
//! connection's state machine. The driver consumes hardware [`LinkEvent`]s
//! and owner [`LinkCommand`]s, publishes its transitions into the registry,
//! and releases the channel exactly once, on entry into a terminal state.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::bluetooth::constants::{
    LEGACY_DISCOVERY_DELAY_MS, LEGACY_PLATFORM_API, STATUS_STACK_RESOURCES_EXHAUSTED,
};
use crate::bluetooth::error::LinkError;
use crate::bluetooth::gate::RadioGate;
use crate::bluetooth::radio::{HubChannel, Radio};
use crate::bluetooth::registry::ConnectionRegistry;
use crate::bluetooth::types::{BondState, ConnectionState, HubDescriptor, LinkCommand, LinkEvent};
use crate::events::{EventBus, HubEvent};

/// Settle delay between the connect event and feature discovery.
///
/// Hardware stacks at or below [`LEGACY_PLATFORM_API`] race service
/// discovery against the bonding handshake when the peer is already bonded
/// and need a fixed pause; newer stacks discover immediately. A peer still
/// bonding never reaches this function — the state machine holds in
/// `AwaitingBondResolution` until the bond settles.
pub(crate) fn post_connect_delay(platform_api: u32, bond: BondState) -> Duration {
    match bond {
        BondState::Bonded if platform_api <= LEGACY_PLATFORM_API => {
            Duration::from_millis(LEGACY_DISCOVERY_DELAY_MS)
        }
        _ => Duration::ZERO,
    }
}

/// Accepts connect and disconnect intents and spawns the per-connection
/// drivers.
#[derive(Clone)]
pub struct ConnectionManager {
    radio: Arc<dyn Radio>,
    gate: Arc<dyn RadioGate>,
    registry: ConnectionRegistry,
    events: EventBus,
    platform_api: u32,
}

impl ConnectionManager {
    pub fn new(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn RadioGate>,
        registry: ConnectionRegistry,
        events: EventBus,
        platform_api: u32,
    ) -> Self {
        Self {
            radio,
            gate,
            registry,
            events,
            platform_api,
        }
    }

    /// Submits a connect intent for `descriptor` and returns once the
    /// intent is accepted. Fails fast with [`LinkError::PreconditionUnmet`]
    /// when the radio gate denies, and with
    /// [`LinkError::DuplicateConnection`] when a non-terminal connection
    /// already exists for the address. The handshake itself runs on a
    /// background task; its outcome arrives as connection notifications.
    pub fn connect(&self, descriptor: HubDescriptor) -> Result<(), LinkError> {
        if !self.gate.radio_ready() {
            return Err(LinkError::PreconditionUnmet);
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.registry.claim(&descriptor, control_tx)?;
        info!("Connect intent accepted for {}", descriptor.address);

        let manager = self.clone();
        tokio::spawn(async move {
            let address = descriptor.address.clone();
            match manager.radio.open(&address).await {
                Ok((channel, link_events)) => {
                    manager.registry.attach_channel(&address, channel.clone());
                    let driver = LinkDriver {
                        descriptor,
                        platform_api: manager.platform_api,
                        state: ConnectionState::Connecting,
                        registry: manager.registry.clone(),
                        events: manager.events.clone(),
                        channel,
                        link_events,
                        commands: control_rx,
                    };
                    driver.run().await;
                }
                Err(e) => {
                    error!("Radio rejected connect intent for {address}: {e}");
                    manager.registry.remove(&address);
                    manager.events.publish(HubEvent::ConnectionChanged {
                        address,
                        state: ConnectionState::Errored,
                        available: false,
                    });
                }
            }
        });
        Ok(())
    }

    /// Submits a disconnect intent. A no-op when the hub is not connected;
    /// the teardown outcome arrives as a connection notification.
    pub fn disconnect(&self, address: &str) -> Result<(), LinkError> {
        if !self.gate.radio_ready() {
            return Err(LinkError::PreconditionUnmet);
        }
        match self.registry.get(address) {
            Some(handle) => {
                if handle.control.send(LinkCommand::Disconnect).is_err() {
                    debug!("Disconnect intent for {address}: driver already gone");
                }
                Ok(())
            }
            None => {
                debug!("Disconnect intent for {address}: nothing connected");
                Ok(())
            }
        }
    }
}

/// Owns one connection's state machine from `Connecting` to a terminal
/// state.
struct LinkDriver {
    descriptor: HubDescriptor,
    platform_api: u32,
    state: ConnectionState,
    registry: ConnectionRegistry,
    events: EventBus,
    channel: Arc<dyn HubChannel>,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
}

impl LinkDriver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(LinkCommand::Disconnect) => {
                        if matches!(
                            self.state,
                            ConnectionState::Connecting | ConnectionState::AwaitingBondResolution
                        ) {
                            // In-flight connects cannot be aborted; the
                            // intent can only be honored once connected.
                            warn!(
                                "{}: disconnect ignored while the connect attempt is in flight",
                                self.descriptor.address
                            );
                            continue;
                        }
                        self.set_state(ConnectionState::Disconnecting);
                        self.notify(false);
                        self.close(ConnectionState::Closed).await;
                        return;
                    }
                    None => {
                        // Owner handle vanished; tear the link down.
                        self.close(ConnectionState::Closed).await;
                        return;
                    }
                },
                event = self.link_events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await {
                            return;
                        }
                    }
                    None => {
                        info!("{}: link event stream ended", self.descriptor.address);
                        self.close(ConnectionState::Closed).await;
                        return;
                    }
                }
            }
        }
    }

    /// Reacts to one hardware event. Returns true when the driver reached a
    /// terminal state.
    async fn handle_event(&mut self, event: LinkEvent) -> bool {
        match event {
            LinkEvent::Connected { bond } => {
                if self.state != ConnectionState::Connecting {
                    debug!(
                        "{}: ignoring connect event in state {:?}",
                        self.descriptor.address, self.state
                    );
                    return false;
                }
                if bond == BondState::Bonding {
                    // Discovery while bonding is in flight is unsafe;
                    // re-evaluate on the next bond-state event.
                    debug!(
                        "{}: bond negotiation in flight, holding",
                        self.descriptor.address
                    );
                    self.set_state(ConnectionState::AwaitingBondResolution);
                    return false;
                }
                self.begin_feature_discovery(bond).await;
                false
            }
            LinkEvent::BondStateChanged { bond } => {
                if self.state != ConnectionState::AwaitingBondResolution {
                    debug!(
                        "{}: ignoring bond event in state {:?}",
                        self.descriptor.address, self.state
                    );
                    return false;
                }
                if bond == BondState::Bonding {
                    return false;
                }
                self.begin_feature_discovery(bond).await;
                false
            }
            LinkEvent::Disconnected => {
                info!("{}: link dropped by the stack", self.descriptor.address);
                self.close(ConnectionState::Closed).await;
                true
            }
            LinkEvent::Failed { status } => {
                if status == STATUS_STACK_RESOURCES_EXHAUSTED {
                    error!(
                        "{}: stack dropped the link after exhausting resources (status {status:#04x})",
                        self.descriptor.address
                    );
                } else {
                    error!(
                        "{}: hardware failure, status {status:#04x}",
                        self.descriptor.address
                    );
                }
                self.registry.record_failure(&self.descriptor.address, status);
                self.close(ConnectionState::Errored).await;
                true
            }
        }
    }

    /// `Connected → DiscoveringFeatures → Ready`, with the legacy-stack
    /// settle delay in between. Discovery failure leaves the connection
    /// open in `Connected`.
    async fn begin_feature_discovery(&mut self, bond: BondState) {
        self.set_state(ConnectionState::Connected);
        self.notify(false);

        let delay = post_connect_delay(self.platform_api, bond);
        if !delay.is_zero() {
            debug!(
                "{}: legacy stack, delaying feature discovery by {:?}",
                self.descriptor.address, delay
            );
            tokio::time::sleep(delay).await;
        }

        self.set_state(ConnectionState::DiscoveringFeatures);
        match self.channel.discover_features().await {
            Ok(features) => {
                self.registry.set_features(&self.descriptor.address, features);
                self.set_state(ConnectionState::Ready);
                self.notify(true);
                info!("{} is ready for control", self.descriptor.address);
            }
            Err(e) => {
                warn!(
                    "{}: feature discovery failed, connection stays open: {e}",
                    self.descriptor.address
                );
                self.set_state(ConnectionState::Connected);
                self.events.publish(HubEvent::FeatureDiscoveryIncomplete {
                    address: self.descriptor.address.clone(),
                });
            }
        }
    }

    /// The single release path. Every entry into `Closed` or `Errored`
    /// runs through here: release the channel, drop the registry entry and
    /// publish the unavailable notification as one step.
    async fn close(&mut self, terminal: ConnectionState) {
        self.channel.close().await;
        self.registry.remove(&self.descriptor.address);
        self.state = terminal;
        self.events.publish(HubEvent::ConnectionChanged {
            address: self.descriptor.address.clone(),
            state: terminal,
            available: false,
        });
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.registry.transition(&self.descriptor.address, state);
        self.state = state;
    }

    fn notify(&self, available: bool) {
        self.events.publish(HubEvent::ConnectionChanged {
            address: self.descriptor.address.clone(),
            state: self.state,
            available,
        });
    }
}
