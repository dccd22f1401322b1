//! End-to-end scenarios for the scan → connect → write pipeline, driven
//! through a mock radio.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use uuid::Uuid;

use hublink::bluetooth::{
    Advertisement, BondState, ConnectionState, FeatureTable, HubChannel, HubDescriptor, HubManager,
    LinkError, LinkEvent, NoAutoReconnect, PlatformGate, Radio, RadioPreconditions,
    ReconnectPolicy, ScanFilterSet, RECOGNIZED_PROFILES, STATUS_STACK_RESOURCES_EXHAUSTED,
    UUID_LWP3_CONTROL_CHAR, UUID_LWP3_HUB_SERVICE, UUID_NUS_RX_CHAR,
};
use hublink::{HubEvent, LinkConfig};

const HUB_ADDRESS: &str = "AA:BB:CC:DD:EE:01";

struct MockChannel {
    /// Table returned by feature discovery; `None` makes discovery fail
    features: Mutex<Option<FeatureTable>>,
    discover_calls: AtomicUsize,
    writes: Mutex<Vec<(Uuid, Uuid, Vec<u8>)>>,
    closed: AtomicUsize,
}

#[async_trait]
impl HubChannel for MockChannel {
    async fn discover_features(&self) -> Result<FeatureTable, LinkError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        self.features
            .lock()
            .unwrap()
            .clone()
            .ok_or(LinkError::FeatureDiscoveryIncomplete {
                address: HUB_ADDRESS.to_string(),
            })
    }

    async fn write_without_response(
        &self,
        group: Uuid,
        endpoint: Uuid,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        self.writes
            .lock()
            .unwrap()
            .push((group, endpoint, payload.to_vec()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockRadio {
    adverts: Mutex<Option<mpsc::UnboundedSender<Advertisement>>>,
    links: Mutex<HashMap<String, mpsc::UnboundedSender<LinkEvent>>>,
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
    /// Feature table installed into channels created by `open`
    features_for_open: Mutex<Option<FeatureTable>>,
    open_calls: AtomicUsize,
}

impl MockRadio {
    fn with_features(features: Option<FeatureTable>) -> Arc<Self> {
        Arc::new(Self {
            features_for_open: Mutex::new(features),
            ..Self::default()
        })
    }

    /// Forgets the previous scan session's probe so `wait_scanning` waits
    /// for the next one.
    fn reset_scan_probe(&self) {
        self.adverts.lock().unwrap().take();
    }

    async fn wait_scanning(&self) {
        wait_for("the scan task to subscribe", || {
            self.adverts.lock().unwrap().is_some()
        })
        .await;
    }

    fn advertise(&self, advertisement: Advertisement) {
        let sender = self
            .adverts
            .lock()
            .unwrap()
            .clone()
            .expect("no scan in progress");
        let _ = sender.send(advertisement);
    }

    async fn link(&self, address: &str) -> mpsc::UnboundedSender<LinkEvent> {
        wait_for("the radio to open the link", || {
            self.links.lock().unwrap().contains_key(address)
        })
        .await;
        self.links.lock().unwrap().get(address).cloned().unwrap()
    }

    async fn channel(&self, address: &str) -> Arc<MockChannel> {
        wait_for("the channel to be created", || {
            self.channels.lock().unwrap().contains_key(address)
        })
        .await;
        self.channels.lock().unwrap().get(address).cloned().unwrap()
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn advertisements(
        &self,
        _filters: &ScanFilterSet,
    ) -> Result<BoxStream<'static, Advertisement>, LinkError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.adverts.lock().unwrap() = Some(tx);
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|advertisement| (advertisement, rx))
        })
        .boxed())
    }

    async fn open(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn HubChannel>, mpsc::UnboundedReceiver<LinkEvent>), LinkError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let channel = Arc::new(MockChannel {
            features: Mutex::new(self.features_for_open.lock().unwrap().clone()),
            discover_calls: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        self.links.lock().unwrap().insert(address.to_string(), tx);
        self.channels
            .lock()
            .unwrap()
            .insert(address.to_string(), channel.clone());
        Ok((channel as Arc<dyn HubChannel>, rx))
    }
}

struct AlwaysReconnect;

impl ReconnectPolicy for AlwaysReconnect {
    fn should_auto_reconnect(&self, _address: &str) -> bool {
        true
    }
}

fn hub() -> HubDescriptor {
    HubDescriptor::new(
        HUB_ADDRESS.to_string(),
        "Technic Hub".to_string(),
        RECOGNIZED_PROFILES[0],
    )
}

fn advert(address: &str) -> Advertisement {
    Advertisement {
        address: address.to_string(),
        name: Some("Technic Hub".to_string()),
        rssi: Some(-60),
        services: vec![UUID_LWP3_HUB_SERVICE],
    }
}

fn ready_table() -> FeatureTable {
    let mut table = FeatureTable::new();
    table.insert_group(UUID_LWP3_HUB_SERVICE, vec![UUID_LWP3_CONTROL_CHAR]);
    table
}

fn granted_gate() -> Arc<PlatformGate> {
    Arc::new(PlatformGate::new(RadioPreconditions::granted()))
}

fn new_manager(
    radio: Arc<MockRadio>,
    gate: Arc<PlatformGate>,
    policy: Arc<dyn ReconnectPolicy>,
) -> (HubManager, mpsc::UnboundedReceiver<HubEvent>) {
    HubManager::new(radio, gate, policy, &LinkConfig::default())
}

async fn wait_for(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {description}");
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<HubEvent>) -> HubEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
}

async fn assert_no_pending(events: &mut mpsc::UnboundedReceiver<HubEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

/// Drives a fresh connection to `Ready` and returns the mock channel.
async fn bring_to_ready(
    radio: &MockRadio,
    manager: &HubManager,
    events: &mut mpsc::UnboundedReceiver<HubEvent>,
) -> Arc<MockChannel> {
    manager.connect(hub()).unwrap();
    let link = radio.link(HUB_ADDRESS).await;
    link.send(LinkEvent::Connected {
        bond: BondState::Bonded,
    })
    .unwrap();

    assert_eq!(
        next_event(events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Connected,
            available: false,
        }
    );
    assert_eq!(
        next_event(events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Ready,
            available: true,
        }
    );
    radio.channel(HUB_ADDRESS).await
}

#[tokio::test]
async fn unknown_hub_is_notified_once_per_scan_session() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (mut manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    assert!(manager.start_scan().await);
    assert_eq!(next_event(&mut events).await, HubEvent::ScanStarted);
    radio.wait_scanning().await;

    radio.advertise(advert(HUB_ADDRESS));
    radio.advertise(advert(HUB_ADDRESS));

    assert_eq!(
        next_event(&mut events).await,
        HubEvent::HubFound {
            address: HUB_ADDRESS.to_string(),
            name: "Technic Hub".to_string(),
            rssi: Some(-60),
            feature_group: UUID_LWP3_HUB_SERVICE,
        }
    );
    assert_no_pending(&mut events).await;

    // No connect attempt was made for an unknown hub.
    assert_eq!(radio.open_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        manager.connection_state(HUB_ADDRESS),
        ConnectionState::Idle
    );
}

#[tokio::test]
async fn restarting_the_scan_clears_the_dedup_session() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (mut manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    assert!(manager.start_scan().await);
    assert_eq!(next_event(&mut events).await, HubEvent::ScanStarted);
    radio.wait_scanning().await;
    radio.advertise(advert(HUB_ADDRESS));
    assert!(matches!(
        next_event(&mut events).await,
        HubEvent::HubFound { .. }
    ));

    manager.stop_scan().await;
    assert_eq!(next_event(&mut events).await, HubEvent::ScanStopped);
    radio.reset_scan_probe();

    assert!(manager.start_scan().await);
    assert_eq!(next_event(&mut events).await, HubEvent::ScanStarted);
    radio.wait_scanning().await;
    radio.advertise(advert(HUB_ADDRESS));
    assert!(matches!(
        next_event(&mut events).await,
        HubEvent::HubFound { .. }
    ));
}

#[tokio::test]
async fn stop_scan_is_idempotent() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (mut manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    manager.stop_scan().await;
    assert!(manager.start_scan().await);
    manager.stop_scan().await;
    manager.stop_scan().await;

    assert_eq!(next_event(&mut events).await, HubEvent::ScanStarted);
    assert_eq!(next_event(&mut events).await, HubEvent::ScanStopped);
    assert_no_pending(&mut events).await;
}

#[tokio::test]
async fn known_hub_is_reconnected_without_a_discovery_notification() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (mut manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(AlwaysReconnect));

    assert!(manager.start_scan().await);
    assert_eq!(next_event(&mut events).await, HubEvent::ScanStarted);
    radio.wait_scanning().await;

    radio.advertise(advert(HUB_ADDRESS));
    wait_for("the auto-connect intent to reach the radio", || {
        radio.open_calls.load(Ordering::SeqCst) == 1
    })
    .await;

    // The registry suppresses further advertisements for the address.
    radio.advertise(advert(HUB_ADDRESS));
    assert_no_pending(&mut events).await;
    assert_eq!(radio.open_calls.load(Ordering::SeqCst), 1);
    assert_ne!(
        manager.connection_state(HUB_ADDRESS),
        ConnectionState::Idle
    );
}

#[tokio::test]
async fn bonded_hub_on_modern_stack_discovers_immediately() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    let channel = bring_to_ready(&radio, &manager, &mut events).await;
    assert_eq!(channel.discover_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        manager.connection_state(HUB_ADDRESS),
        ConnectionState::Ready
    );
    assert_eq!(manager.connected_hubs(), vec![hub()]);
}

#[tokio::test]
async fn bonding_in_flight_defers_feature_discovery() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    manager.connect(hub()).unwrap();
    let link = radio.link(HUB_ADDRESS).await;
    link.send(LinkEvent::Connected {
        bond: BondState::Bonding,
    })
    .unwrap();

    wait_for("the machine to hold for the bond", || {
        manager.connection_state(HUB_ADDRESS) == ConnectionState::AwaitingBondResolution
    })
    .await;
    let channel = radio.channel(HUB_ADDRESS).await;
    assert_eq!(channel.discover_calls.load(Ordering::SeqCst), 0);
    assert_no_pending(&mut events).await;

    link.send(LinkEvent::BondStateChanged {
        bond: BondState::Bonded,
    })
    .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Connected,
            available: false,
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Ready,
            available: true,
        }
    );
    assert_eq!(channel.discover_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failure_while_connecting_releases_everything() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    manager.connect(hub()).unwrap();
    let link = radio.link(HUB_ADDRESS).await;
    link.send(LinkEvent::Failed {
        status: STATUS_STACK_RESOURCES_EXHAUSTED,
    })
    .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Errored,
            available: false,
        }
    );
    // The unavailable notification is published after the registry entry is
    // gone and the channel released.
    assert_eq!(
        manager.connection_state(HUB_ADDRESS),
        ConnectionState::Idle
    );
    let channel = radio.channel(HUB_ADDRESS).await;
    assert_eq!(channel.closed.load(Ordering::SeqCst), 1);
    assert_no_pending(&mut events).await;
}

#[tokio::test]
async fn feature_discovery_failure_keeps_the_connection_open() {
    let radio = MockRadio::with_features(None);
    let (manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    manager.connect(hub()).unwrap();
    let link = radio.link(HUB_ADDRESS).await;
    link.send(LinkEvent::Connected {
        bond: BondState::NotBonded,
    })
    .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Connected,
            available: false,
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        HubEvent::FeatureDiscoveryIncomplete {
            address: HUB_ADDRESS.to_string(),
        }
    );
    assert_eq!(
        manager.connection_state(HUB_ADDRESS),
        ConnectionState::Connected
    );
    let channel = radio.channel(HUB_ADDRESS).await;
    assert_eq!(channel.closed.load(Ordering::SeqCst), 0);

    // Not ready, so writes are rejected before channel resolution.
    assert!(matches!(
        manager.send(HUB_ADDRESS, &[0x01]),
        Err(LinkError::NotReady { .. })
    ));
    assert!(channel.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_connect_intent_is_rejected() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (manager, _events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    manager.connect(hub()).unwrap();
    assert!(matches!(
        manager.connect(hub()),
        Err(LinkError::DuplicateConnection { .. })
    ));
}

#[tokio::test]
async fn explicit_disconnect_releases_the_channel_once() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    let channel = bring_to_ready(&radio, &manager, &mut events).await;
    manager.disconnect(HUB_ADDRESS).unwrap();

    assert_eq!(
        next_event(&mut events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Disconnecting,
            available: false,
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Closed,
            available: false,
        }
    );
    assert_eq!(
        manager.connection_state(HUB_ADDRESS),
        ConnectionState::Idle
    );
    assert_eq!(channel.closed.load(Ordering::SeqCst), 1);

    // Disconnecting again is a no-op.
    manager.disconnect(HUB_ADDRESS).unwrap();
}

#[tokio::test]
async fn link_drop_reported_by_the_stack_clears_the_registry() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    let channel = bring_to_ready(&radio, &manager, &mut events).await;
    let link = radio.link(HUB_ADDRESS).await;
    link.send(LinkEvent::Disconnected).unwrap();

    assert_eq!(
        next_event(&mut events).await,
        HubEvent::ConnectionChanged {
            address: HUB_ADDRESS.to_string(),
            state: ConnectionState::Closed,
            available: false,
        }
    );
    assert_eq!(
        manager.connection_state(HUB_ADDRESS),
        ConnectionState::Idle
    );
    assert_eq!(channel.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn send_reaches_the_endpoint_on_a_ready_hub() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let (manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    let channel = bring_to_ready(&radio, &manager, &mut events).await;
    manager.send(HUB_ADDRESS, &[0x0a, 0x00, 0x41]).unwrap();

    wait_for("the write to reach the channel", || {
        !channel.writes.lock().unwrap().is_empty()
    })
    .await;
    let writes = channel.writes.lock().unwrap();
    assert_eq!(
        writes[0],
        (
            UUID_LWP3_HUB_SERVICE,
            UUID_LWP3_CONTROL_CHAR,
            vec![0x0a, 0x00, 0x41]
        )
    );
}

#[tokio::test]
async fn send_with_endpoint_missing_from_live_table_keeps_the_connection() {
    // The hub exposes the service but not the expected control endpoint.
    let mut table = FeatureTable::new();
    table.insert_group(UUID_LWP3_HUB_SERVICE, vec![UUID_NUS_RX_CHAR]);
    let radio = MockRadio::with_features(Some(table));
    let (manager, mut events) =
        new_manager(radio.clone(), granted_gate(), Arc::new(NoAutoReconnect));

    let channel = bring_to_ready(&radio, &manager, &mut events).await;
    assert!(matches!(
        manager.send(HUB_ADDRESS, &[0x01]),
        Err(LinkError::EndpointNotFound { .. })
    ));
    assert_eq!(
        manager.connection_state(HUB_ADDRESS),
        ConnectionState::Ready
    );
    assert!(channel.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn denied_gate_makes_every_entry_point_a_no_op() {
    let radio = MockRadio::with_features(Some(ready_table()));
    let gate = granted_gate();
    let (mut manager, mut events) =
        new_manager(radio.clone(), gate.clone(), Arc::new(NoAutoReconnect));

    gate.update(RadioPreconditions::default());

    assert!(!manager.start_scan().await);
    assert!(matches!(
        manager.connect(hub()),
        Err(LinkError::PreconditionUnmet)
    ));
    assert!(matches!(
        manager.send(HUB_ADDRESS, &[0x01]),
        Err(LinkError::PreconditionUnmet)
    ));
    assert!(matches!(
        manager.disconnect(HUB_ADDRESS),
        Err(LinkError::PreconditionUnmet)
    ));

    assert_no_pending(&mut events).await;
    assert_eq!(radio.open_calls.load(Ordering::SeqCst), 0);
}
