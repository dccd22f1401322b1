//! Hub discovery.
//!
//! Drives the radio's advertisement stream on a background task, applies the
//! scan filters and the RSSI floor, recognizes hub profiles, and either
//! surfaces a discovery notification or silently triggers an auto-reconnect,
//! de-duplicated per scan session.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bluetooth::constants::{self, RECOGNIZED_PROFILES};
use crate::bluetooth::gate::RadioGate;
use crate::bluetooth::policy::ReconnectPolicy;
use crate::bluetooth::radio::Radio;
use crate::bluetooth::registry::ConnectionRegistry;
use crate::bluetooth::types::{Advertisement, HubDescriptor};
use crate::events::{EventBus, HubEvent};

/// Filters applied to raw advertisements. Recomputed per scan start, never
/// persisted.
#[derive(Debug, Clone, Default)]
pub struct ScanFilterSet {
    groups: Vec<Uuid>,
    address: Option<String>,
}

impl ScanFilterSet {
    /// Filters for every hub family the crate recognizes.
    pub fn recognized() -> Self {
        Self::for_groups(RECOGNIZED_PROFILES.iter().map(|p| p.feature_group))
    }

    pub fn for_groups(groups: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            groups: groups.into_iter().collect(),
            address: None,
        }
    }

    /// Filter for one known hub, e.g. when re-acquiring a remembered
    /// address.
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            groups: Vec::new(),
            address: Some(address.into()),
        }
    }

    pub fn groups(&self) -> &[Uuid] {
        &self.groups
    }

    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        if let Some(address) = &self.address {
            if !address.eq_ignore_ascii_case(&advertisement.address) {
                return false;
            }
        }
        if self.groups.is_empty() {
            return true;
        }
        advertisement
            .services
            .iter()
            .any(|service| self.groups.contains(service))
    }
}

/// What the scan pipeline decided for one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanAction {
    /// Drop silently (duplicate, or auto-reconnect target already handled)
    Suppress,
    /// Known hub that should reconnect: issue a connect intent, no
    /// discovery notification
    Connect,
    /// Surface a discovery notification
    Notify,
}

/// Per-session discovery de-duplication. A fresh session starts with every
/// scan start, which is how listeners clear the de-dup set.
#[derive(Default)]
pub(crate) struct ScanSession {
    seen: HashSet<String>,
}

impl ScanSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn evaluate(
        &mut self,
        address: &str,
        should_reconnect: bool,
        already_connected: bool,
    ) -> ScanAction {
        if should_reconnect {
            return if already_connected {
                ScanAction::Suppress
            } else {
                ScanAction::Connect
            };
        }
        if self.seen.insert(address.to_string()) {
            ScanAction::Notify
        } else {
            ScanAction::Suppress
        }
    }
}

/// Drives radio discovery on a background task.
pub struct HubScanner {
    radio: Arc<dyn Radio>,
    gate: Arc<dyn RadioGate>,
    policy: Arc<dyn ReconnectPolicy>,
    registry: ConnectionRegistry,
    events: EventBus,
    connect_intents: mpsc::UnboundedSender<HubDescriptor>,
    min_rssi: i16,
    cancel: CancellationToken,
    scan_task: Option<JoinHandle<()>>,
}

impl HubScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn RadioGate>,
        policy: Arc<dyn ReconnectPolicy>,
        registry: ConnectionRegistry,
        events: EventBus,
        connect_intents: mpsc::UnboundedSender<HubDescriptor>,
        min_rssi: i16,
    ) -> Self {
        Self {
            radio,
            gate,
            policy,
            registry,
            events,
            connect_intents,
            min_rssi,
            cancel: CancellationToken::new(),
            scan_task: None,
        }
    }

    /// Begins asynchronous discovery and returns immediately. Reports
    /// `false` without side effects when the radio preconditions are not
    /// satisfied. A running scan is restarted, which clears the discovery
    /// de-dup session.
    pub async fn start(&mut self, filters: ScanFilterSet) -> bool {
        if !self.gate.radio_ready() {
            warn!("Scan request denied: radio preconditions not satisfied");
            return false;
        }

        if self.scan_task.is_some() {
            self.stop().await;
        }

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let radio = self.radio.clone();
        let policy = self.policy.clone();
        let registry = self.registry.clone();
        let events = self.events.clone();
        let connect_intents = self.connect_intents.clone();
        let min_rssi = self.min_rssi;

        self.scan_task = Some(tokio::spawn(async move {
            scan_task(
                radio,
                filters,
                policy,
                registry,
                events,
                connect_intents,
                min_rssi,
                cancel,
            )
            .await;
        }));

        self.events.publish(HubEvent::ScanStarted);
        info!("Hub scan task started");
        true
    }

    /// Stops discovery. Idempotent; safe to call when not scanning.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.scan_task.take() {
            if let Err(e) = task.await {
                error!("Scan task ended with a join error: {e}");
            }
            self.events.publish(HubEvent::ScanStopped);
            info!("Hub scan stopped");
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task.is_some()
    }
}

#[allow(clippy::too_many_arguments)]
async fn scan_task(
    radio: Arc<dyn Radio>,
    filters: ScanFilterSet,
    policy: Arc<dyn ReconnectPolicy>,
    registry: ConnectionRegistry,
    events: EventBus,
    connect_intents: mpsc::UnboundedSender<HubDescriptor>,
    min_rssi: i16,
    cancel: CancellationToken,
) {
    let mut stream = match radio.advertisements(&filters).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to start radio discovery: {e}");
            return;
        }
    };

    let mut session = ScanSession::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            advertisement = stream.next() => match advertisement {
                Some(advertisement) => {
                    process_advertisement(
                        &advertisement,
                        &filters,
                        min_rssi,
                        &mut session,
                        policy.as_ref(),
                        &registry,
                        &events,
                        &connect_intents,
                    );
                }
                None => {
                    info!("Advertisement stream ended");
                    break;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_advertisement(
    advertisement: &Advertisement,
    filters: &ScanFilterSet,
    min_rssi: i16,
    session: &mut ScanSession,
    policy: &dyn ReconnectPolicy,
    registry: &ConnectionRegistry,
    events: &EventBus,
    connect_intents: &mpsc::UnboundedSender<HubDescriptor>,
) {
    if !filters.matches(advertisement) {
        return;
    }
    if let Some(rssi) = advertisement.rssi {
        if rssi < min_rssi {
            debug!(
                "Ignoring {} at {} dBm (floor {} dBm)",
                advertisement.address, rssi, min_rssi
            );
            return;
        }
    }
    let Some(profile) = advertisement
        .services
        .iter()
        .find_map(|service| constants::profile_for(*service))
    else {
        return;
    };

    let action = session.evaluate(
        &advertisement.address,
        policy.should_auto_reconnect(&advertisement.address),
        registry.contains(&advertisement.address),
    );
    match action {
        ScanAction::Suppress => {}
        ScanAction::Connect => {
            let descriptor = HubDescriptor::new(
                advertisement.address.clone(),
                advertisement
                    .name
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
                profile,
            );
            debug!("Auto-reconnecting to known hub {}", descriptor.address);
            let _ = connect_intents.send(descriptor);
        }
        ScanAction::Notify => {
            events.publish(HubEvent::HubFound {
                address: advertisement.address.clone(),
                name: advertisement
                    .name
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
                rssi: advertisement.rssi,
                feature_group: profile.feature_group,
            });
        }
    }
}
