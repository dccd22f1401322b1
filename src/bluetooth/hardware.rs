//! bluest-backed implementation of the hardware seam.
//!
//! Maps the platform Bluetooth stack onto [`Radio`]/[`HubChannel`]: the
//! scan stream becomes [`Advertisement`]s, the connect handshake and link
//! supervision become [`LinkEvent`]s on a per-connection channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bluest::{Adapter, Device};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bluetooth::constants::STATUS_GATT_ERROR;
use crate::bluetooth::error::LinkError;
use crate::bluetooth::radio::{HubChannel, Radio};
use crate::bluetooth::scanner::ScanFilterSet;
use crate::bluetooth::types::{Advertisement, BondState, FeatureTable, LinkEvent};

/// Radio backed by the platform Bluetooth stack through bluest.
pub struct BluestRadio {
    adapter: Adapter,
    /// Device handles by address, filled by the scan stream and consumed by
    /// `open`
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluestRadio {
    pub async fn new() -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl Radio for BluestRadio {
    async fn advertisements(
        &self,
        filters: &ScanFilterSet,
    ) -> Result<BoxStream<'static, Advertisement>, LinkError> {
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let filter_groups: Vec<Uuid> = filters.groups().to_vec();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // Hubs the platform already holds a connection to never
            // advertise again; surface them first, like a scan result.
            match adapter.connected_devices().await {
                Ok(connected) => {
                    for device in connected {
                        let advertisement = describe_connected(&device).await;
                        devices
                            .lock()
                            .unwrap()
                            .insert(advertisement.address.clone(), device);
                        if tx.send(advertisement).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => debug!("Could not list connected devices: {e}"),
            }

            let mut scan_stream = match adapter.scan(&filter_groups).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Bluetooth scan failed to start: {e}");
                    return;
                }
            };

            while let Some(discovered) = scan_stream.next().await {
                let id = discovered.device.id().to_string();
                let address = extract_mac_address(&id).unwrap_or_else(|| id.clone());
                let advertisement = Advertisement {
                    address: address.clone(),
                    name: discovered
                        .adv_data
                        .local_name
                        .clone()
                        .or_else(|| discovered.device.name().ok()),
                    rssi: discovered.rssi,
                    services: discovered.adv_data.services.clone(),
                };
                devices.lock().unwrap().insert(address, discovered.device);
                if tx.send(advertisement).is_err() {
                    // Receiver gone: the scan was stopped.
                    break;
                }
            }
            info!("Bluetooth scan stream ended");
        });

        Ok(unbounded_into_stream(rx))
    }

    async fn open(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn HubChannel>, mpsc::UnboundedReceiver<LinkEvent>), LinkError> {
        let device = self
            .devices
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| LinkError::UnknownPeripheral {
                address: address.to_string(),
            })?;

        let adapter = self.adapter.clone();
        let channel: Arc<dyn HubChannel> = Arc::new(BluestChannel {
            adapter: adapter.clone(),
            device: device.clone(),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Err(e) = adapter.connect_device(&device).await {
                error!("Connecting to {} failed: {e}", device.id());
                let _ = tx.send(LinkEvent::Failed {
                    status: STATUS_GATT_ERROR,
                });
                return;
            }

            let bond = match device.is_paired().await {
                Ok(true) => BondState::Bonded,
                _ => BondState::NotBonded,
            };
            if tx.send(LinkEvent::Connected { bond }).is_err() {
                return;
            }

            // bluest has no portable disconnect notification; supervise the
            // link by polling.
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if tx.is_closed() {
                    return;
                }
                if !device.is_connected().await {
                    let _ = tx.send(LinkEvent::Disconnected);
                    return;
                }
            }
        });

        Ok((channel, rx))
    }
}

/// One live bluest connection.
pub struct BluestChannel {
    adapter: Adapter,
    device: Device,
}

#[async_trait]
impl HubChannel for BluestChannel {
    async fn discover_features(&self) -> Result<FeatureTable, LinkError> {
        let services = self
            .device
            .discover_services()
            .await
            .map_err(|e| LinkError::Backend(e.into()))?;

        let mut table = FeatureTable::new();
        for service in services {
            let characteristics = service
                .discover_characteristics()
                .await
                .map_err(|e| LinkError::Backend(e.into()))?;
            table.insert_group(
                service.uuid(),
                characteristics.iter().map(|c| c.uuid()).collect(),
            );
        }
        Ok(table)
    }

    async fn write_without_response(
        &self,
        group: Uuid,
        endpoint: Uuid,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let services = self
            .device
            .services()
            .await
            .map_err(|e| LinkError::Backend(e.into()))?;
        let service = services
            .iter()
            .find(|s| s.uuid() == group)
            .ok_or(LinkError::EndpointNotFound { group, endpoint })?;

        let characteristics = service
            .characteristics()
            .await
            .map_err(|e| LinkError::Backend(e.into()))?;
        let characteristic = characteristics
            .iter()
            .find(|c| c.uuid() == endpoint)
            .ok_or(LinkError::EndpointNotFound { group, endpoint })?;

        characteristic
            .write_without_response(payload)
            .await
            .map_err(|e| LinkError::Backend(e.into()))?;
        Ok(())
    }

    async fn close(&self) {
        if self.device.is_connected().await {
            if let Err(e) = self.adapter.disconnect_device(&self.device).await {
                warn!("Disconnecting {} failed: {e}", self.device.id());
            }
        }
    }
}

async fn describe_connected(device: &Device) -> Advertisement {
    let id = device.id().to_string();
    let services = match device.services().await {
        Ok(services) => services.iter().map(|s| s.uuid()).collect(),
        Err(_) => Vec::new(),
    };
    Advertisement {
        address: extract_mac_address(&id).unwrap_or(id),
        name: device.name().ok(),
        rssi: None,
        services,
    }
}

/// Pulls the MAC address out of a platform device id; some platforms hide
/// it, in which case the opaque id doubles as the address.
fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}

fn unbounded_into_stream(
    rx: mpsc::UnboundedReceiver<Advertisement>,
) -> BoxStream<'static, Advertisement> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|advertisement| (advertisement, rx))
    })
    .boxed()
}
