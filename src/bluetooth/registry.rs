//! Connection registry: the single source of truth for "is this hub
//! currently connected".
//!
//! Shared by the scan context (read, to suppress duplicate discovery), the
//! link drivers (write, to publish their own transitions) and the write
//! context (read, to resolve a channel). Every operation takes the mutex for
//! the duration of one call only; composite decisions such as "connect only
//! if absent" are single atomic calls ([`ConnectionRegistry::claim`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::bluetooth::error::LinkError;
use crate::bluetooth::radio::HubChannel;
use crate::bluetooth::types::{ConnectionState, FeatureTable, HubDescriptor, LinkCommand};

/// One live or in-progress hub connection. Mutated only by the link driver
/// that owns it, through the registry's typed operations.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub descriptor: HubDescriptor,
    pub state: ConnectionState,
    pub last_status: Option<u8>,
    /// Live feature table, present once discovery succeeded
    pub features: Option<FeatureTable>,
    /// Underlying channel resource, attached once the radio accepted the
    /// connect intent
    pub(crate) channel: Option<Arc<dyn HubChannel>>,
    /// Command inlet of the owning link driver
    pub(crate) control: mpsc::UnboundedSender<LinkCommand>,
}

impl ConnectionHandle {
    pub fn address(&self) -> &str {
        &self.descriptor.address
    }
}

/// Concurrency-safe map from hub address to its connection handle.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<String, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The atomic "connect only if absent" step: inserts a `Connecting`
    /// handle for the descriptor's address, or fails with
    /// [`LinkError::DuplicateConnection`] when a non-terminal entry already
    /// exists. A terminal leftover is replaced.
    pub fn claim(
        &self,
        descriptor: &HubDescriptor,
        control: mpsc::UnboundedSender<LinkCommand>,
    ) -> Result<(), LinkError> {
        let mut map = self.inner.lock().unwrap();
        if let Some(existing) = map.get(&descriptor.address) {
            if !existing.state.is_terminal() {
                return Err(LinkError::DuplicateConnection {
                    address: descriptor.address.clone(),
                });
            }
        }
        map.insert(
            descriptor.address.clone(),
            ConnectionHandle {
                descriptor: descriptor.clone(),
                state: ConnectionState::Connecting,
                last_status: None,
                features: None,
                channel: None,
                control,
            },
        );
        Ok(())
    }

    /// Attaches the channel resource once the radio accepted the intent.
    /// Owner-side operation.
    pub(crate) fn attach_channel(&self, address: &str, channel: Arc<dyn HubChannel>) {
        if let Some(handle) = self.inner.lock().unwrap().get_mut(address) {
            handle.channel = Some(channel);
        }
    }

    /// Publishes a state transition for `address`; returns the previous
    /// state when the entry exists. Owner-side operation.
    pub(crate) fn transition(
        &self,
        address: &str,
        state: ConnectionState,
    ) -> Option<ConnectionState> {
        self.inner.lock().unwrap().get_mut(address).map(|handle| {
            let previous = handle.state;
            handle.state = state;
            previous
        })
    }

    /// Stores the discovered feature table. Owner-side operation.
    pub(crate) fn set_features(&self, address: &str, features: FeatureTable) {
        if let Some(handle) = self.inner.lock().unwrap().get_mut(address) {
            handle.features = Some(features);
        }
    }

    /// Records the status code of a hardware failure. Owner-side operation.
    pub(crate) fn record_failure(&self, address: &str, status: u8) {
        if let Some(handle) = self.inner.lock().unwrap().get_mut(address) {
            handle.last_status = Some(status);
        }
    }

    /// Clone-out snapshot of the handle for `address`.
    pub fn get(&self, address: &str) -> Option<ConnectionHandle> {
        self.inner.lock().unwrap().get(address).cloned()
    }

    /// Removes the entry for `address`. Idempotent; succeeds when absent.
    pub fn remove(&self, address: &str) -> Option<ConnectionHandle> {
        self.inner.lock().unwrap().remove(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner.lock().unwrap().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Snapshot of every registered address.
    pub fn addresses(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    /// Snapshot of the descriptors whose hubs are available for control.
    pub fn connected(&self) -> Vec<HubDescriptor> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|handle| handle.state.is_available())
            .map(|handle| handle.descriptor.clone())
            .collect()
    }
}
