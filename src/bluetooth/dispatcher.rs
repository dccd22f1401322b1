//! Outbound control writes.
//!
//! `send` is fire and forget: it validates the gate, the connection state
//! and the endpoint synchronously, then hands the payload to a detached
//! task that performs one unacknowledged write. Nothing is queued and no
//! delivery confirmation is tracked; two concurrent sends to the same hub
//! may race, ordering is the caller's business.

use std::sync::Arc;

use log::{trace, warn};

use crate::bluetooth::error::LinkError;
use crate::bluetooth::gate::RadioGate;
use crate::bluetooth::registry::ConnectionRegistry;

pub struct WriteDispatcher {
    gate: Arc<dyn RadioGate>,
    registry: ConnectionRegistry,
}

impl WriteDispatcher {
    pub fn new(gate: Arc<dyn RadioGate>, registry: ConnectionRegistry) -> Self {
        Self { gate, registry }
    }

    /// Dispatches one control payload to `address`. Returns as soon as the
    /// write is submitted; delivery is best effort and at most once.
    ///
    /// Synchronous rejections: [`LinkError::PreconditionUnmet`] when the
    /// radio gate denies, [`LinkError::NotReady`] when no `Ready`
    /// connection exists for the address, and [`LinkError::EndpointNotFound`]
    /// when the hub's live feature table does not expose the descriptor's
    /// control endpoint (the connection stays open in that case).
    pub fn send(&self, address: &str, payload: &[u8]) -> Result<(), LinkError> {
        if !self.gate.radio_ready() {
            return Err(LinkError::PreconditionUnmet);
        }

        let handle = match self.registry.get(address) {
            Some(handle) if handle.state.is_available() => handle,
            _ => {
                return Err(LinkError::NotReady {
                    address: address.to_string(),
                })
            }
        };

        let descriptor = handle.descriptor;
        let features = handle.features.unwrap_or_default();
        if !features.contains(descriptor.feature_group, descriptor.control_endpoint) {
            return Err(LinkError::EndpointNotFound {
                group: descriptor.feature_group,
                endpoint: descriptor.control_endpoint,
            });
        }

        let Some(channel) = handle.channel else {
            return Err(LinkError::NotReady {
                address: address.to_string(),
            });
        };

        trace!(
            "Dispatching {} byte(s) to {} endpoint {}",
            payload.len(),
            descriptor.address,
            descriptor.control_endpoint
        );
        let payload = payload.to_vec();
        tokio::spawn(async move {
            if let Err(e) = channel
                .write_without_response(
                    descriptor.feature_group,
                    descriptor.control_endpoint,
                    &payload,
                )
                .await
            {
                warn!(
                    "Unacknowledged write to {} failed: {e}",
                    descriptor.address
                );
            }
        });
        Ok(())
    }
}
