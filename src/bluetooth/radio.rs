//! The hardware seam.
//!
//! Everything above this module speaks [`Radio`] and [`HubChannel`]; the
//! platform Bluetooth stack lives behind them (see `hardware.rs` for the
//! bluest-backed implementation). Tests drive the same seam with mocks.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::bluetooth::error::LinkError;
use crate::bluetooth::scanner::ScanFilterSet;
use crate::bluetooth::types::{Advertisement, FeatureTable, LinkEvent};

/// Entry points into the platform radio.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Starts discovery and returns the advertisement stream. The stream
    /// ends when the radio stops scanning on its own; the caller cancels by
    /// dropping it.
    async fn advertisements(
        &self,
        filters: &ScanFilterSet,
    ) -> Result<BoxStream<'static, Advertisement>, LinkError>;

    /// Submits a connect intent for `address` and returns the channel handle
    /// together with the link event stream. Returns quickly; the outcome of
    /// the handshake arrives as [`LinkEvent`]s.
    async fn open(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn HubChannel>, mpsc::UnboundedReceiver<LinkEvent>), LinkError>;
}

/// The opaque live connection resource owned by a registry handle.
#[async_trait]
pub trait HubChannel: Send + Sync {
    /// Walks the feature table the connected hub actually exposes.
    async fn discover_features(&self) -> Result<FeatureTable, LinkError>;

    /// One unacknowledged write to `endpoint` inside `group`. Best effort,
    /// at most once.
    async fn write_without_response(
        &self,
        group: uuid::Uuid,
        endpoint: uuid::Uuid,
        payload: &[u8],
    ) -> Result<(), LinkError>;

    /// Releases the underlying hardware session. Idempotent.
    async fn close(&self);
}
