//! Platform BLE transport seam.
//!
//! One transport instance talks to at most one camera at a time. Notifications
//! and link loss are delivered on the channel returned by [`BleTransport::connect`].

use crate::domain::models::ScannedDevice;
use crate::error::TransportError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Notification { characteristic: Uuid, value: Vec<u8> },
    Disconnected,
}

#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Start advertising discovery. Found cameras are pushed into `sink`.
    async fn start_scan(&self, sink: mpsc::UnboundedSender<ScannedDevice>)
        -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Open the link and return the event stream for it
    async fn connect(
        &self,
        address: u64,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>;

    /// Enumerate the GoPro service and return the characteristic ids found
    async fn discover_services(&self) -> Result<Vec<Uuid>, TransportError>;

    async fn read_characteristic(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError>;

    async fn write_characteristic(
        &self,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    async fn enable_notification(&self, characteristic: Uuid) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
