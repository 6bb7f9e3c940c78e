// ── Device collaborators ──
//
// The manager never talks to USB directly. A `TransportDriver` reports
// hotplug events and opens transports; a `DeviceApp` speaks the signing
// app's request/response protocol over whichever transport is active.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::model::{DerivationPath, DeviceStatus};

/// Identifies one attached device, as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// Platform path (e.g. a hidraw node), opaque to the manager.
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
}

/// Operating-system level attach/detach notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Added(DeviceDescriptor),
    Removed(DeviceDescriptor),
}

/// A live hotplug subscription. Dropping it unsubscribes.
pub type HotplugSubscription = mpsc::UnboundedReceiver<HotplugEvent>;

/// Source of hotplug events and transports.
#[async_trait]
pub trait TransportDriver: Send + Sync + 'static {
    /// Subscribe to hotplug events. A fresh subscription first reports an
    /// `Added` event for every matching device already attached; those
    /// events are queued by the time `listen` returns.
    fn listen(&self) -> Result<HotplugSubscription, TransportError>;

    /// Open a transport to the described device.
    async fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn Transport>, TransportError>;
}

/// One open connection to a physical device.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one command frame and wait for its response.
    async fn exchange(&self, command: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Cancelled by the driver once it notices the device is gone. Some
    /// drivers only notice on the next `exchange` attempt.
    fn disconnect_signal(&self) -> CancellationToken;

    /// Release the underlying handle. Must be idempotent.
    async fn close(&self);
}

// ── Device protocol ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionResponse {
    pub status: DeviceStatus,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressResponse {
    pub status: DeviceStatus,
    pub public_key: Vec<u8>,
    pub chain_code: Vec<u8>,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResponse {
    pub status: DeviceStatus,
    pub post_sign_hash: Vec<u8>,
    pub signature_compact: Vec<u8>,
    pub signature_vrs: Vec<u8>,
    pub signature_der: Vec<u8>,
}

/// Client for the signing app running on the device.
///
/// A non-success status is *not* an `Err`: it comes back in the response
/// so the caller can decide what it means. `Err` is reserved for transport
/// failures and unparseable responses.
#[async_trait]
pub trait DeviceApp: Send + Sync + 'static {
    async fn get_version(&self, transport: &dyn Transport)
    -> Result<VersionResponse, TransportError>;

    async fn get_address(
        &self,
        transport: &dyn Transport,
        path: &DerivationPath,
    ) -> Result<AddressResponse, TransportError>;

    async fn sign(
        &self,
        transport: &dyn Transport,
        path: &DerivationPath,
        payload: &[u8],
    ) -> Result<SignResponse, TransportError>;
}
