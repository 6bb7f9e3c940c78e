//! Lifecycle manager for a USB hardware signing device.
//!
//! This crate keeps exactly one device connection alive across plug,
//! unplug and app open/close cycles, and exposes it to UI consumers:
//!
//! - **[`DeviceManager`]**: Central facade. [`enable()`](DeviceManager::enable)
//!   subscribes to hotplug events and spawns the owner task that drives the
//!   connection state machine, plus the keepalive poller.
//!   [`disable()`](DeviceManager::disable) tears everything down.
//!
//! - **State machine** ([`state`]): A pure [`transition`] table from
//!   `(ConnectionState, Input)` to the next state and a list of [`Effect`]s.
//!   The owner task is the only thing that interprets it.
//!
//! - **Request gateway**: [`request_address()`](DeviceManager::request_address)
//!   and [`request_sign()`](DeviceManager::request_sign) claim a busy token,
//!   so at most one device request is in flight and the keepalive poller
//!   stays out of its way.
//!
//! - **[`EventSubscription`]**: Ordered, lossless notification stream
//!   (`waiting-transport`, `has-transport`, `disconnected`, `device-status`).
//!
//! - **Collaborators** ([`transport`]): [`TransportDriver`], [`Transport`]
//!   and [`DeviceApp`] hide the HID stack and the signing app's protocol.
//!   [`sim`] provides a scripted device implementing all three.

pub mod config;
pub mod error;
mod gateway;
mod manager;
pub mod model;
mod poller;
pub mod sim;
pub mod state;
pub mod stream;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DEFAULT_DISCONNECT_DEBOUNCE, DEFAULT_POLL_INTERVAL, ManagerConfig};
pub use error::{CoreError, TransportError};
pub use manager::DeviceManager;
pub use poller::{PollOutcome, SkipReason};
pub use state::{ConnectionState, Effect, Input, Transition, transition};
pub use stream::{EventSubscription, SubscriptionId};
pub use transport::{
    AddressResponse, DeviceApp, DeviceDescriptor, HotplugEvent, HotplugSubscription,
    SignResponse, Transport, TransportDriver, VersionResponse,
};

pub use model::{
    AddressInfo, ConnectStep, DerivationPath, DeviceStatus, EventKind, NotificationEvent,
    ParsePathError, SignatureInfo,
};
