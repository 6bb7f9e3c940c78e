// ── Domain types ──

mod event;
mod info;
mod path;
mod status;
mod step;

pub use event::{EventKind, NotificationEvent};
pub use info::{AddressInfo, SignatureInfo};
pub use path::{DerivationPath, ParsePathError};
pub use status::DeviceStatus;
pub use step::ConnectStep;
