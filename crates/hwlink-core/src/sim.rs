//! Scripted signing device for tests and demos.
//!
//! [`SimDevice`] stands in for the physical device and its HID driver:
//! scripts call [`plug`](SimDevice::plug), [`unplug`](SimDevice::unplug)
//! or [`set_app_open`](SimDevice::set_app_open) and the manager sees the
//! same hotplug events, disconnect notifications and return codes a real
//! device would produce. Keys and signatures are derived from a seed with
//! SHA-256, so identical requests always yield identical answers.
//!
//! ```rust,ignore
//! let device = SimDevice::new(7);
//! let manager = DeviceManager::new(ManagerConfig::default(), device.driver(), SimApp::shared());
//! manager.enable().await?;
//! device.plug();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::TransportError;
use crate::model::{DerivationPath, DeviceStatus};
use crate::transport::{
    AddressResponse, DeviceApp, DeviceDescriptor, HotplugEvent, HotplugSubscription,
    SignResponse, Transport, TransportDriver, VersionResponse,
};

pub const SIM_VENDOR_ID: u16 = 0x2c97;
pub const SIM_PRODUCT_ID: u16 = 0x1011;

const INS_GET_VERSION: u8 = 0x00;
const INS_GET_ADDRESS: u8 = 0x01;
const INS_SIGN: u8 = 0x02;

const APP_VERSION: [u8; 3] = [0, 24, 1];

/// Transaction version bytes the simulated app accepts (mainnet, testnet).
const TX_VERSIONS: [u8; 2] = [0x00, 0x80];

// ── SimDevice ────────────────────────────────────────────────────

/// A simulated device plus the driver state around it.
pub struct SimDevice {
    seed: [u8; 32],
    state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    plugged: bool,
    app_open: bool,
    lazy_disconnect: bool,
    /// Bumped on every plug; transports from older epochs are dead.
    epoch: u64,
    failing_opens: u32,
    open_delay: Duration,
    latency: Duration,
    version_status: Option<u16>,
    listeners: Vec<mpsc::UnboundedSender<HotplugEvent>>,
    links: Vec<CancellationToken>,
    opens: u64,
    exchanges: u64,
    in_flight: usize,
    max_in_flight: usize,
}

impl SimDevice {
    /// A device that is not plugged in, with its signing app open.
    pub fn new(seed: u64) -> Arc<Self> {
        let seed: [u8; 32] = Sha256::digest(seed.to_be_bytes()).into();
        Arc::new(Self {
            seed,
            state: Mutex::new(SimState {
                app_open: true,
                ..SimState::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            path: "sim://0".into(),
            vendor_id: SIM_VENDOR_ID,
            product_id: SIM_PRODUCT_ID,
            product: Some("Simulated Nano S".into()),
        }
    }

    /// Driver handle for [`DeviceManager::new`](crate::DeviceManager::new).
    pub fn driver(self: &Arc<Self>) -> Arc<SimDriver> {
        Arc::new(SimDriver(Arc::clone(self)))
    }

    // ── Scripting ────────────────────────────────────────────────

    pub fn plug(&self) {
        let mut st = self.lock();
        if st.plugged {
            return;
        }
        st.plugged = true;
        st.epoch += 1;
        st.broadcast(&HotplugEvent::Added(Self::descriptor()));
        trace!(epoch = st.epoch, "sim: plugged");
    }

    /// Pull the cable. Unless the lazy-disconnect quirk is on, open
    /// transports are notified immediately.
    pub fn unplug(&self) {
        let mut st = self.lock();
        if !st.plugged {
            return;
        }
        st.plugged = false;
        st.broadcast(&HotplugEvent::Removed(Self::descriptor()));
        if !st.lazy_disconnect {
            for link in st.links.drain(..) {
                link.cancel();
            }
        }
        trace!(lazy = st.lazy_disconnect, "sim: unplugged");
    }

    pub fn set_app_open(&self, open: bool) {
        self.lock().app_open = open;
    }

    /// Withhold disconnect notifications until the next I/O attempt, like
    /// some HID drivers do.
    pub fn set_lazy_disconnect(&self, lazy: bool) {
        self.lock().lazy_disconnect = lazy;
    }

    /// Make the next `count` transport opens fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().failing_opens = count;
    }

    /// Delay every transport open by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = delay;
    }

    /// Delay every exchange by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Answer version requests with `code` instead of the real status.
    pub fn set_version_status(&self, code: Option<u16>) {
        self.lock().version_status = code;
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn is_plugged(&self) -> bool {
        self.lock().plugged
    }

    pub fn open_count(&self) -> u64 {
        self.lock().opens
    }

    pub fn exchange_count(&self) -> u64 {
        self.lock().exchanges
    }

    /// Highest number of exchanges ever in progress at once.
    pub fn max_concurrent_exchanges(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Hotplug subscriptions whose receiver is still alive.
    pub fn listener_count(&self) -> usize {
        let mut st = self.lock();
        st.listeners.retain(|tx| !tx.is_closed());
        st.listeners.len()
    }

    // ── Device side ──────────────────────────────────────────────

    fn respond(&self, st: &SimState, frame: &[u8]) -> Vec<u8> {
        let Some((&ins, payload)) = frame.split_first() else {
            return status_only(DeviceStatus::WrongLength);
        };

        if ins == INS_GET_VERSION {
            if let Some(code) = st.version_status {
                return status_only(DeviceStatus::from_code(code));
            }
        }
        if !st.app_open {
            return status_only(DeviceStatus::AppDoesNotSeemToBeOpen);
        }

        match ins {
            INS_GET_VERSION => reply(DeviceStatus::NoErrors, &APP_VERSION),
            INS_GET_ADDRESS => {
                if payload.is_empty() || payload.len() % 4 != 0 {
                    return status_only(DeviceStatus::WrongLength);
                }
                let key = self.key_at(payload);
                let public_key = public_key(&key);
                let chain_code = sha256(&[&key, b"chain"]);
                let address = address_for(&public_key);

                let mut data = public_key.to_vec();
                data.extend_from_slice(&chain_code);
                data.extend_from_slice(address.as_bytes());
                reply(DeviceStatus::NoErrors, &data)
            }
            INS_SIGN => {
                let Some((&count, rest)) = payload.split_first() else {
                    return status_only(DeviceStatus::WrongLength);
                };
                let path_len = usize::from(count) * 4;
                if rest.len() < path_len {
                    return status_only(DeviceStatus::WrongLength);
                }
                let (path, tx) = rest.split_at(path_len);
                match tx.first() {
                    None => return status_only(DeviceStatus::DataIsInvalid),
                    Some(version) if !TX_VERSIONS.contains(version) => {
                        return status_only(DeviceStatus::DataIsInvalid);
                    }
                    Some(_) => {}
                }

                let key = self.key_at(path);
                let hash = sha256(&[tx]);
                let r = sha256(&[&key, &hash]);
                let s = sha256(&[&r, &key]);
                let v = r[31] & 1;

                let mut data = hash.to_vec();
                data.extend_from_slice(&r);
                data.extend_from_slice(&s);
                data.push(v);
                data.push(v);
                data.extend_from_slice(&r);
                data.extend_from_slice(&s);
                data.extend_from_slice(&der_signature(&r, &s));
                reply(DeviceStatus::NoErrors, &data)
            }
            _ => status_only(DeviceStatus::InstructionNotSupported),
        }
    }

    fn key_at(&self, path: &[u8]) -> [u8; 32] {
        sha256(&[&self.seed, path])
    }
}

impl SimState {
    fn broadcast(&mut self, event: &HotplugEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// ── Driver ───────────────────────────────────────────────────────

/// [`TransportDriver`] backed by a [`SimDevice`].
pub struct SimDriver(Arc<SimDevice>);

#[async_trait]
impl TransportDriver for SimDriver {
    fn listen(&self) -> Result<HotplugSubscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut st = self.0.lock();
        if st.plugged {
            let _ = tx.send(HotplugEvent::Added(SimDevice::descriptor()));
        }
        st.listeners.push(tx);
        Ok(rx)
    }

    async fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn Transport>, TransportError> {
        let delay = self.0.lock().open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut st = self.0.lock();
        if st.failing_opens > 0 {
            st.failing_opens -= 1;
            return Err(TransportError::Open {
                message: format!("cannot open {}: device busy", device.path),
            });
        }
        if !st.plugged {
            return Err(TransportError::Open {
                message: format!("cannot open {}: no such device", device.path),
            });
        }

        st.opens += 1;
        let disconnect = CancellationToken::new();
        st.links.push(disconnect.clone());
        Ok(Box::new(SimTransport {
            device: Arc::clone(&self.0),
            epoch: st.epoch,
            disconnect,
            closed: AtomicBool::new(false),
        }))
    }
}

// ── Transport ────────────────────────────────────────────────────

struct SimTransport {
    device: Arc<SimDevice>,
    epoch: u64,
    disconnect: CancellationToken,
    closed: AtomicBool,
}

impl SimTransport {
    fn alive(&self, st: &SimState) -> bool {
        st.plugged && st.epoch == self.epoch
    }
}

/// Counts an exchange as in flight until dropped.
struct InFlight<'a>(&'a SimDevice);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut st = self.0.lock();
        st.in_flight = st.in_flight.saturating_sub(1);
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn exchange(&self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Io {
                message: "transport closed".into(),
            });
        }

        let latency = {
            let mut st = self.device.lock();
            if !self.alive(&st) {
                drop(st);
                self.disconnect.cancel();
                return Err(TransportError::Disconnected);
            }
            st.exchanges += 1;
            st.in_flight += 1;
            st.max_in_flight = st.max_in_flight.max(st.in_flight);
            st.latency
        };
        let _in_flight = InFlight(&self.device);

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let st = self.device.lock();
        if !self.alive(&st) {
            drop(st);
            self.disconnect.cancel();
            return Err(TransportError::Disconnected);
        }
        Ok(self.device.respond(&st, command))
    }

    fn disconnect_signal(&self) -> CancellationToken {
        self.disconnect.clone()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut st = self.device.lock();
        st.links.retain(|link| *link != self.disconnect);
    }
}

// ── App client ───────────────────────────────────────────────────

/// [`DeviceApp`] speaking the simulator's frame format:
/// `[ins, payload..]` out, `[status_hi, status_lo, data..]` back.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimApp;

impl SimApp {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl DeviceApp for SimApp {
    async fn get_version(
        &self,
        transport: &dyn Transport,
    ) -> Result<VersionResponse, TransportError> {
        let raw = transport.exchange(&[INS_GET_VERSION]).await?;
        let (status, data) = split_reply(&raw)?;
        let (major, minor, patch) = match data {
            [major, minor, patch, ..] => (*major, *minor, *patch),
            _ => (0, 0, 0),
        };
        Ok(VersionResponse {
            status,
            major,
            minor,
            patch,
        })
    }

    async fn get_address(
        &self,
        transport: &dyn Transport,
        path: &DerivationPath,
    ) -> Result<AddressResponse, TransportError> {
        let mut frame = vec![INS_GET_ADDRESS];
        frame.extend_from_slice(&path.to_bytes());
        let raw = transport.exchange(&frame).await?;
        let (status, data) = split_reply(&raw)?;

        if !status.is_success() {
            return Ok(AddressResponse {
                status,
                public_key: Vec::new(),
                chain_code: Vec::new(),
                address: String::new(),
            });
        }
        if data.len() < 65 {
            return Err(TransportError::protocol("address reply too short"));
        }
        let (public_key, rest) = data.split_at(33);
        let (chain_code, address) = rest.split_at(32);
        let address = std::str::from_utf8(address)
            .map_err(|_| TransportError::protocol("address is not UTF-8"))?;

        Ok(AddressResponse {
            status,
            public_key: public_key.to_vec(),
            chain_code: chain_code.to_vec(),
            address: address.to_owned(),
        })
    }

    async fn sign(
        &self,
        transport: &dyn Transport,
        path: &DerivationPath,
        payload: &[u8],
    ) -> Result<SignResponse, TransportError> {
        let count = u8::try_from(path.components().len())
            .map_err(|_| TransportError::protocol("derivation path too deep"))?;
        let mut frame = vec![INS_SIGN, count];
        frame.extend_from_slice(&path.to_bytes());
        frame.extend_from_slice(payload);
        let raw = transport.exchange(&frame).await?;
        let (status, data) = split_reply(&raw)?;

        if !status.is_success() {
            return Ok(SignResponse {
                status,
                post_sign_hash: Vec::new(),
                signature_compact: Vec::new(),
                signature_vrs: Vec::new(),
                signature_der: Vec::new(),
            });
        }
        if data.len() < 32 + 65 + 65 {
            return Err(TransportError::protocol("signature reply too short"));
        }
        let (post_sign_hash, rest) = data.split_at(32);
        let (signature_compact, rest) = rest.split_at(65);
        let (signature_vrs, signature_der) = rest.split_at(65);

        Ok(SignResponse {
            status,
            post_sign_hash: post_sign_hash.to_vec(),
            signature_compact: signature_compact.to_vec(),
            signature_vrs: signature_vrs.to_vec(),
            signature_der: signature_der.to_vec(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn split_reply(raw: &[u8]) -> Result<(DeviceStatus, &[u8]), TransportError> {
    match raw {
        [hi, lo, data @ ..] => Ok((DeviceStatus::from_code(u16::from_be_bytes([*hi, *lo])), data)),
        _ => Err(TransportError::protocol("reply shorter than a status word")),
    }
}

fn reply(status: DeviceStatus, data: &[u8]) -> Vec<u8> {
    let mut out = status.code().to_be_bytes().to_vec();
    out.extend_from_slice(data);
    out
}

fn status_only(status: DeviceStatus) -> Vec<u8> {
    reply(status, &[])
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn public_key(key: &[u8; 32]) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = 0x02 | (key[31] & 1);
    out[1..].copy_from_slice(key);
    out
}

fn address_for(public_key: &[u8]) -> String {
    let digest = sha256(&[public_key]);
    format!("SP{}", hex::encode_upper(&digest[..20]))
}

/// DER `SEQUENCE { INTEGER r, INTEGER s }`.
fn der_signature(r: &[u8], s: &[u8]) -> Vec<u8> {
    let mut body = der_integer(r);
    body.extend(der_integer(s));
    let mut out = vec![0x30, der_len(body.len())];
    out.extend(body);
    out
}

fn der_integer(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let trimmed = &bytes[start..];
    let mut out = vec![0x02];
    match trimmed.first() {
        None => out.extend([1, 0]),
        Some(first) if first & 0x80 != 0 => {
            out.push(der_len(trimmed.len() + 1));
            out.push(0);
            out.extend_from_slice(trimmed);
        }
        Some(_) => {
            out.push(der_len(trimmed.len()));
            out.extend_from_slice(trimmed);
        }
    }
    out
}

fn der_len(len: usize) -> u8 {
    u8::try_from(len).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn der_integers_are_minimal_and_positive() {
        assert_eq!(der_integer(&[0, 0, 0x12]), vec![0x02, 1, 0x12]);
        assert_eq!(der_integer(&[0x80, 1]), vec![0x02, 3, 0, 0x80, 1]);
        assert_eq!(der_integer(&[0, 0]), vec![0x02, 1, 0]);
    }

    #[test]
    fn der_signature_wraps_sequence() {
        let sig = der_signature(&[0x01], &[0x02]);
        assert_eq!(sig, vec![0x30, 6, 0x02, 1, 0x01, 0x02, 1, 0x02]);
    }

    #[test]
    fn replies_split_status_and_data() {
        let raw = reply(DeviceStatus::NoErrors, &[1, 2, 3]);
        let (status, data) = split_reply(&raw).expect("well-formed");
        assert_eq!(status, DeviceStatus::NoErrors);
        assert_eq!(data, &[1, 2, 3]);
        assert!(split_reply(&[0x90]).is_err());
    }

    #[test]
    fn closed_app_answers_with_its_status() {
        let device = SimDevice::new(1);
        device.set_app_open(false);
        let st = device.lock();
        let (status, _) = split_reply(&device.respond(&st, &[INS_GET_VERSION])).expect("reply");
        assert_eq!(status, DeviceStatus::AppDoesNotSeemToBeOpen);
    }

    #[test]
    fn listen_replays_attached_device() {
        let device = SimDevice::new(1);
        device.plug();
        let mut rx = device.driver().listen().expect("listen");
        assert_eq!(
            rx.try_recv().ok(),
            Some(HotplugEvent::Added(SimDevice::descriptor()))
        );
        assert_eq!(device.listener_count(), 1);
        drop(rx);
        assert_eq!(device.listener_count(), 0);
    }

    #[tokio::test]
    async fn lazy_disconnect_fires_on_next_exchange() {
        let device = SimDevice::new(1);
        device.set_lazy_disconnect(true);
        device.plug();
        let transport = device
            .driver()
            .open(&SimDevice::descriptor())
            .await
            .expect("open");
        let signal = transport.disconnect_signal();

        device.unplug();
        assert!(!signal.is_cancelled());

        let err = transport.exchange(&[INS_GET_VERSION]).await.expect_err("gone");
        assert_eq!(err, TransportError::Disconnected);
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn same_seed_same_address() {
        let path = DerivationPath::stacks_default();
        let mut addresses = Vec::new();
        for _ in 0..2 {
            let device = SimDevice::new(42);
            device.plug();
            let transport = device
                .driver()
                .open(&SimDevice::descriptor())
                .await
                .expect("open");
            let reply = SimApp
                .get_address(transport.as_ref(), &path)
                .await
                .expect("address");
            assert_eq!(reply.public_key.len(), 33);
            addresses.push(reply.address);
        }
        assert_eq!(addresses[0], addresses[1]);
        assert!(addresses[0].starts_with("SP"));
    }
}
