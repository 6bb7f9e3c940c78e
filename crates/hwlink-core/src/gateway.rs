// ── Request gateway ──
//
// Address and signing requests from outside the manager. Each request
// claims the busy token (failing fast if another request holds it), does
// exactly one device round trip, and releases the token on every exit
// path via the guard's `Drop`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::CoreError;
use crate::manager::{DeviceManager, Session};
use crate::model::{AddressInfo, DeviceStatus, SignatureInfo};
use crate::state::ConnectionState;

// ── Busy token ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct BusyToken(AtomicBool);

impl BusyToken {
    pub(crate) fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self))
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub(crate) struct BusyGuard<'a>(&'a BusyToken);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.0.store(false, Ordering::Release);
    }
}

// ── Requests ─────────────────────────────────────────────────────

impl DeviceManager {
    /// Fetch the public key and address at the configured derivation path.
    pub async fn request_address(&self) -> Result<AddressInfo, CoreError> {
        let (session, _busy) = self.claim()?;
        let _io = self.inner.io.lock().await;

        let path = &self.inner.config.derivation_path;
        debug!(%path, generation = session.generation, "requesting address");
        let response = self.inner.app.get_address(session.transport(), path).await?;
        ensure_success(response.status)?;

        Ok(AddressInfo {
            public_key: hex::encode(&response.public_key),
            address: response.address,
            chain_code: hex::encode(&response.chain_code),
        })
    }

    /// Sign a hex-encoded unsigned transaction.
    pub async fn request_sign(&self, unsigned_tx: &str) -> Result<SignatureInfo, CoreError> {
        let payload =
            hex::decode(unsigned_tx.trim()).map_err(|e| CoreError::MalformedInput {
                message: format!("transaction is not valid hex: {e}"),
            })?;
        self.request_sign_bytes(&payload).await
    }

    /// Sign raw transaction bytes.
    pub async fn request_sign_bytes(&self, payload: &[u8]) -> Result<SignatureInfo, CoreError> {
        let (session, _busy) = self.claim()?;
        let _io = self.inner.io.lock().await;

        let path = &self.inner.config.derivation_path;
        debug!(
            %path,
            generation = session.generation,
            bytes = payload.len(),
            "requesting signature"
        );
        let response = self
            .inner
            .app
            .sign(session.transport(), path, payload)
            .await?;

        if response.status.is_malformed_input() {
            return Err(CoreError::MalformedInput {
                message: format!("device rejected the transaction: {}", response.status),
            });
        }
        ensure_success(response.status)?;

        Ok(SignatureInfo {
            signature_vrs: hex::encode(&response.signature_vrs),
            signature_der: hex::encode(&response.signature_der),
            signature_compact: hex::encode(&response.signature_compact),
            post_sign_hash: hex::encode(&response.post_sign_hash),
        })
    }

    /// Take the current Session and the busy token, in that order.
    ///
    /// The owner task stores a Session just before announcing it with
    /// `has-transport`, so a Session alone is not enough: the published
    /// state must already be `Connected`.
    fn claim(&self) -> Result<(Arc<Session>, BusyGuard<'_>), CoreError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(CoreError::NoTransport);
        }
        let session = self
            .inner
            .session
            .load_full()
            .ok_or(CoreError::NoTransport)?;
        let busy = self.inner.busy.try_acquire().ok_or(CoreError::Busy)?;
        Ok((session, busy))
    }
}

fn ensure_success(status: DeviceStatus) -> Result<(), CoreError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CoreError::Device { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::sim::{SimApp, SimDevice};
    use crate::transport::TransportDriver;

    #[test]
    fn token_admits_one_holder() {
        let token = BusyToken::default();
        let guard = token.try_acquire().expect("free token");
        assert!(token.is_set());
        assert!(token.try_acquire().is_none());
        drop(guard);
        assert!(!token.is_set());
        assert!(token.try_acquire().is_some());
    }

    #[test]
    fn token_released_on_panic() {
        let token = BusyToken::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = token.try_acquire();
            panic!("device call blew up");
        }));
        assert!(result.is_err());
        assert!(!token.is_set());
    }

    #[test]
    fn non_success_status_is_device_error() {
        assert!(ensure_success(DeviceStatus::NoErrors).is_ok());
        let err = ensure_success(DeviceStatus::TransactionRejected).expect_err("rejected");
        assert_eq!(err.return_code(), Some(0x6986));
    }

    #[tokio::test]
    async fn unannounced_session_is_not_usable() {
        let device = SimDevice::new(3);
        device.plug();
        let manager =
            DeviceManager::new(ManagerConfig::default(), device.driver(), SimApp::shared());
        let transport = device
            .driver()
            .open(&SimDevice::descriptor())
            .await
            .expect("open");
        manager
            .inner
            .session
            .store(Some(Arc::new(Session::new(1, transport))));

        assert!(manager.has_session());
        assert!(matches!(
            manager.request_address().await,
            Err(CoreError::NoTransport)
        ));
        assert!(!manager.is_busy());
        assert_eq!(device.exchange_count(), 0);
    }
}
