//! Local PIN protecting on-device agent settings

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use crate::{AuditEvent, AuditEventType, Store, StoreError, StoreResult};

pub const MIN_PIN_LENGTH: usize = 4;

/// Hex-encoded SHA-256 of a PIN
pub fn hash_pin(pin: &str) -> String {
    hex::encode(Sha256::digest(pin.as_bytes()))
}

/// PIN operations on top of a [`Store`]
#[derive(Clone)]
pub struct PinVault {
    store: Arc<dyn Store>,
}

impl PinVault {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn is_set(&self) -> StoreResult<bool> {
        Ok(self.store.pin_hash()?.is_some())
    }

    pub fn set(&self, pin: &str) -> StoreResult<()> {
        if pin.chars().count() < MIN_PIN_LENGTH {
            return Err(StoreError::InvalidPin(format!(
                "must be at least {} characters",
                MIN_PIN_LENGTH
            )));
        }
        self.store.set_pin_hash(Some(&hash_pin(pin)))?;
        info!("Local PIN set");
        Ok(())
    }

    /// `false` when no PIN is set
    pub fn verify(&self, pin: &str) -> StoreResult<bool> {
        Ok(self
            .store
            .pin_hash()?
            .is_some_and(|stored| stored == hash_pin(pin)))
    }

    /// Clear the PIN so the next local access sets a new one
    pub fn reset(&self) -> StoreResult<()> {
        self.store.set_pin_hash(None)?;
        self.store.append_audit(AuditEvent::new(AuditEventType::PinReset))?;
        info!("Local PIN reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;

    fn vault() -> PinVault {
        PinVault::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_pin("1234"),
            "03ac674216f3e15c761ee1a5e255f067953623c8b388b4459e13f978d7c846f4"
        );
    }

    #[test]
    fn short_pin_is_rejected() {
        let vault = vault();
        assert!(matches!(vault.set("123"), Err(StoreError::InvalidPin(_))));
        assert!(!vault.is_set().unwrap());
    }

    #[test]
    fn set_verify_reset() {
        let vault = vault();
        assert!(!vault.verify("1234").unwrap());

        vault.set("1234").unwrap();
        assert!(vault.verify("1234").unwrap());
        assert!(!vault.verify("4321").unwrap());

        vault.reset().unwrap();
        assert!(!vault.is_set().unwrap());
        assert!(!vault.verify("1234").unwrap());
    }
}
