use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::crypto::KeyPair;
use crate::error::{LifecycleError, Result};

/// On-disk form of the base layer's signing identity
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IdentityFile {
    pub public_key: String,
    pub private_key: String,
}

impl IdentityFile {
    pub fn from_keypair(keypair: &KeyPair) -> Self {
        Self {
            public_key: keypair.public_key_hex(),
            private_key: keypair.secret_hex(),
        }
    }

    pub fn into_keypair(self) -> Result<KeyPair> {
        let bytes = hex::decode(self.private_key.trim())
            .map_err(|e| LifecycleError::Config(format!("identity key is not hex: {}", e)))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LifecycleError::Config("identity key must be 32 bytes".to_string()))?;
        let keypair = KeyPair::from_secret(secret);
        if keypair.public_key_hex() != self.public_key {
            return Err(LifecycleError::Config(
                "identity public key does not match private key".to_string(),
            ));
        }
        Ok(keypair)
    }
}

/// Load the identity at `path`, generating and saving a fresh one if absent
pub fn load_or_create(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .map_err(|e| LifecycleError::Config(format!("read {}: {}", path.display(), e)))?;
        let file: IdentityFile =
            serde_json::from_str(&text).map_err(|e| LifecycleError::Serialization(e.to_string()))?;
        let keypair = file.into_keypair()?;
        info!("Identity loaded from {}: {}", path.display(), keypair.pubkey());
        return Ok(keypair);
    }

    let keypair = KeyPair::generate();
    let json = serde_json::to_string_pretty(&IdentityFile::from_keypair(&keypair))
        .map_err(|e| LifecycleError::Serialization(e.to_string()))?;
    if let Err(e) = fs::write(path, json) {
        warn!("Could not save identity to {}: {}. Key is NOT persisted.", path.display(), e);
    } else {
        info!("Generated new identity {} at {}", keypair.pubkey(), path.display());
    }
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_survives_reload() {
        let dir = std::env::temp_dir().join(format!("er-identity-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("identity.json");

        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();
        assert_eq!(first.pubkey(), second.pubkey());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_mismatched_public_key_rejected() {
        let mut file = IdentityFile::from_keypair(&KeyPair::generate());
        file.public_key = KeyPair::generate().public_key_hex();
        assert!(matches!(file.into_keypair(), Err(LifecycleError::Config(_))));
    }
}
