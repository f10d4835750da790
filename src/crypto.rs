use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore; // Imported for fill_bytes
use bip39::{Mnemonic, Language};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use ed25519_dalek::Signature;

/// A 32-byte ed25519 public key identifying an owner, validator or oracle
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Pubkey(pub [u8; 32]);

impl Pubkey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        write!(f, "Pubkey({}..)", &hex::encode(self.0)[..8])
    }
}

impl FromStr for Pubkey {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("Invalid pubkey hex: {}", e))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "Pubkey must be 32 bytes".to_string())?;
        Ok(Pubkey(arr))
    }
}

pub struct KeyPair {
    pub signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new Ed25519 keypair
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        KeyPair { signing_key: SigningKey::generate(&mut csprng) }
    }

    /// Deterministic keypair from a 32-byte secret
    pub fn from_secret(secret: [u8; 32]) -> Self {
        KeyPair { signing_key: SigningKey::from_bytes(&secret) }
    }

    /// Generate a new 12-word mnemonic
    pub fn generate_mnemonic() -> Result<String, String> {
        let mut entropy = [0u8; 16]; // 128 bits = 12 words
        OsRng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| format!("Failed to create mnemonic: {}", e))?;
        Ok(mnemonic.to_string())
    }

    /// Restore keypair from mnemonic
    pub fn from_mnemonic(phrase: &str) -> Result<Self, String> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| format!("Invalid mnemonic: {}", e))?;
        let seed = mnemonic.to_seed("");

        // Use first 32 bytes for the Ed25519 secret
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&seed[0..32]);
        Ok(Self::from_secret(secret))
    }

    /// Sign a message with the private key
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey(self.signing_key.verifying_key().to_bytes())
    }

    /// Get public key as hex string
    pub fn public_key_hex(&self) -> String {
        self.pubkey().to_string()
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

/// Verify a signature against a message with a provided public key
pub fn verify(pubkey: &Pubkey, message: &[u8], signature: &Signature) -> bool {
    match VerifyingKey::from_bytes(&pubkey.0) {
        Ok(key) => key.verify(message, signature).is_ok(),
        Err(_) => false,
    }
}

pub fn signature_hex(signature: &Signature) -> String {
    hex::encode(signature.to_bytes())
}
