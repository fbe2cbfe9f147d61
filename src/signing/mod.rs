//! Record signing
//!
//! ECDSA over secp256k1 with SHA-256. Signatures leave this module in the
//! fixed 64-byte compact form; verification rebuilds DER from it the same
//! way a downstream consumer does.

pub mod codec;

pub use codec::{to_compact, to_der, SignatureCompact, SignatureError, COMPACT_LEN};

use anyhow::Context;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::pkcs8::DecodePrivateKey;
use std::path::Path;

use crate::error::{OracleError, Result};

/// Signs a message on behalf of the ledger or the record server
#[cfg_attr(test, mockall::automock)]
pub trait MessageSigner: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<SignatureCompact>;
}

pub struct EcdsaSigner {
    key: SigningKey,
}

impl EcdsaSigner {
    /// 32-byte private scalar as hex, with or without `0x`
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let raw = hex_key.trim().trim_start_matches("0x");
        let bytes = hex::decode(raw)
            .map_err(|e| OracleError::Signing(format!("invalid key hex: {}", e)))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| OracleError::Signing(format!("invalid private key: {}", e)))?;
        Ok(Self { key })
    }

    /// SEC1 (`EC PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`) PEM
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = if pem.contains("BEGIN EC PRIVATE KEY") {
            k256::SecretKey::from_sec1_pem(pem)
                .map(SigningKey::from)
                .map_err(|e| OracleError::Signing(format!("invalid SEC1 key: {}", e)))?
        } else {
            SigningKey::from_pkcs8_pem(pem)
                .map_err(|e| OracleError::Signing(format!("invalid PKCS#8 key: {}", e)))?
        };
        Ok(Self { key })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read signing key {}", path.display()))?;
        Self::from_pem(&pem).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn verifier(&self) -> EcdsaVerifier {
        EcdsaVerifier {
            key: *self.key.verifying_key(),
        }
    }
}

impl MessageSigner for EcdsaSigner {
    fn sign(&self, message: &[u8]) -> Result<SignatureCompact> {
        let signature: Signature = self
            .key
            .try_sign(message)
            .map_err(|e| OracleError::Signing(e.to_string()))?;
        let der = signature.to_der();
        Ok(to_compact(der.as_bytes())?)
    }
}

/// Public half of an [`EcdsaSigner`]
#[derive(Clone)]
pub struct EcdsaVerifier {
    key: VerifyingKey,
}

impl EcdsaVerifier {
    /// Compressed SEC1 public key, hex
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.to_encoded_point(true).as_bytes())
    }

    pub fn verify(&self, message: &[u8], signature: &SignatureCompact) -> Result<()> {
        let der = to_der(signature);
        let signature = Signature::from_der(&der)
            .map_err(|e| OracleError::Signing(format!("rebuilt DER rejected: {}", e)))?;
        self.key
            .verify(message, &signature)
            .map_err(|e| OracleError::Signing(format!("verification failed: {}", e)))
    }
}
