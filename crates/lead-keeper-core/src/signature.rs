//! # Webhook Signatures
//!
//! Optional HMAC-SHA256 verification of inbound webhook bodies. Signatures
//! use the `sha256=<hex-digest>` form.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Prefix expected on signature header values
pub const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Signature is missing")]
    Missing,

    #[error("Signature is not valid hex")]
    Malformed,

    #[error("Signature does not match payload")]
    Mismatch,

    #[error("Signing secret is empty")]
    EmptySecret,
}

/// Verifies that a payload was signed by a trusted sender
pub trait SignatureValidator: Send + Sync {
    /// Check `signature` against `payload`
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), SignatureError>;
}

/// HMAC-SHA256 validator backed by a shared secret
///
/// The secret is wiped from memory when the validator is dropped and never
/// appears in `Debug` output.
///
/// # Examples
///
/// ```rust
/// use lead_keeper_core::signature::{HmacSignatureValidator, SignatureValidator};
///
/// let validator = HmacSignatureValidator::new("s3cret").unwrap();
/// let signature = validator.sign(b"{}");
/// assert!(validator.verify(b"{}", Some(&signature)).is_ok());
/// ```
pub struct HmacSignatureValidator {
    secret: Zeroizing<Vec<u8>>,
}

impl HmacSignatureValidator {
    /// Create a validator from the shared secret
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, SignatureError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SignatureError::EmptySecret);
        }
        Ok(Self {
            secret: Zeroizing::new(secret.to_vec()),
        })
    }

    /// Compute the `sha256=<hex>` signature for a payload
    pub fn sign(&self, payload: &[u8]) -> String {
        format!("{}{}", SIGNATURE_PREFIX, hex::encode(self.digest(payload)))
    }

    fn digest(&self, payload: &[u8]) -> Vec<u8> {
        // HMAC accepts keys of any length
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return Vec::new(),
        };
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

impl SignatureValidator for HmacSignatureValidator {
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let signature = signature.map(str::trim).filter(|s| !s.is_empty());
        let Some(signature) = signature else {
            return Err(SignatureError::Missing);
        };

        let hex_part = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
        let provided = hex::decode(hex_part).map_err(|_| SignatureError::Malformed)?;
        let expected = self.digest(payload);

        if expected.is_empty() || !bool::from(expected.ct_eq(&provided)) {
            return Err(SignatureError::Mismatch);
        }
        Ok(())
    }
}

impl std::fmt::Debug for HmacSignatureValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSignatureValidator")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
