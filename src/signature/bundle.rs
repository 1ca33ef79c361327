//! Detached signing evidence: `<binary>.sig`, a JSON bundle holding an ECDSA
//! P-256 signature over the binary and the certificate chain that vouches for
//! the signing key (end certificate first).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Policy OID matching any required policy.
pub const ANY_POLICY: &str = "2.5.29.32.0";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed signature bundle: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid public key: {0}")]
    InvalidKey(String),
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: String,
    pub subject: String,
    pub issuer: String,
    /// Base64 SEC1 encoded P-256 public key.
    pub public_key: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub revocation_url: Option<String>,
    /// Base64 DER signature by the issuer over [`Certificate::to_be_signed`].
    #[serde(default)]
    pub issuer_signature: String,
}

#[derive(Serialize)]
struct TbsCertificate<'a> {
    serial: &'a str,
    subject: &'a str,
    issuer: &'a str,
    public_key: &'a str,
    not_before: &'a DateTime<Utc>,
    not_after: &'a DateTime<Utc>,
    policies: &'a [String],
    revocation_url: Option<&'a str>,
}

impl Certificate {
    pub fn to_be_signed(&self) -> Result<Vec<u8>, BundleError> {
        let tbs = TbsCertificate {
            serial: &self.serial,
            subject: &self.subject,
            issuer: &self.issuer,
            public_key: &self.public_key,
            not_before: &self.not_before,
            not_after: &self.not_after,
            policies: &self.policies,
            revocation_url: self.revocation_url.as_deref(),
        };
        Ok(serde_json::to_vec(&tbs)?)
    }

    /// SHA-256 over serial and key, hex encoded. Used in logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.serial.as_bytes());
        hasher.update(self.public_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, BundleError> {
        parse_key(&self.public_key)
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    pub fn has_policies(&self, required: &[String]) -> bool {
        if self.policies.iter().any(|p| p == ANY_POLICY) {
            return true;
        }
        required.iter().all(|oid| self.policies.contains(oid))
    }

    pub fn is_signed_by(&self, issuer: &VerifyingKey) -> Result<bool, BundleError> {
        verify_bytes(issuer, &self.to_be_signed()?, &self.issuer_signature)
    }

    pub fn sign_with(&mut self, issuer: &SigningKey) -> Result<(), BundleError> {
        self.issuer_signature = sign_bytes(&self.to_be_signed()?, issuer);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBundle {
    /// Base64 DER signature over the binary, made with the end certificate key.
    pub signature: String,
    pub chain: Vec<Certificate>,
}

impl SignatureBundle {
    pub fn end_certificate(&self) -> Option<&Certificate> {
        self.chain.first()
    }

    pub fn verifies_content(&self, content: &[u8]) -> Result<bool, BundleError> {
        let Some(end) = self.end_certificate() else {
            return Ok(false);
        };
        verify_bytes(&end.verifying_key()?, content, &self.signature)
    }

    /// `Ok(None)` when the binary carries no bundle at all.
    pub fn read_for(binary: &Path) -> Result<Option<Self>, BundleError> {
        let path = signature_path_for(binary);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn write_for(&self, binary: &Path) -> Result<(), BundleError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(signature_path_for(binary), content)?;
        Ok(())
    }
}

pub fn signature_path_for(binary: &Path) -> PathBuf {
    let mut sig = binary.as_os_str().to_owned();
    sig.push(".sig");
    PathBuf::from(sig)
}

pub fn parse_key(b64: &str) -> Result<VerifyingKey, BundleError> {
    let bytes = BASE64
        .decode(b64.trim())
        .map_err(|e| BundleError::InvalidKey(format!("base64 decode: {e}")))?;
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|e| BundleError::InvalidKey(format!("SEC1 decode: {e}")))
}

pub fn encode_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.to_sec1_bytes())
}

/// Sign `data` and return the base64 DER signature. Used by signing tooling.
pub fn sign_bytes(data: &[u8], key: &SigningKey) -> String {
    let signature: Signature = key.sign(data);
    BASE64.encode(signature.to_der().as_bytes())
}

fn verify_bytes(key: &VerifyingKey, data: &[u8], signature_b64: &str) -> Result<bool, BundleError> {
    let der = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| BundleError::InvalidSignature(format!("base64 decode: {e}")))?;
    let signature =
        Signature::from_der(&der).map_err(|e| BundleError::InvalidSignature(format!("DER decode: {e}")))?;
    Ok(key.verify(data, &signature).is_ok())
}
