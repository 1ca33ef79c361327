//! Chain building against configured trust anchors.

use super::bundle::{parse_key, BundleError, Certificate, SignatureBundle};
use super::revocation::{RevocationSource, RevocationStatus};
use super::REVOCATION_TIMEOUT;
use chrono::Utc;
use p256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainScope {
    /// Revocation is checked for the end certificate only.
    EndCertificate,
    /// Revocation is checked for every certificate in the chain.
    EntireChain,
}

#[derive(Debug, Clone)]
pub struct ChainPolicy {
    pub scope: ChainScope,
    pub ignore_end_revocation_unknown: bool,
    pub ignore_ca_revocation_unknown: bool,
    pub policy_oids: Vec<String>,
}

impl ChainPolicy {
    pub fn end_certificate(policy_oids: &[String]) -> Self {
        Self {
            scope: ChainScope::EndCertificate,
            ignore_end_revocation_unknown: true,
            ignore_ca_revocation_unknown: false,
            policy_oids: policy_oids.to_vec(),
        }
    }

    pub fn entire_chain(policy_oids: &[String]) -> Self {
        Self {
            scope: ChainScope::EntireChain,
            ignore_end_revocation_unknown: true,
            ignore_ca_revocation_unknown: true,
            policy_oids: policy_oids.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Valid,
    Invalid(String),
}

/// Failure to reach a verdict at all, as opposed to a negative verdict.
#[derive(Debug, Error)]
pub enum ChainBuildError {
    #[error("revocation status unavailable: {0}")]
    RevocationUnavailable(String),
    #[error(transparent)]
    Evidence(#[from] BundleError),
}

/// What a binary carries to prove who signed it.
#[derive(Debug, Clone)]
pub struct SigningEvidence {
    pub bundle: SignatureBundle,
    pub content: Vec<u8>,
}

pub trait TrustChecker: Send + Sync {
    /// `Ok(None)` when the binary is not signed.
    fn certificate(&self, binary: &Path) -> Result<Option<SigningEvidence>, ChainBuildError>;

    fn build_chain(&self, evidence: &SigningEvidence, policy: &ChainPolicy) -> Result<ChainStatus, ChainBuildError>;
}

/// A root the host trusts, identified by subject name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    pub name: String,
    /// Base64 SEC1 encoded P-256 public key.
    pub public_key: String,
}

pub struct BundleTrustChecker {
    anchors: Vec<(String, VerifyingKey)>,
    revocation: Box<dyn RevocationSource>,
    revocation_timeout: Duration,
}

impl BundleTrustChecker {
    pub fn new(anchors: &[TrustAnchor], revocation: Box<dyn RevocationSource>) -> Result<Self, BundleError> {
        let anchors = anchors
            .iter()
            .map(|a| Ok((a.name.clone(), parse_key(&a.public_key)?)))
            .collect::<Result<Vec<_>, BundleError>>()?;
        Ok(Self {
            anchors,
            revocation,
            revocation_timeout: REVOCATION_TIMEOUT,
        })
    }

    /// Time allowed for all revocation queries of one chain build.
    pub fn with_revocation_timeout(mut self, timeout: Duration) -> Self {
        self.revocation_timeout = timeout;
        self
    }

    fn anchor(&self, name: &str) -> Option<&VerifyingKey> {
        self.anchors.iter().find(|(n, _)| n == name).map(|(_, key)| key)
    }

    /// Walk up the chain until a certificate is issued by a trusted anchor.
    /// Returns how many certificates take part in the trust path.
    fn trust_path(&self, chain: &[Certificate], policy: &ChainPolicy) -> Result<Result<usize, String>, BundleError> {
        let now = Utc::now();

        for (i, cert) in chain.iter().enumerate() {
            if !cert.is_valid_at(now) {
                return Ok(Err(format!("certificate '{}' is outside its validity period", cert.subject)));
            }
            if !cert.has_policies(&policy.policy_oids) {
                return Ok(Err(format!("certificate '{}' lacks a required policy", cert.subject)));
            }

            if let Some(anchor) = self.anchor(&cert.issuer) {
                if cert.is_signed_by(anchor)? {
                    return Ok(Ok(i + 1));
                }
                return Ok(Err(format!(
                    "certificate '{}' is not signed by trust anchor '{}'",
                    cert.subject, cert.issuer
                )));
            }

            let Some(issuer) = chain.get(i + 1) else {
                return Ok(Err(format!("no trusted root for issuer '{}'", cert.issuer)));
            };
            if issuer.subject != cert.issuer {
                return Ok(Err(format!(
                    "chain order broken: '{}' issued by '{}', next is '{}'",
                    cert.subject, cert.issuer, issuer.subject
                )));
            }
            if !cert.is_signed_by(&issuer.verifying_key()?)? {
                return Ok(Err(format!("certificate '{}' has a bad issuer signature", cert.subject)));
            }
        }

        Ok(Err("empty certificate chain".to_string()))
    }

    fn check_revocation(
        &self,
        cert: &Certificate,
        ignore_unknown: bool,
        deadline: Instant,
    ) -> Result<Option<String>, ChainBuildError> {
        match self.revocation.status(cert, deadline)? {
            RevocationStatus::Good => Ok(None),
            RevocationStatus::Revoked => Ok(Some(format!("certificate '{}' is revoked", cert.subject))),
            RevocationStatus::Unknown if ignore_unknown => Ok(None),
            RevocationStatus::Unknown => Ok(Some(format!(
                "revocation status of '{}' is unknown",
                cert.subject
            ))),
        }
    }
}

impl TrustChecker for BundleTrustChecker {
    fn certificate(&self, binary: &Path) -> Result<Option<SigningEvidence>, ChainBuildError> {
        let Some(bundle) = SignatureBundle::read_for(binary)? else {
            return Ok(None);
        };
        if bundle.chain.is_empty() {
            return Ok(None);
        }
        let content = std::fs::read(binary).map_err(BundleError::from)?;
        Ok(Some(SigningEvidence { bundle, content }))
    }

    fn build_chain(&self, evidence: &SigningEvidence, policy: &ChainPolicy) -> Result<ChainStatus, ChainBuildError> {
        let chain = &evidence.bundle.chain;

        if !evidence.bundle.verifies_content(&evidence.content)? {
            return Ok(ChainStatus::Invalid("binary does not match its signature".into()));
        }

        let path_len = match self.trust_path(chain, policy)? {
            Ok(len) => len,
            Err(reason) => return Ok(ChainStatus::Invalid(reason)),
        };

        let checked = match policy.scope {
            ChainScope::EndCertificate => 1,
            ChainScope::EntireChain => path_len,
        };

        let deadline = Instant::now() + self.revocation_timeout;
        for (i, cert) in chain.iter().take(checked).enumerate() {
            let ignore_unknown = if i == 0 {
                policy.ignore_end_revocation_unknown
            } else {
                policy.ignore_ca_revocation_unknown
            };
            if let Some(reason) = self.check_revocation(cert, ignore_unknown, deadline)? {
                return Ok(ChainStatus::Invalid(reason));
            }
        }

        log::debug!(
            "Chain for {} trusted ({:?}, {} certificates)",
            chain[0].fingerprint(),
            policy.scope,
            path_len
        );
        Ok(ChainStatus::Valid)
    }
}
