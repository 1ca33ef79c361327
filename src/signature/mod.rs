//! Code-signing checks for plugin binaries loaded from disk.
//!
//! Each binary gets up to [`MAX_ATTEMPTS`] attempts. The first failure in the
//! life of a validator pauses for [`WAKE_UP_DELAY`] before retrying, giving a
//! cold network stack time to come up; later failures retry immediately.

pub mod bundle;
pub mod chain;
pub mod revocation;

pub use bundle::{Certificate, SignatureBundle};
pub use chain::{
    BundleTrustChecker, ChainBuildError, ChainPolicy, ChainScope, ChainStatus, SigningEvidence, TrustAnchor,
    TrustChecker,
};
pub use revocation::{OfflineRevocation, OnlineRevocation, RevocationSource, RevocationStatus};

use crate::error::ErrorCode;
use crate::sleeper::Sleeper;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const MAX_ATTEMPTS: usize = 3;
pub const WAKE_UP_DELAY: Duration = Duration::from_secs(5);
pub const REVOCATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("binary is not signed")]
    Unsigned,
    #[error("end certificate rejected: {0}")]
    EndCertificateInvalid(String),
    #[error("certificate chain rejected: {0}")]
    ChainInvalid(String),
    #[error("signature check failed: {0}")]
    CheckFailed(String),
}

impl SignatureError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SignatureError::Unsigned => ErrorCode::Unsigned,
            SignatureError::EndCertificateInvalid(_) => ErrorCode::EndCertificateInvalid,
            SignatureError::ChainInvalid(_) => ErrorCode::ChainInvalid,
            SignatureError::CheckFailed(_) => ErrorCode::SignatureCheckFailed,
        }
    }

    /// A verdict about the certificate beats "could not tell".
    fn specificity(&self) -> u8 {
        match self {
            SignatureError::CheckFailed(_) => 0,
            SignatureError::EndCertificateInvalid(_) | SignatureError::ChainInvalid(_) => 1,
            SignatureError::Unsigned => 2,
        }
    }
}

pub struct SignatureValidator {
    checker: Box<dyn TrustChecker>,
    policy_oids: Vec<String>,
    sleeper: Arc<dyn Sleeper>,
    wake_up_consumed: AtomicBool,
}

impl SignatureValidator {
    pub fn new(checker: Box<dyn TrustChecker>, policy_oids: Vec<String>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            checker,
            policy_oids,
            sleeper,
            wake_up_consumed: AtomicBool::new(false),
        }
    }

    pub fn validate(&self, binary: &Path) -> Result<(), SignatureError> {
        let mut worst: Option<SignatureError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let error = match self.attempt(binary) {
                Ok(()) => {
                    if attempt > 1 {
                        log::info!("Signature of {} verified on attempt {}", binary.display(), attempt);
                    }
                    return Ok(());
                }
                Err(SignatureError::Unsigned) => return Err(SignatureError::Unsigned),
                Err(e) => e,
            };

            log::warn!(
                "Signature check of {} failed (attempt {}/{}): {}",
                binary.display(),
                attempt,
                MAX_ATTEMPTS,
                error
            );

            worst = match worst {
                Some(prev) if prev.specificity() > error.specificity() => Some(prev),
                _ => Some(error),
            };

            if attempt < MAX_ATTEMPTS && !self.wake_up_consumed.swap(true, Ordering::SeqCst) {
                self.sleeper.sleep(WAKE_UP_DELAY);
            }
        }

        Err(worst.unwrap_or_else(|| SignatureError::CheckFailed("no attempt made".into())))
    }

    fn attempt(&self, binary: &Path) -> Result<(), SignatureError> {
        let evidence = self
            .checker
            .certificate(binary)
            .map_err(|e| SignatureError::CheckFailed(e.to_string()))?
            .ok_or(SignatureError::Unsigned)?;

        let end_policy = ChainPolicy::end_certificate(&self.policy_oids);
        match self.checker.build_chain(&evidence, &end_policy) {
            Ok(ChainStatus::Valid) => {}
            Ok(ChainStatus::Invalid(reason)) => return Err(SignatureError::EndCertificateInvalid(reason)),
            Err(e) => return Err(SignatureError::CheckFailed(e.to_string())),
        }

        let chain_policy = ChainPolicy::entire_chain(&self.policy_oids);
        match self.checker.build_chain(&evidence, &chain_policy) {
            Ok(ChainStatus::Valid) => Ok(()),
            Ok(ChainStatus::Invalid(reason)) => Err(SignatureError::ChainInvalid(reason)),
            Err(e) => Err(SignatureError::CheckFailed(e.to_string())),
        }
    }
}
