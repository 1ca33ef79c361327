use super::bundle::Certificate;
use super::chain::ChainBuildError;
use serde::Deserialize;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    Good,
    Revoked,
    Unknown,
}

/// Answers "is this certificate revoked?".
///
/// `Err` means the answer could not be obtained right now and the whole
/// chain build should be retried later. `deadline` is shared by every query
/// of one chain build.
pub trait RevocationSource: Send + Sync {
    fn status(&self, certificate: &Certificate, deadline: Instant) -> Result<RevocationStatus, ChainBuildError>;
}

/// Used when online checks are disabled: every certificate is `Unknown`.
pub struct OfflineRevocation;

impl RevocationSource for OfflineRevocation {
    fn status(&self, _certificate: &Certificate, _deadline: Instant) -> Result<RevocationStatus, ChainBuildError> {
        Ok(RevocationStatus::Unknown)
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// Queries `GET {revocation_url}/{serial}` on the issuer's responder.
pub struct OnlineRevocation {
    client: reqwest::blocking::Client,
}

impl OnlineRevocation {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("tray-host/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl RevocationSource for OnlineRevocation {
    fn status(&self, certificate: &Certificate, deadline: Instant) -> Result<RevocationStatus, ChainBuildError> {
        let Some(base) = certificate.revocation_url.as_deref() else {
            return Ok(RevocationStatus::Unknown);
        };
        let url = format!("{}/{}", base.trim_end_matches('/'), certificate.serial);

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ChainBuildError::RevocationUnavailable(format!(
                "{}: revocation time budget exhausted",
                url
            )));
        }

        let response = self
            .client
            .get(&url)
            .timeout(remaining)
            .send()
            .map_err(|e| ChainBuildError::RevocationUnavailable(format!("{}: {}", url, e)))?;

        let code = response.status();
        if code.is_server_error() {
            return Err(ChainBuildError::RevocationUnavailable(format!("{} returned {}", url, code)));
        }
        if !code.is_success() {
            log::debug!("Revocation responder {} returned {}", url, code);
            return Ok(RevocationStatus::Unknown);
        }

        let body: StatusResponse = response
            .json()
            .map_err(|e| ChainBuildError::RevocationUnavailable(format!("{}: {}", url, e)))?;
        Ok(parse_status(&body.status))
    }
}

fn parse_status(status: &str) -> RevocationStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "good" => RevocationStatus::Good,
        "revoked" => RevocationStatus::Revoked,
        _ => RevocationStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::bundle::testing::{certificate, key};
    use std::time::Duration;

    fn in_secs(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn parse_status_cases() {
        let cases = [
            ("good", RevocationStatus::Good),
            ("GOOD", RevocationStatus::Good),
            (" revoked ", RevocationStatus::Revoked),
            ("unknown", RevocationStatus::Unknown),
            ("", RevocationStatus::Unknown),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_status(input), expected, "{:?}", input);
        }
    }

    #[test]
    fn offline_source_never_knows() {
        let cert = certificate("Vendor", "Root", &key(2), &key(1));
        assert_eq!(OfflineRevocation.status(&cert, in_secs(1)).unwrap(), RevocationStatus::Unknown);
    }

    #[test]
    fn online_source_without_responder_is_unknown() {
        let cert = certificate("Vendor", "Root", &key(2), &key(1));
        let source = OnlineRevocation::new().unwrap();

        assert_eq!(source.status(&cert, in_secs(1)).unwrap(), RevocationStatus::Unknown);
    }

    #[test]
    fn unreachable_responder_is_transient() {
        let mut cert = certificate("Vendor", "Root", &key(2), &key(1));
        cert.revocation_url = Some("http://127.0.0.1:9".into());
        let source = OnlineRevocation::new().unwrap();
        let deadline = Instant::now() + Duration::from_millis(500);

        assert!(matches!(source.status(&cert, deadline), Err(ChainBuildError::RevocationUnavailable(_))));
    }

    #[test]
    fn spent_budget_fails_without_contacting_responder() {
        let mut cert = certificate("Vendor", "Root", &key(2), &key(1));
        cert.revocation_url = Some("http://127.0.0.1:9".into());
        let source = OnlineRevocation::new().unwrap();

        let result = source.status(&cert, Instant::now());

        assert!(matches!(result, Err(ChainBuildError::RevocationUnavailable(reason)) if reason.contains("budget exhausted")));
    }
}
